//! Read-side frame assembly.

use crate::error::ProtocolError;
use crate::frame::{Frame, LENGTH_PREFIX_SIZE};
use crate::inbound::{DispatchTable, InboundPackage};
use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use uuid::Uuid;

/// Turns transport reads into decoded, correlated packages.
///
/// Reads may split a frame anywhere or carry several frames at once. The
/// buffer remembers how many body bytes the in-progress frame still needs,
/// so a read boundary never has to line up with a frame boundary.
pub struct ReadBuffer {
    table: DispatchTable,
    buffer: BytesMut,
    /// Body length of the frame being assembled; zero before its prefix is read.
    pending_len: usize,
    ready: VecDeque<InboundPackage>,
}

impl ReadBuffer {
    pub fn new(table: DispatchTable) -> Self {
        Self {
            table,
            buffer: BytesMut::with_capacity(8192),
            pending_len: 0,
            ready: VecDeque::new(),
        }
    }

    /// Appends a chunk and decodes every frame it completes.
    ///
    /// Returns the number of packages decoded from this chunk. On error the
    /// partial state is discarded; the stream can no longer be trusted.
    /// Packages decoded before the bad frame stay queued.
    pub fn extend(&mut self, data: &[u8]) -> Result<usize, ProtocolError> {
        self.buffer.extend_from_slice(data);
        match self.assemble() {
            Ok(count) => Ok(count),
            Err(err) => {
                tracing::error!(error = %err, "discarding read buffer");
                self.buffer.clear();
                self.pending_len = 0;
                Err(err)
            }
        }
    }

    fn assemble(&mut self) -> Result<usize, ProtocolError> {
        let mut count = 0;
        loop {
            if self.pending_len == 0 {
                if self.buffer.len() < LENGTH_PREFIX_SIZE {
                    break;
                }
                let prefix = [
                    self.buffer[0],
                    self.buffer[1],
                    self.buffer[2],
                    self.buffer[3],
                ];
                self.pending_len = Frame::read_length(prefix)?;
                self.buffer.advance(LENGTH_PREFIX_SIZE);
            }

            if self.buffer.len() < self.pending_len {
                break;
            }

            let body = self.buffer.split_to(self.pending_len).freeze();
            self.pending_len = 0;

            let frame = Frame::from_body(body)?;
            let package = self.table.decode(&frame)?;
            tracing::trace!(
                command = %package.command,
                correlation_id = %package.correlation_id,
                "decoded package"
            );
            self.ready.push_back(package);
            count += 1;
        }
        Ok(count)
    }

    /// Pops the oldest decoded package.
    pub fn next_package(&mut self) -> Option<InboundPackage> {
        self.ready.pop_front()
    }

    /// Removes the packages for `correlation_id`, keeping all others queued
    /// in their original order.
    pub fn take_for(&mut self, correlation_id: Uuid) -> Vec<InboundPackage> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.ready.len());
        for package in self.ready.drain(..) {
            if package.correlation_id == correlation_id {
                taken.push(package);
            } else {
                kept.push_back(package);
            }
        }
        self.ready = kept;
        taken
    }

    /// Removes every decoded package in arrival order.
    pub fn drain(&mut self) -> Vec<InboundPackage> {
        self.ready.drain(..).collect()
    }

    /// Body bytes still needed to finish the in-progress frame.
    ///
    /// Zero when no length prefix has been read yet.
    pub fn owed(&self) -> usize {
        self.pending_len.saturating_sub(self.buffer.len())
    }

    /// Returns the number of undecoded bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the number of decoded packages not yet taken.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Clears all buffered bytes and queued packages.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending_len = 0;
        self.ready.clear();
    }
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new(DispatchTable::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::TcpCommand;
    use crate::inbound::InboundMessage;
    use crate::message::{OperationResult, SubscriptionConfirmation, WriteEventsCompleted};
    use proptest::prelude::*;

    fn write_completed(id: Uuid, last: i64) -> Vec<u8> {
        let reply = WriteEventsCompleted {
            result: OperationResult::Success as i32,
            message: None,
            first_event_number: 0,
            last_event_number: last,
            prepare_position: Some(42),
            commit_position: Some(42),
            current_version: None,
        };
        Frame::from_message(TcpCommand::WriteEventsCompleted, id, &reply)
            .encode()
            .unwrap()
            .to_vec()
    }

    fn heartbeat(id: Uuid) -> Vec<u8> {
        Frame::empty(TcpCommand::HeartbeatRequest, id)
            .encode()
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_whole_frame() {
        let id = Uuid::new_v4();
        let mut buffer = ReadBuffer::default();
        assert_eq!(buffer.extend(&write_completed(id, 3)).unwrap(), 1);

        let package = buffer.next_package().unwrap();
        assert_eq!(package.correlation_id, id);
        assert!(matches!(
            package.message,
            InboundMessage::WriteEventsCompleted(ref m) if m.last_event_number == 3
        ));
        assert!(buffer.next_package().is_none());
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn test_split_at_every_boundary() {
        let id = Uuid::new_v4();
        let bytes = write_completed(id, 7);

        let mut whole = ReadBuffer::default();
        whole.extend(&bytes).unwrap();
        let expected = whole.next_package().unwrap();

        for split in 0..=bytes.len() {
            let mut buffer = ReadBuffer::default();
            let first = buffer.extend(&bytes[..split]).unwrap();
            let second = buffer.extend(&bytes[split..]).unwrap();
            assert_eq!(first + second, 1, "split at {}", split);
            assert_eq!(buffer.next_package().unwrap(), expected);
            assert!(buffer.next_package().is_none());
        }
    }

    #[test]
    fn test_owed_tracks_progress() {
        let bytes = write_completed(Uuid::new_v4(), 1);
        let body_len = bytes.len() - LENGTH_PREFIX_SIZE;

        let mut buffer = ReadBuffer::default();
        buffer.extend(&bytes[..2]).unwrap();
        assert_eq!(buffer.owed(), 0);
        assert_eq!(buffer.buffered(), 2);

        buffer.extend(&bytes[2..10]).unwrap();
        assert_eq!(buffer.owed(), body_len - 6);

        buffer.extend(&bytes[10..]).unwrap();
        assert_eq!(buffer.owed(), 0);
        assert_eq!(buffer.ready_len(), 1);
    }

    #[test]
    fn test_coalesced_frames_keep_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut chunk = write_completed(a, 1);
        chunk.extend(write_completed(b, 2));

        let mut buffer = ReadBuffer::default();
        assert_eq!(buffer.extend(&chunk).unwrap(), 2);
        assert_eq!(buffer.next_package().unwrap().correlation_id, a);
        assert_eq!(buffer.next_package().unwrap().correlation_id, b);
    }

    #[test]
    fn test_coalesced_with_trailing_partial() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let second = write_completed(b, 2);
        let mut chunk = write_completed(a, 1);
        chunk.extend_from_slice(&second[..5]);

        let mut buffer = ReadBuffer::default();
        assert_eq!(buffer.extend(&chunk).unwrap(), 1);
        assert_eq!(buffer.extend(&second[5..]).unwrap(), 1);
        assert_eq!(buffer.drain().len(), 2);
    }

    #[test]
    fn test_take_for_keeps_unrelated() {
        let op = Uuid::new_v4();
        let beat = Uuid::new_v4();
        let mut chunk = heartbeat(beat);
        chunk.extend(write_completed(op, 4));
        chunk.extend(heartbeat(beat));

        let mut buffer = ReadBuffer::default();
        buffer.extend(&chunk).unwrap();

        let taken = buffer.take_for(op);
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].command, TcpCommand::WriteEventsCompleted);

        let rest = buffer.drain();
        assert_eq!(rest.len(), 2);
        assert!(rest
            .iter()
            .all(|p| p.message == InboundMessage::HeartbeatRequest));
    }

    #[test]
    fn test_unknown_command_is_fatal() {
        let mut bytes = heartbeat(Uuid::new_v4());
        bytes[LENGTH_PREFIX_SIZE] = 0x7E;

        let mut buffer = ReadBuffer::default();
        let err = buffer.extend(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCommand(0x7E)));
        assert_eq!(buffer.buffered(), 0);
        assert_eq!(buffer.ready_len(), 0);
    }

    #[test]
    fn test_error_keeps_packages_decoded_before_it() {
        let id = Uuid::new_v4();
        let mut corrupt = heartbeat(Uuid::new_v4());
        corrupt[LENGTH_PREFIX_SIZE] = 0x7E;
        let mut chunk = write_completed(id, 5);
        chunk.extend(corrupt);

        let mut buffer = ReadBuffer::default();
        assert!(buffer.extend(&chunk).is_err());
        assert_eq!(buffer.buffered(), 0);
        assert_eq!(buffer.ready_len(), 1);
        assert_eq!(buffer.next_package().unwrap().correlation_id, id);
    }

    #[test]
    fn test_outbound_command_is_fatal() {
        let bytes = Frame::empty(TcpCommand::ReadEvent, Uuid::new_v4())
            .encode()
            .unwrap();
        let mut buffer = ReadBuffer::default();
        assert!(matches!(
            buffer.extend(&bytes),
            Err(ProtocolError::UnhandledCommand(TcpCommand::ReadEvent))
        ));
    }

    #[test]
    fn test_clear() {
        let bytes = write_completed(Uuid::new_v4(), 1);
        let mut buffer = ReadBuffer::default();
        buffer.extend(&bytes[..9]).unwrap();
        buffer.clear();
        assert_eq!(buffer.buffered(), 0);
        assert_eq!(buffer.owed(), 0);

        buffer.extend(&bytes).unwrap();
        assert_eq!(buffer.ready_len(), 1);
    }

    proptest! {
        #[test]
        fn prop_arbitrary_chunking(
            count in 1usize..6,
            last in 0i64..1000,
            chunk_size in 1usize..64,
        ) {
            let ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
            let mut stream = Vec::new();
            for (i, id) in ids.iter().enumerate() {
                if i % 2 == 0 {
                    stream.extend(write_completed(*id, last));
                } else {
                    let confirmation = SubscriptionConfirmation {
                        last_commit_position: last,
                        last_event_number: Some(last),
                    };
                    let command = TcpCommand::SubscriptionConfirmation;
                    let frame = Frame::from_message(command, *id, &confirmation);
                    stream.extend(frame.encode().unwrap());
                }
            }

            let mut buffer = ReadBuffer::default();
            let mut decoded = 0;
            for chunk in stream.chunks(chunk_size) {
                decoded += buffer.extend(chunk).unwrap();
            }
            prop_assert_eq!(decoded, count);

            let order: Vec<Uuid> = buffer.drain().into_iter().map(|p| p.correlation_id).collect();
            prop_assert_eq!(order, ids);
            prop_assert_eq!(buffer.buffered(), 0);
        }
    }
}
