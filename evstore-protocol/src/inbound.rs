//! Typed server-to-client messages and the table that decodes them.

use crate::command::TcpCommand;
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::*;
use std::collections::HashMap;
use uuid::Uuid;

/// A decoded inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    HeartbeatRequest,
    HeartbeatResponse,
    Ping,
    Pong,
    WriteEventsCompleted(WriteEventsCompleted),
    TransactionStartCompleted(TransactionStartCompleted),
    TransactionWriteCompleted(TransactionWriteCompleted),
    TransactionCommitCompleted(TransactionCommitCompleted),
    DeleteStreamCompleted(DeleteStreamCompleted),
    ReadEventCompleted(ReadEventCompleted),
    /// Forward or backward; the package command tells which.
    ReadStreamEventsCompleted(ReadStreamEventsCompleted),
    ReadAllEventsCompleted(ReadAllEventsCompleted),
    SubscriptionConfirmation(SubscriptionConfirmation),
    StreamEventAppeared(StreamEventAppeared),
    SubscriptionDropped(SubscriptionDropped),
    PersistentSubscriptionConfirmation(PersistentSubscriptionConfirmation),
    PersistentSubscriptionStreamEventAppeared(PersistentSubscriptionStreamEventAppeared),
    CreatePersistentSubscriptionCompleted(CreatePersistentSubscriptionCompleted),
    UpdatePersistentSubscriptionCompleted(UpdatePersistentSubscriptionCompleted),
    DeletePersistentSubscriptionCompleted(DeletePersistentSubscriptionCompleted),
    BadRequest(String),
    NotHandled(NotHandled),
    Authenticated,
    NotAuthenticated(String),
    ClientIdentified,
}

/// An inbound message tagged with the frame it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundPackage {
    pub command: TcpCommand,
    pub correlation_id: Uuid,
    pub message: InboundMessage,
}

/// Decoder for one command's payload.
pub type PackageDecoder = fn(&Frame) -> Result<InboundMessage, ProtocolError>;

/// Maps inbound command codes to payload decoders.
///
/// Built once and handed to the [`ReadBuffer`](crate::ReadBuffer); there is
/// no global registry.
#[derive(Clone)]
pub struct DispatchTable {
    decoders: HashMap<TcpCommand, PackageDecoder>,
}

impl DispatchTable {
    /// Creates a table with a decoder for every server-to-client command.
    pub fn new() -> Self {
        use TcpCommand as C;

        let mut table = Self::empty();
        table.register(C::HeartbeatRequest, |_| Ok(InboundMessage::HeartbeatRequest));
        table.register(C::HeartbeatResponse, |_| Ok(InboundMessage::HeartbeatResponse));
        table.register(C::Ping, |_| Ok(InboundMessage::Ping));
        table.register(C::Pong, |_| Ok(InboundMessage::Pong));

        table.register(C::WriteEventsCompleted, |f| {
            Ok(InboundMessage::WriteEventsCompleted(f.decode_payload()?))
        });
        table.register(C::TransactionStartCompleted, |f| {
            Ok(InboundMessage::TransactionStartCompleted(f.decode_payload()?))
        });
        table.register(C::TransactionWriteCompleted, |f| {
            Ok(InboundMessage::TransactionWriteCompleted(f.decode_payload()?))
        });
        table.register(C::TransactionCommitCompleted, |f| {
            Ok(InboundMessage::TransactionCommitCompleted(f.decode_payload()?))
        });
        table.register(C::DeleteStreamCompleted, |f| {
            Ok(InboundMessage::DeleteStreamCompleted(f.decode_payload()?))
        });

        table.register(C::ReadEventCompleted, |f| {
            Ok(InboundMessage::ReadEventCompleted(f.decode_payload()?))
        });
        table.register(C::ReadStreamEventsForwardCompleted, |f| {
            Ok(InboundMessage::ReadStreamEventsCompleted(f.decode_payload()?))
        });
        table.register(C::ReadStreamEventsBackwardCompleted, |f| {
            Ok(InboundMessage::ReadStreamEventsCompleted(f.decode_payload()?))
        });
        table.register(C::ReadAllEventsForwardCompleted, |f| {
            Ok(InboundMessage::ReadAllEventsCompleted(f.decode_payload()?))
        });
        table.register(C::ReadAllEventsBackwardCompleted, |f| {
            Ok(InboundMessage::ReadAllEventsCompleted(f.decode_payload()?))
        });

        table.register(C::SubscriptionConfirmation, |f| {
            Ok(InboundMessage::SubscriptionConfirmation(f.decode_payload()?))
        });
        table.register(C::StreamEventAppeared, |f| {
            Ok(InboundMessage::StreamEventAppeared(f.decode_payload()?))
        });
        table.register(C::SubscriptionDropped, |f| {
            Ok(InboundMessage::SubscriptionDropped(f.decode_payload()?))
        });
        table.register(C::PersistentSubscriptionConfirmation, |f| {
            Ok(InboundMessage::PersistentSubscriptionConfirmation(
                f.decode_payload()?,
            ))
        });
        table.register(C::PersistentSubscriptionStreamEventAppeared, |f| {
            Ok(InboundMessage::PersistentSubscriptionStreamEventAppeared(
                f.decode_payload()?,
            ))
        });
        table.register(C::CreatePersistentSubscriptionCompleted, |f| {
            Ok(InboundMessage::CreatePersistentSubscriptionCompleted(
                f.decode_payload()?,
            ))
        });
        table.register(C::UpdatePersistentSubscriptionCompleted, |f| {
            Ok(InboundMessage::UpdatePersistentSubscriptionCompleted(
                f.decode_payload()?,
            ))
        });
        table.register(C::DeletePersistentSubscriptionCompleted, |f| {
            Ok(InboundMessage::DeletePersistentSubscriptionCompleted(
                f.decode_payload()?,
            ))
        });

        table.register(C::BadRequest, |f| {
            Ok(InboundMessage::BadRequest(lossy_text(f)))
        });
        table.register(C::NotHandled, |f| {
            Ok(InboundMessage::NotHandled(f.decode_payload()?))
        });
        table.register(C::Authenticated, |_| Ok(InboundMessage::Authenticated));
        table.register(C::NotAuthenticated, |f| {
            Ok(InboundMessage::NotAuthenticated(lossy_text(f)))
        });
        table.register(C::ClientIdentified, |_| Ok(InboundMessage::ClientIdentified));
        table
    }

    /// Creates a table with no decoders.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Adds or replaces the decoder for `command`.
    pub fn register(&mut self, command: TcpCommand, decoder: PackageDecoder) {
        self.decoders.insert(command, decoder);
    }

    pub fn handles(&self, command: TcpCommand) -> bool {
        self.decoders.contains_key(&command)
    }

    /// Decodes a frame into a correlated package.
    pub fn decode(&self, frame: &Frame) -> Result<InboundPackage, ProtocolError> {
        let decoder = self
            .decoders
            .get(&frame.command)
            .ok_or(ProtocolError::UnhandledCommand(frame.command))?;
        Ok(InboundPackage {
            command: frame.command,
            correlation_id: frame.correlation_id,
            message: decoder(frame)?,
        })
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut commands: Vec<_> = self.decoders.keys().collect();
        commands.sort();
        f.debug_struct("DispatchTable")
            .field("commands", &commands)
            .finish()
    }
}

fn lossy_text(frame: &Frame) -> String {
    String::from_utf8_lossy(&frame.payload).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_decode_write_completed() {
        let id = Uuid::new_v4();
        let reply = WriteEventsCompleted {
            result: OperationResult::Success as i32,
            message: None,
            first_event_number: 0,
            last_event_number: 2,
            prepare_position: Some(100),
            commit_position: Some(100),
            current_version: None,
        };
        let frame = Frame::from_message(TcpCommand::WriteEventsCompleted, id, &reply);

        let package = DispatchTable::new().decode(&frame).unwrap();
        assert_eq!(package.correlation_id, id);
        assert_eq!(package.command, TcpCommand::WriteEventsCompleted);
        assert_eq!(package.message, InboundMessage::WriteEventsCompleted(reply));
    }

    #[test]
    fn test_decode_bad_request_text() {
        let frame = Frame::new(
            TcpCommand::BadRequest,
            Uuid::new_v4(),
            Bytes::from_static(b"stream name required"),
        );
        let package = DispatchTable::new().decode(&frame).unwrap();
        assert_eq!(
            package.message,
            InboundMessage::BadRequest("stream name required".to_string())
        );
    }

    #[test]
    fn test_outbound_command_not_handled() {
        let frame = Frame::empty(TcpCommand::WriteEvents, Uuid::new_v4());
        let err = DispatchTable::new().decode(&frame).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnhandledCommand(TcpCommand::WriteEvents)
        ));
    }

    #[test]
    fn test_register_replaces_decoder() {
        let mut table = DispatchTable::empty();
        assert!(!table.handles(TcpCommand::Pong));

        table.register(TcpCommand::Pong, |_| Ok(InboundMessage::HeartbeatResponse));
        let frame = Frame::empty(TcpCommand::Pong, Uuid::new_v4());
        assert_eq!(
            table.decode(&frame).unwrap().message,
            InboundMessage::HeartbeatResponse
        );
    }

    #[test]
    fn test_malformed_payload() {
        let frame = Frame::new(
            TcpCommand::ReadEventCompleted,
            Uuid::new_v4(),
            Bytes::from_static(&[0xFF, 0xFF, 0xFF]),
        );
        assert!(matches!(
            DispatchTable::new().decode(&frame),
            Err(ProtocolError::Decode(_))
        ));
    }
}
