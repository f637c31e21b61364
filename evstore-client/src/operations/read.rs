use crate::error::ClientError;
use crate::operation::{OperationSpec, ResponseStatus};
use crate::types::{
    AllEventsSlice, EventReadResult, EventReadStatus, Position, ReadDirection, ResolvedEvent,
    SliceReadStatus, StreamEventsSlice,
};
use evstore_protocol::message::{
    self, enum_value, ReadAllEventsCompleted, ReadAllResult, ReadEventCompleted, ReadEventResult,
    ReadStreamEventsCompleted, ReadStreamResult,
};
use evstore_protocol::{InboundMessage, TcpCommand};

fn access_denied(stream: &str) -> ClientError {
    ClientError::AccessDenied(format!("read from stream '{}'", stream))
}

fn server_error(error: &Option<String>) -> ClientError {
    ClientError::ServerError(
        error
            .clone()
            .unwrap_or_else(|| "read failed".to_string()),
    )
}

/// Reads a single event.
pub struct ReadEvent {
    stream: String,
    event_number: i64,
    resolve_link_tos: bool,
    require_master: bool,
}

impl ReadEvent {
    pub fn new(
        stream: impl Into<String>,
        event_number: i64,
        resolve_link_tos: bool,
        require_master: bool,
    ) -> Self {
        Self {
            stream: stream.into(),
            event_number,
            resolve_link_tos,
            require_master,
        }
    }
}

impl OperationSpec for ReadEvent {
    type Request = message::ReadEvent;
    type Response = ReadEventCompleted;
    type Output = EventReadResult;

    fn name(&self) -> &'static str {
        "ReadEvent"
    }

    fn request_command(&self) -> TcpCommand {
        TcpCommand::ReadEvent
    }

    fn response_command(&self) -> TcpCommand {
        TcpCommand::ReadEventCompleted
    }

    fn request(&self) -> message::ReadEvent {
        message::ReadEvent {
            event_stream_id: self.stream.clone(),
            event_number: self.event_number,
            resolve_link_tos: self.resolve_link_tos,
            require_master: self.require_master,
        }
    }

    fn extract(message: InboundMessage) -> Option<ReadEventCompleted> {
        match message {
            InboundMessage::ReadEventCompleted(completed) => Some(completed),
            _ => None,
        }
    }

    fn inspect_response(&self, response: &ReadEventCompleted) -> ResponseStatus {
        match enum_value::<ReadEventResult>("ReadEventResult", response.result) {
            Ok(
                ReadEventResult::Success
                | ReadEventResult::NotFound
                | ReadEventResult::NoStream
                | ReadEventResult::StreamDeleted,
            ) => ResponseStatus::Success,
            Ok(ReadEventResult::Error) => ResponseStatus::Fail(server_error(&response.error)),
            Ok(ReadEventResult::AccessDenied) => ResponseStatus::Fail(access_denied(&self.stream)),
            Err(err) => ResponseStatus::Fail(err.into()),
        }
    }

    fn transform_response(
        &self,
        response: ReadEventCompleted,
    ) -> Result<EventReadResult, ClientError> {
        let status = match enum_value::<ReadEventResult>("ReadEventResult", response.result)? {
            ReadEventResult::Success => EventReadStatus::Success,
            ReadEventResult::NotFound => EventReadStatus::NotFound,
            ReadEventResult::NoStream => EventReadStatus::NoStream,
            ReadEventResult::StreamDeleted => EventReadStatus::StreamDeleted,
            other => {
                return Err(ClientError::UnexpectedResult {
                    operation: "ReadEvent",
                    result: format!("{:?}", other),
                })
            }
        };
        let event = match status {
            EventReadStatus::Success => Some(ResolvedEvent::from_indexed(response.event)?),
            _ => None,
        };
        Ok(EventReadResult {
            status,
            stream: self.stream.clone(),
            event_number: self.event_number,
            event,
        })
    }
}

/// Reads one page of a stream in either direction.
pub struct ReadStreamEvents {
    stream: String,
    from_event_number: i64,
    max_count: i32,
    direction: ReadDirection,
    resolve_link_tos: bool,
    require_master: bool,
}

impl ReadStreamEvents {
    pub fn new(
        stream: impl Into<String>,
        from_event_number: i64,
        max_count: i32,
        direction: ReadDirection,
        resolve_link_tos: bool,
        require_master: bool,
    ) -> Self {
        Self {
            stream: stream.into(),
            from_event_number,
            max_count,
            direction,
            resolve_link_tos,
            require_master,
        }
    }
}

impl OperationSpec for ReadStreamEvents {
    type Request = message::ReadStreamEvents;
    type Response = ReadStreamEventsCompleted;
    type Output = StreamEventsSlice;

    fn name(&self) -> &'static str {
        match self.direction {
            ReadDirection::Forward => "ReadStreamEventsForward",
            ReadDirection::Backward => "ReadStreamEventsBackward",
        }
    }

    fn request_command(&self) -> TcpCommand {
        match self.direction {
            ReadDirection::Forward => TcpCommand::ReadStreamEventsForward,
            ReadDirection::Backward => TcpCommand::ReadStreamEventsBackward,
        }
    }

    fn response_command(&self) -> TcpCommand {
        match self.direction {
            ReadDirection::Forward => TcpCommand::ReadStreamEventsForwardCompleted,
            ReadDirection::Backward => TcpCommand::ReadStreamEventsBackwardCompleted,
        }
    }

    fn request(&self) -> message::ReadStreamEvents {
        message::ReadStreamEvents {
            event_stream_id: self.stream.clone(),
            from_event_number: self.from_event_number,
            max_count: self.max_count,
            resolve_link_tos: self.resolve_link_tos,
            require_master: self.require_master,
        }
    }

    fn extract(message: InboundMessage) -> Option<ReadStreamEventsCompleted> {
        match message {
            InboundMessage::ReadStreamEventsCompleted(completed) => Some(completed),
            _ => None,
        }
    }

    fn inspect_response(&self, response: &ReadStreamEventsCompleted) -> ResponseStatus {
        match enum_value::<ReadStreamResult>("ReadStreamResult", response.result) {
            Ok(
                ReadStreamResult::Success
                | ReadStreamResult::NoStream
                | ReadStreamResult::StreamDeleted,
            ) => ResponseStatus::Success,
            Ok(ReadStreamResult::NotModified) => {
                ResponseStatus::Fail(ClientError::UnexpectedResult {
                    operation: self.name(),
                    result: "NotModified".to_string(),
                })
            }
            Ok(ReadStreamResult::Error) => ResponseStatus::Fail(server_error(&response.error)),
            Ok(ReadStreamResult::AccessDenied) => ResponseStatus::Fail(access_denied(&self.stream)),
            Err(err) => ResponseStatus::Fail(err.into()),
        }
    }

    fn transform_response(
        &self,
        response: ReadStreamEventsCompleted,
    ) -> Result<StreamEventsSlice, ClientError> {
        let status = match enum_value::<ReadStreamResult>("ReadStreamResult", response.result)? {
            ReadStreamResult::Success => SliceReadStatus::Success,
            ReadStreamResult::NoStream => SliceReadStatus::StreamNotFound,
            ReadStreamResult::StreamDeleted => SliceReadStatus::StreamDeleted,
            other => {
                return Err(ClientError::UnexpectedResult {
                    operation: self.name(),
                    result: format!("{:?}", other),
                })
            }
        };
        let events = response
            .events
            .into_iter()
            .map(ResolvedEvent::from_indexed)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StreamEventsSlice {
            status,
            stream: self.stream.clone(),
            from_event_number: self.from_event_number,
            direction: self.direction,
            events,
            next_event_number: response.next_event_number,
            last_event_number: response.last_event_number,
            is_end_of_stream: response.is_end_of_stream,
        })
    }
}

/// Reads one page of `$all` in either direction.
pub struct ReadAllEvents {
    position: Position,
    max_count: i32,
    direction: ReadDirection,
    resolve_link_tos: bool,
    require_master: bool,
}

impl ReadAllEvents {
    pub fn new(
        position: Position,
        max_count: i32,
        direction: ReadDirection,
        resolve_link_tos: bool,
        require_master: bool,
    ) -> Self {
        Self {
            position,
            max_count,
            direction,
            resolve_link_tos,
            require_master,
        }
    }

    fn result(response: &ReadAllEventsCompleted) -> Result<ReadAllResult, ClientError> {
        match response.result {
            None => Ok(ReadAllResult::Success),
            Some(raw) => Ok(enum_value("ReadAllResult", raw)?),
        }
    }
}

impl OperationSpec for ReadAllEvents {
    type Request = message::ReadAllEvents;
    type Response = ReadAllEventsCompleted;
    type Output = AllEventsSlice;

    fn name(&self) -> &'static str {
        match self.direction {
            ReadDirection::Forward => "ReadAllEventsForward",
            ReadDirection::Backward => "ReadAllEventsBackward",
        }
    }

    fn request_command(&self) -> TcpCommand {
        match self.direction {
            ReadDirection::Forward => TcpCommand::ReadAllEventsForward,
            ReadDirection::Backward => TcpCommand::ReadAllEventsBackward,
        }
    }

    fn response_command(&self) -> TcpCommand {
        match self.direction {
            ReadDirection::Forward => TcpCommand::ReadAllEventsForwardCompleted,
            ReadDirection::Backward => TcpCommand::ReadAllEventsBackwardCompleted,
        }
    }

    fn request(&self) -> message::ReadAllEvents {
        message::ReadAllEvents {
            commit_position: self.position.commit,
            prepare_position: self.position.prepare,
            max_count: self.max_count,
            resolve_link_tos: self.resolve_link_tos,
            require_master: self.require_master,
        }
    }

    fn extract(message: InboundMessage) -> Option<ReadAllEventsCompleted> {
        match message {
            InboundMessage::ReadAllEventsCompleted(completed) => Some(completed),
            _ => None,
        }
    }

    fn inspect_response(&self, response: &ReadAllEventsCompleted) -> ResponseStatus {
        match Self::result(response) {
            Ok(ReadAllResult::Success) => ResponseStatus::Success,
            Ok(ReadAllResult::NotModified) => ResponseStatus::Fail(ClientError::UnexpectedResult {
                operation: self.name(),
                result: "NotModified".to_string(),
            }),
            Ok(ReadAllResult::Error) => ResponseStatus::Fail(server_error(&response.error)),
            Ok(ReadAllResult::AccessDenied) => ResponseStatus::Fail(access_denied("$all")),
            Err(err) => ResponseStatus::Fail(err),
        }
    }

    fn transform_response(
        &self,
        response: ReadAllEventsCompleted,
    ) -> Result<AllEventsSlice, ClientError> {
        let events = response
            .events
            .into_iter()
            .map(ResolvedEvent::from_all)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AllEventsSlice {
            direction: self.direction,
            from_position: Position::new(response.commit_position, response.prepare_position),
            next_position: Position::new(
                response.next_commit_position,
                response.next_prepare_position,
            ),
            events,
        })
    }
}
