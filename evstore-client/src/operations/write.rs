use crate::error::ClientError;
use crate::operation::{map_operation_result, OperationSpec, ResponseStatus};
use crate::types::{DeleteResult, EventData, ExpectedVersion, Position, WriteResult};
use evstore_protocol::message::{
    self, DeleteStreamCompleted, NewEvent, TransactionCommitCompleted, TransactionStartCompleted,
    TransactionWriteCompleted, WriteEvents, WriteEventsCompleted,
};
use evstore_protocol::{InboundMessage, TcpCommand};

fn log_position(commit: Option<i64>, prepare: Option<i64>) -> Position {
    Position::new(commit.unwrap_or(-1), prepare.unwrap_or(-1))
}

/// Appends events to a stream.
pub struct AppendToStream {
    stream: String,
    expected_version: ExpectedVersion,
    events: Vec<NewEvent>,
    require_master: bool,
}

impl AppendToStream {
    pub fn new(
        stream: impl Into<String>,
        expected_version: ExpectedVersion,
        events: &[EventData],
        require_master: bool,
    ) -> Self {
        Self {
            stream: stream.into(),
            expected_version,
            events: events.iter().map(EventData::to_new_event).collect(),
            require_master,
        }
    }
}

impl OperationSpec for AppendToStream {
    type Request = WriteEvents;
    type Response = WriteEventsCompleted;
    type Output = WriteResult;

    fn name(&self) -> &'static str {
        "AppendToStream"
    }

    fn request_command(&self) -> TcpCommand {
        TcpCommand::WriteEvents
    }

    fn response_command(&self) -> TcpCommand {
        TcpCommand::WriteEventsCompleted
    }

    fn request(&self) -> WriteEvents {
        WriteEvents {
            event_stream_id: self.stream.clone(),
            expected_version: self.expected_version.as_raw(),
            events: self.events.clone(),
            require_master: self.require_master,
        }
    }

    fn extract(message: InboundMessage) -> Option<WriteEventsCompleted> {
        match message {
            InboundMessage::WriteEventsCompleted(completed) => Some(completed),
            _ => None,
        }
    }

    fn inspect_response(&self, response: &WriteEventsCompleted) -> ResponseStatus {
        map_operation_result(
            response.result,
            &self.stream,
            self.expected_version.as_raw(),
            response.current_version,
        )
    }

    fn transform_response(
        &self,
        response: WriteEventsCompleted,
    ) -> Result<WriteResult, ClientError> {
        Ok(WriteResult {
            next_expected_version: response.last_event_number,
            log_position: log_position(response.commit_position, response.prepare_position),
        })
    }
}

/// Deletes a stream, optionally for good.
pub struct DeleteStream {
    stream: String,
    expected_version: ExpectedVersion,
    hard_delete: bool,
    require_master: bool,
}

impl DeleteStream {
    pub fn new(
        stream: impl Into<String>,
        expected_version: ExpectedVersion,
        hard_delete: bool,
        require_master: bool,
    ) -> Self {
        Self {
            stream: stream.into(),
            expected_version,
            hard_delete,
            require_master,
        }
    }
}

impl OperationSpec for DeleteStream {
    type Request = message::DeleteStream;
    type Response = DeleteStreamCompleted;
    type Output = DeleteResult;

    fn name(&self) -> &'static str {
        "DeleteStream"
    }

    fn request_command(&self) -> TcpCommand {
        TcpCommand::DeleteStream
    }

    fn response_command(&self) -> TcpCommand {
        TcpCommand::DeleteStreamCompleted
    }

    fn request(&self) -> message::DeleteStream {
        message::DeleteStream {
            event_stream_id: self.stream.clone(),
            expected_version: self.expected_version.as_raw(),
            require_master: self.require_master,
            hard_delete: Some(self.hard_delete),
        }
    }

    fn extract(message: InboundMessage) -> Option<DeleteStreamCompleted> {
        match message {
            InboundMessage::DeleteStreamCompleted(completed) => Some(completed),
            _ => None,
        }
    }

    fn inspect_response(&self, response: &DeleteStreamCompleted) -> ResponseStatus {
        map_operation_result(
            response.result,
            &self.stream,
            self.expected_version.as_raw(),
            None,
        )
    }

    fn transform_response(
        &self,
        response: DeleteStreamCompleted,
    ) -> Result<DeleteResult, ClientError> {
        Ok(DeleteResult {
            log_position: log_position(response.commit_position, response.prepare_position),
        })
    }
}

/// Opens a multi-request transaction; yields its server-assigned id.
pub struct StartTransaction {
    stream: String,
    expected_version: ExpectedVersion,
    require_master: bool,
}

impl StartTransaction {
    pub fn new(
        stream: impl Into<String>,
        expected_version: ExpectedVersion,
        require_master: bool,
    ) -> Self {
        Self {
            stream: stream.into(),
            expected_version,
            require_master,
        }
    }
}

impl OperationSpec for StartTransaction {
    type Request = message::TransactionStart;
    type Response = TransactionStartCompleted;
    type Output = i64;

    fn name(&self) -> &'static str {
        "StartTransaction"
    }

    fn request_command(&self) -> TcpCommand {
        TcpCommand::TransactionStart
    }

    fn response_command(&self) -> TcpCommand {
        TcpCommand::TransactionStartCompleted
    }

    fn request(&self) -> message::TransactionStart {
        message::TransactionStart {
            event_stream_id: self.stream.clone(),
            expected_version: self.expected_version.as_raw(),
            require_master: self.require_master,
        }
    }

    fn extract(message: InboundMessage) -> Option<TransactionStartCompleted> {
        match message {
            InboundMessage::TransactionStartCompleted(completed) => Some(completed),
            _ => None,
        }
    }

    fn inspect_response(&self, response: &TransactionStartCompleted) -> ResponseStatus {
        map_operation_result(
            response.result,
            &self.stream,
            self.expected_version.as_raw(),
            None,
        )
    }

    fn transform_response(&self, response: TransactionStartCompleted) -> Result<i64, ClientError> {
        Ok(response.transaction_id)
    }
}

/// Adds events to an open transaction.
pub struct TransactionalWrite {
    transaction_id: i64,
    stream: String,
    expected_version: ExpectedVersion,
    events: Vec<NewEvent>,
    require_master: bool,
}

impl TransactionalWrite {
    pub fn new(
        transaction_id: i64,
        stream: impl Into<String>,
        expected_version: ExpectedVersion,
        events: &[EventData],
        require_master: bool,
    ) -> Self {
        Self {
            transaction_id,
            stream: stream.into(),
            expected_version,
            events: events.iter().map(EventData::to_new_event).collect(),
            require_master,
        }
    }
}

impl OperationSpec for TransactionalWrite {
    type Request = message::TransactionWrite;
    type Response = TransactionWriteCompleted;
    type Output = ();

    fn name(&self) -> &'static str {
        "TransactionalWrite"
    }

    fn request_command(&self) -> TcpCommand {
        TcpCommand::TransactionWrite
    }

    fn response_command(&self) -> TcpCommand {
        TcpCommand::TransactionWriteCompleted
    }

    fn request(&self) -> message::TransactionWrite {
        message::TransactionWrite {
            transaction_id: self.transaction_id,
            events: self.events.clone(),
            require_master: self.require_master,
        }
    }

    fn extract(message: InboundMessage) -> Option<TransactionWriteCompleted> {
        match message {
            InboundMessage::TransactionWriteCompleted(completed) => Some(completed),
            _ => None,
        }
    }

    fn inspect_response(&self, response: &TransactionWriteCompleted) -> ResponseStatus {
        map_operation_result(
            response.result,
            &self.stream,
            self.expected_version.as_raw(),
            None,
        )
    }

    fn transform_response(&self, _: TransactionWriteCompleted) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Commits an open transaction.
pub struct CommitTransaction {
    transaction_id: i64,
    stream: String,
    expected_version: ExpectedVersion,
    require_master: bool,
}

impl CommitTransaction {
    pub fn new(
        transaction_id: i64,
        stream: impl Into<String>,
        expected_version: ExpectedVersion,
        require_master: bool,
    ) -> Self {
        Self {
            transaction_id,
            stream: stream.into(),
            expected_version,
            require_master,
        }
    }
}

impl OperationSpec for CommitTransaction {
    type Request = message::TransactionCommit;
    type Response = TransactionCommitCompleted;
    type Output = WriteResult;

    fn name(&self) -> &'static str {
        "CommitTransaction"
    }

    fn request_command(&self) -> TcpCommand {
        TcpCommand::TransactionCommit
    }

    fn response_command(&self) -> TcpCommand {
        TcpCommand::TransactionCommitCompleted
    }

    fn request(&self) -> message::TransactionCommit {
        message::TransactionCommit {
            transaction_id: self.transaction_id,
            require_master: self.require_master,
        }
    }

    fn extract(message: InboundMessage) -> Option<TransactionCommitCompleted> {
        match message {
            InboundMessage::TransactionCommitCompleted(completed) => Some(completed),
            _ => None,
        }
    }

    fn inspect_response(&self, response: &TransactionCommitCompleted) -> ResponseStatus {
        map_operation_result(
            response.result,
            &self.stream,
            self.expected_version.as_raw(),
            None,
        )
    }

    fn transform_response(
        &self,
        response: TransactionCommitCompleted,
    ) -> Result<WriteResult, ClientError> {
        Ok(WriteResult {
            next_expected_version: response.last_event_number,
            log_position: log_position(response.commit_position, response.prepare_position),
        })
    }
}
