use crate::error::ClientError;
use crate::operation::{OperationSpec, ResponseStatus};
use evstore_protocol::{InboundMessage, TcpCommand};

/// Round trip with an empty payload.
pub struct Ping;

impl OperationSpec for Ping {
    type Request = ();
    type Response = ();
    type Output = ();

    fn name(&self) -> &'static str {
        "Ping"
    }

    fn request_command(&self) -> TcpCommand {
        TcpCommand::Ping
    }

    fn response_command(&self) -> TcpCommand {
        TcpCommand::Pong
    }

    fn request(&self) {}

    fn extract(message: InboundMessage) -> Option<()> {
        match message {
            InboundMessage::Pong => Some(()),
            _ => None,
        }
    }

    fn inspect_response(&self, _: &()) -> ResponseStatus {
        ResponseStatus::Success
    }

    fn transform_response(&self, _: ()) -> Result<(), ClientError> {
        Ok(())
    }
}
