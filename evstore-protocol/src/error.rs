//! Protocol error types.

use crate::command::TcpCommand;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or message decoding.
///
/// Every variant is fatal for the frame it was raised on. When one surfaces
/// from the shared read buffer the connection can no longer trust its frame
/// boundaries and must be re-established.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("frame too short: {length} bytes (header needs {min})")]
    FrameTooShort { length: usize, min: usize },

    #[error("unknown command code: {0:#04x}")]
    UnknownCommand(u8),

    #[error("no decoder registered for command {0}")]
    UnhandledCommand(TcpCommand),

    #[error("invalid frame flags: {0:#04x}")]
    InvalidFlags(u8),

    #[error("{field} too long: {len} bytes (max 255)")]
    CredentialsTooLong { field: &'static str, len: usize },

    #[error("truncated frame: missing {0}")]
    Truncated(&'static str),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("invalid value {value} for {field}")]
    InvalidEnumValue { field: &'static str, value: i32 },

    #[error("invalid uuid: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}
