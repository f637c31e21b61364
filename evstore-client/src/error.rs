//! Client error types.

use crate::subscription::DropReason;
use evstore_protocol::{ProtocolError, TcpCommand};
use thiserror::Error;
use uuid::Uuid;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    // Protocol faults
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected command {command} for {operation}")]
    UnexpectedCommand {
        operation: &'static str,
        command: TcpCommand,
    },

    #[error("unexpected result {result} for {operation}")]
    UnexpectedResult {
        operation: &'static str,
        result: String,
    },

    // Rejections reported by the server
    #[error("wrong expected version for stream '{stream}': expected {expected}")]
    WrongExpectedVersion {
        stream: String,
        expected: i64,
        current: Option<i64>,
    },

    #[error("stream '{0}' is deleted")]
    StreamDeleted(String),

    #[error("invalid transaction")]
    InvalidTransaction,

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("persistent subscription '{group}' on '{stream}' already exists")]
    PersistentSubscriptionAlreadyExists { stream: String, group: String },

    #[error("persistent subscription '{group}' on '{stream}' does not exist")]
    PersistentSubscriptionDoesNotExist { stream: String, group: String },

    #[error("persistent subscription '{group}' on '{stream}' failed: {reason}")]
    PersistentSubscriptionFailed {
        stream: String,
        group: String,
        reason: String,
    },

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("server error: {0}")]
    ServerError(String),

    // Transient
    #[error("{operation} gave up after {attempts} attempts")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
    },

    #[error("operation timeout")]
    Timeout,

    // Transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("no heartbeat from server")]
    HeartbeatTimeout,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    // Subscriptions
    #[error("subscription dropped: {0}")]
    SubscriptionDropped(DropReason),

    // Misuse
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("correlation id {0} is already registered")]
    DuplicateCorrelationId(Uuid),

    #[error("transaction {0} is already completed")]
    TransactionCompleted(i64),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns whether retrying the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Timeout
                | ClientError::RetriesExhausted { .. }
                | ClientError::NotConnected
                | ClientError::ConnectionClosed
                | ClientError::HeartbeatTimeout
        )
    }

    /// Returns whether this error means the server did not answer in time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout
                | ClientError::RetriesExhausted { .. }
                | ClientError::HeartbeatTimeout
        )
    }
}
