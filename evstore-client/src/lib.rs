//! # evstore-client
//!
//! Async client for an evstore server over its binary TCP protocol.
//!
//! Every request carries a correlation id. One connection multiplexes
//! concurrent one-shot operations and long-lived subscriptions; replies
//! are routed back to their operation by that id.
//!
//! ```no_run
//! use evstore_client::{Client, ConnectionConfig, EventData, ExpectedVersion};
//!
//! # async fn run() -> Result<(), evstore_client::ClientError> {
//! let client = Client::new(ConnectionConfig::new("127.0.0.1:1113".parse().unwrap()));
//! client.connect().await?;
//!
//! let event = EventData::json("OrderPlaced", &serde_json::json!({ "total": 42 }))?;
//! client
//!     .append_to_stream("orders-1", ExpectedVersion::Any, &[event], None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod catchup;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod metadata;
pub mod operation;
pub mod operations;
pub mod stream;
pub mod subscription;
mod tls;
pub mod types;

pub use catchup::{CatchUpSettings, CatchUpSubscription};
pub use client::{Client, Transaction};
pub use config::{ClientSettings, ConfigError, CredentialSettings};
pub use connection::{Connection, ConnectionConfig, TlsClientConfig};
pub use dispatcher::RetryPolicy;
pub use error::ClientError;
pub use evstore_protocol::message::NakAction;
pub use evstore_protocol::Credentials;
pub use metadata::{StreamAcl, StreamMetadata, StreamMetadataResult};
pub use subscription::{
    AcknowledgeableEvent, Acknowledger, DropReason, PersistentSubscription, SubscriptionDropped,
    SubscriptionState, VolatileSubscription,
};
pub use types::{
    AllEventsSlice, DeleteResult, EventData, EventReadResult, EventReadStatus, ExpectedVersion,
    PersistentSubscriptionSettings, Position, ReadDirection, RecordedEvent, ResolvedEvent,
    SliceReadStatus, StreamEventsSlice, StreamPosition, SystemConsumerStrategy, WriteResult,
};
