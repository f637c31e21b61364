//! Client-side events, positions and result types.

use crate::error::ClientError;
use chrono::{DateTime, Utc};
use evstore_protocol::message::{self, EventRecord, NewEvent, ResolvedIndexedEvent};
use evstore_protocol::ProtocolError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Largest page the server accepts for a single read.
pub const MAX_READ_SIZE: usize = 4096;

const CONTENT_TYPE_BINARY: i32 = 0;
const CONTENT_TYPE_JSON: i32 = 1;

// ============================================================================
// Versions and positions
// ============================================================================

/// Optimistic concurrency check for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedVersion {
    /// No check.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream must exist, at any version.
    StreamExists,
    /// The last event in the stream must have this number.
    Exact(i64),
}

impl ExpectedVersion {
    pub const ANY: i64 = -2;
    pub const NO_STREAM: i64 = -1;
    pub const STREAM_EXISTS: i64 = -4;

    /// Wire value.
    pub fn as_raw(self) -> i64 {
        match self {
            ExpectedVersion::Any => Self::ANY,
            ExpectedVersion::NoStream => Self::NO_STREAM,
            ExpectedVersion::StreamExists => Self::STREAM_EXISTS,
            ExpectedVersion::Exact(version) => version,
        }
    }
}

impl From<i64> for ExpectedVersion {
    fn from(raw: i64) -> Self {
        match raw {
            Self::ANY => ExpectedVersion::Any,
            Self::NO_STREAM => ExpectedVersion::NoStream,
            Self::STREAM_EXISTS => ExpectedVersion::StreamExists,
            version => ExpectedVersion::Exact(version),
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::NoStream => write!(f, "no stream"),
            ExpectedVersion::StreamExists => write!(f, "stream exists"),
            ExpectedVersion::Exact(version) => write!(f, "{}", version),
        }
    }
}

/// Well-known event numbers for stream reads.
pub struct StreamPosition;

impl StreamPosition {
    pub const START: i64 = 0;
    pub const END: i64 = -1;
}

/// A position in the transaction file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub commit: i64,
    pub prepare: i64,
}

impl Position {
    pub const START: Position = Position {
        commit: 0,
        prepare: 0,
    };
    pub const END: Position = Position {
        commit: -1,
        prepare: -1,
    };

    pub fn new(commit: i64, prepare: i64) -> Self {
        Self { commit, prepare }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C:{}/P:{}", self.commit, self.prepare)
    }
}

/// Read direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadDirection {
    Forward,
    Backward,
}

// ============================================================================
// Events
// ============================================================================

/// An event to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub event_id: Uuid,
    pub event_type: String,
    pub is_json: bool,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl EventData {
    /// Creates a JSON event with a fresh id.
    pub fn json<T: Serialize>(
        event_type: impl Into<String>,
        data: &T,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            is_json: true,
            data: serde_json::to_vec(data)?,
            metadata: Vec::new(),
        })
    }

    /// Creates a binary event with a fresh id.
    pub fn binary(event_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            is_json: false,
            data: data.into(),
            metadata: Vec::new(),
        }
    }

    pub fn with_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn with_json_metadata<T: Serialize>(mut self, metadata: &T) -> Result<Self, ClientError> {
        self.metadata = serde_json::to_vec(metadata)?;
        Ok(self)
    }

    pub(crate) fn to_new_event(&self) -> NewEvent {
        let content_type = if self.is_json {
            CONTENT_TYPE_JSON
        } else {
            CONTENT_TYPE_BINARY
        };
        NewEvent {
            event_id: self.event_id.as_bytes().to_vec(),
            event_type: self.event_type.clone(),
            data_content_type: content_type,
            metadata_content_type: content_type,
            data: self.data.clone(),
            metadata: if self.metadata.is_empty() {
                None
            } else {
                Some(self.metadata.clone())
            },
        }
    }
}

/// An event as stored by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub stream_id: String,
    pub event_id: Uuid,
    pub event_number: i64,
    pub event_type: String,
    pub is_json: bool,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
    pub created: Option<DateTime<Utc>>,
}

impl RecordedEvent {
    /// Deserializes the event data as JSON.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

impl TryFrom<EventRecord> for RecordedEvent {
    type Error = ProtocolError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            event_id: Uuid::from_slice(&record.event_id)?,
            created: record
                .created_epoch
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            stream_id: record.event_stream_id,
            event_number: record.event_number,
            event_type: record.event_type,
            is_json: record.data_content_type == CONTENT_TYPE_JSON,
            data: record.data,
            metadata: record.metadata.unwrap_or_default(),
        })
    }
}

/// An event together with the link that pointed at it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEvent {
    pub event: Option<RecordedEvent>,
    pub link: Option<RecordedEvent>,
    /// Only set for reads and subscriptions over `$all`.
    pub position: Option<Position>,
}

impl ResolvedEvent {
    pub(crate) fn from_indexed(resolved: ResolvedIndexedEvent) -> Result<Self, ProtocolError> {
        Ok(Self {
            event: resolved.event.map(RecordedEvent::try_from).transpose()?,
            link: resolved.link.map(RecordedEvent::try_from).transpose()?,
            position: None,
        })
    }

    pub(crate) fn from_all(resolved: message::ResolvedEvent) -> Result<Self, ProtocolError> {
        Ok(Self {
            event: resolved.event.map(RecordedEvent::try_from).transpose()?,
            link: resolved.link.map(RecordedEvent::try_from).transpose()?,
            position: Some(Position::new(
                resolved.commit_position,
                resolved.prepare_position,
            )),
        })
    }

    /// The record that was actually read: the link when present, else the event.
    pub fn original_event(&self) -> Option<&RecordedEvent> {
        self.link.as_ref().or(self.event.as_ref())
    }

    pub fn is_resolved(&self) -> bool {
        self.link.is_some() && self.event.is_some()
    }

    pub fn original_stream_id(&self) -> Option<&str> {
        self.original_event().map(|e| e.stream_id.as_str())
    }

    pub fn original_event_number(&self) -> Option<i64> {
        self.original_event().map(|e| e.event_number)
    }

    /// Id used to acknowledge this event in a persistent subscription.
    pub fn ack_id(&self) -> Option<Uuid> {
        self.original_event().map(|e| e.event_id)
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub next_expected_version: i64,
    pub log_position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    pub log_position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventReadStatus {
    Success,
    NotFound,
    NoStream,
    StreamDeleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventReadResult {
    pub status: EventReadStatus,
    pub stream: String,
    pub event_number: i64,
    pub event: Option<ResolvedEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceReadStatus {
    Success,
    StreamNotFound,
    StreamDeleted,
}

/// A page of events from one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEventsSlice {
    pub status: SliceReadStatus,
    pub stream: String,
    pub from_event_number: i64,
    pub direction: ReadDirection,
    pub events: Vec<ResolvedEvent>,
    pub next_event_number: i64,
    pub last_event_number: i64,
    pub is_end_of_stream: bool,
}

/// A page of events from `$all`.
#[derive(Debug, Clone, PartialEq)]
pub struct AllEventsSlice {
    pub direction: ReadDirection,
    pub from_position: Position,
    pub next_position: Position,
    pub events: Vec<ResolvedEvent>,
}

impl AllEventsSlice {
    pub fn is_end_of_stream(&self) -> bool {
        self.events.is_empty()
    }
}

// ============================================================================
// Persistent subscription settings
// ============================================================================

/// How a persistent subscription group spreads events over its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemConsumerStrategy {
    DispatchToSingle,
    RoundRobin,
    Pinned,
}

impl SystemConsumerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemConsumerStrategy::DispatchToSingle => "DispatchToSingle",
            SystemConsumerStrategy::RoundRobin => "RoundRobin",
            SystemConsumerStrategy::Pinned => "Pinned",
        }
    }
}

impl std::str::FromStr for SystemConsumerStrategy {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DispatchToSingle" => Ok(SystemConsumerStrategy::DispatchToSingle),
            "RoundRobin" => Ok(SystemConsumerStrategy::RoundRobin),
            "Pinned" => Ok(SystemConsumerStrategy::Pinned),
            other => Err(ClientError::InvalidArgument(format!(
                "unknown consumer strategy '{}'",
                other
            ))),
        }
    }
}

/// Settings of a persistent subscription group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentSubscriptionSettings {
    pub resolve_link_tos: bool,
    /// Event number to start from; -1 starts at the current end.
    pub start_from: i64,
    pub extra_statistics: bool,
    pub message_timeout: Duration,
    pub max_retry_count: i32,
    pub live_buffer_size: i32,
    pub read_batch_size: i32,
    pub history_buffer_size: i32,
    pub checkpoint_after: Duration,
    pub min_checkpoint_count: i32,
    pub max_checkpoint_count: i32,
    /// Zero means unlimited.
    pub max_subscriber_count: i32,
    pub consumer_strategy: SystemConsumerStrategy,
}

impl Default for PersistentSubscriptionSettings {
    fn default() -> Self {
        Self {
            resolve_link_tos: false,
            start_from: StreamPosition::END,
            extra_statistics: false,
            message_timeout: Duration::from_secs(30),
            max_retry_count: 10,
            live_buffer_size: 500,
            read_batch_size: 20,
            history_buffer_size: 500,
            checkpoint_after: Duration::from_secs(2),
            min_checkpoint_count: 10,
            max_checkpoint_count: 1000,
            max_subscriber_count: 0,
            consumer_strategy: SystemConsumerStrategy::RoundRobin,
        }
    }
}

impl PersistentSubscriptionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve_link_tos(mut self, resolve: bool) -> Self {
        self.resolve_link_tos = resolve;
        self
    }

    pub fn start_from_beginning(mut self) -> Self {
        self.start_from = StreamPosition::START;
        self
    }

    pub fn start_from_current(mut self) -> Self {
        self.start_from = StreamPosition::END;
        self
    }

    pub fn start_from(mut self, event_number: i64) -> Self {
        self.start_from = event_number;
        self
    }

    pub fn with_extra_statistics(mut self) -> Self {
        self.extra_statistics = true;
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    pub fn with_max_retry_count(mut self, count: i32) -> Self {
        self.max_retry_count = count;
        self
    }

    pub fn with_live_buffer_size(mut self, size: i32) -> Self {
        self.live_buffer_size = size;
        self
    }

    pub fn with_read_batch_size(mut self, size: i32) -> Self {
        self.read_batch_size = size;
        self
    }

    pub fn with_history_buffer_size(mut self, size: i32) -> Self {
        self.history_buffer_size = size;
        self
    }

    pub fn checkpoint_after(mut self, interval: Duration) -> Self {
        self.checkpoint_after = interval;
        self
    }

    pub fn with_checkpoint_counts(mut self, min: i32, max: i32) -> Self {
        self.min_checkpoint_count = min;
        self.max_checkpoint_count = max;
        self
    }

    pub fn with_max_subscriber_count(mut self, count: i32) -> Self {
        self.max_subscriber_count = count;
        self
    }

    pub fn with_consumer_strategy(mut self, strategy: SystemConsumerStrategy) -> Self {
        self.consumer_strategy = strategy;
        self
    }
}
