//! Protobuf payload types for requests and replies.
//!
//! The server speaks proto2, so scalar fields use the `required` label to
//! keep default values on the wire. Enumerations are stored as raw `i32`
//! and checked with [`enum_value`] at the point of use.

use crate::error::ProtocolError;

/// Converts a raw enumeration value, rejecting codes this client does not know.
pub fn enum_value<E: TryFrom<i32>>(field: &'static str, value: i32) -> Result<E, ProtocolError> {
    E::try_from(value).map_err(|_| ProtocolError::InvalidEnumValue { field, value })
}

// ============================================================================
// Event records
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NewEvent {
    #[prost(bytes = "vec", required, tag = "1")]
    pub event_id: Vec<u8>,
    #[prost(string, required, tag = "2")]
    pub event_type: String,
    #[prost(int32, required, tag = "3")]
    pub data_content_type: i32,
    #[prost(int32, required, tag = "4")]
    pub metadata_content_type: i32,
    #[prost(bytes = "vec", required, tag = "5")]
    pub data: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub metadata: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EventRecord {
    #[prost(string, required, tag = "1")]
    pub event_stream_id: String,
    #[prost(int64, required, tag = "2")]
    pub event_number: i64,
    #[prost(bytes = "vec", required, tag = "3")]
    pub event_id: Vec<u8>,
    #[prost(string, required, tag = "4")]
    pub event_type: String,
    #[prost(int32, required, tag = "5")]
    pub data_content_type: i32,
    #[prost(int32, required, tag = "6")]
    pub metadata_content_type: i32,
    #[prost(bytes = "vec", required, tag = "7")]
    pub data: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub metadata: Option<Vec<u8>>,
    #[prost(int64, optional, tag = "9")]
    pub created: Option<i64>,
    #[prost(int64, optional, tag = "10")]
    pub created_epoch: Option<i64>,
}

/// An event read from a single stream, with its link when resolved.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResolvedIndexedEvent {
    #[prost(message, optional, tag = "1")]
    pub event: Option<EventRecord>,
    #[prost(message, optional, tag = "2")]
    pub link: Option<EventRecord>,
}

/// An event read from `$all`, carrying its transaction file position.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResolvedEvent {
    #[prost(message, optional, tag = "1")]
    pub event: Option<EventRecord>,
    #[prost(message, optional, tag = "2")]
    pub link: Option<EventRecord>,
    #[prost(int64, required, tag = "3")]
    pub commit_position: i64,
    #[prost(int64, required, tag = "4")]
    pub prepare_position: i64,
}

// ============================================================================
// Operation results
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum OperationResult {
    Success = 0,
    PrepareTimeout = 1,
    CommitTimeout = 2,
    ForwardTimeout = 3,
    WrongExpectedVersion = 4,
    StreamDeleted = 5,
    InvalidTransaction = 6,
    AccessDenied = 7,
}

// ============================================================================
// Writes
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteEvents {
    #[prost(string, required, tag = "1")]
    pub event_stream_id: String,
    #[prost(int64, required, tag = "2")]
    pub expected_version: i64,
    #[prost(message, repeated, tag = "3")]
    pub events: Vec<NewEvent>,
    #[prost(bool, required, tag = "4")]
    pub require_master: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteEventsCompleted {
    #[prost(enumeration = "OperationResult", required, tag = "1")]
    pub result: i32,
    #[prost(string, optional, tag = "2")]
    pub message: Option<String>,
    #[prost(int64, required, tag = "3")]
    pub first_event_number: i64,
    #[prost(int64, required, tag = "4")]
    pub last_event_number: i64,
    #[prost(int64, optional, tag = "5")]
    pub prepare_position: Option<i64>,
    #[prost(int64, optional, tag = "6")]
    pub commit_position: Option<i64>,
    #[prost(int64, optional, tag = "7")]
    pub current_version: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteStream {
    #[prost(string, required, tag = "1")]
    pub event_stream_id: String,
    #[prost(int64, required, tag = "2")]
    pub expected_version: i64,
    #[prost(bool, required, tag = "3")]
    pub require_master: bool,
    #[prost(bool, optional, tag = "4")]
    pub hard_delete: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteStreamCompleted {
    #[prost(enumeration = "OperationResult", required, tag = "1")]
    pub result: i32,
    #[prost(string, optional, tag = "2")]
    pub message: Option<String>,
    #[prost(int64, optional, tag = "3")]
    pub prepare_position: Option<i64>,
    #[prost(int64, optional, tag = "4")]
    pub commit_position: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionStart {
    #[prost(string, required, tag = "1")]
    pub event_stream_id: String,
    #[prost(int64, required, tag = "2")]
    pub expected_version: i64,
    #[prost(bool, required, tag = "3")]
    pub require_master: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionStartCompleted {
    #[prost(int64, required, tag = "1")]
    pub transaction_id: i64,
    #[prost(enumeration = "OperationResult", required, tag = "2")]
    pub result: i32,
    #[prost(string, optional, tag = "3")]
    pub message: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionWrite {
    #[prost(int64, required, tag = "1")]
    pub transaction_id: i64,
    #[prost(message, repeated, tag = "2")]
    pub events: Vec<NewEvent>,
    #[prost(bool, required, tag = "3")]
    pub require_master: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionWriteCompleted {
    #[prost(int64, required, tag = "1")]
    pub transaction_id: i64,
    #[prost(enumeration = "OperationResult", required, tag = "2")]
    pub result: i32,
    #[prost(string, optional, tag = "3")]
    pub message: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionCommit {
    #[prost(int64, required, tag = "1")]
    pub transaction_id: i64,
    #[prost(bool, required, tag = "2")]
    pub require_master: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionCommitCompleted {
    #[prost(int64, required, tag = "1")]
    pub transaction_id: i64,
    #[prost(enumeration = "OperationResult", required, tag = "2")]
    pub result: i32,
    #[prost(string, optional, tag = "3")]
    pub message: Option<String>,
    #[prost(int64, required, tag = "4")]
    pub first_event_number: i64,
    #[prost(int64, required, tag = "5")]
    pub last_event_number: i64,
    #[prost(int64, optional, tag = "6")]
    pub prepare_position: Option<i64>,
    #[prost(int64, optional, tag = "7")]
    pub commit_position: Option<i64>,
}

// ============================================================================
// Reads
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReadEventResult {
    Success = 0,
    NotFound = 1,
    NoStream = 2,
    StreamDeleted = 3,
    Error = 4,
    AccessDenied = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReadStreamResult {
    Success = 0,
    NoStream = 1,
    StreamDeleted = 2,
    NotModified = 3,
    Error = 4,
    AccessDenied = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReadAllResult {
    Success = 0,
    NotModified = 1,
    Error = 2,
    AccessDenied = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadEvent {
    #[prost(string, required, tag = "1")]
    pub event_stream_id: String,
    #[prost(int64, required, tag = "2")]
    pub event_number: i64,
    #[prost(bool, required, tag = "3")]
    pub resolve_link_tos: bool,
    #[prost(bool, required, tag = "4")]
    pub require_master: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadEventCompleted {
    #[prost(enumeration = "ReadEventResult", required, tag = "1")]
    pub result: i32,
    #[prost(message, required, tag = "2")]
    pub event: ResolvedIndexedEvent,
    #[prost(string, optional, tag = "3")]
    pub error: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadStreamEvents {
    #[prost(string, required, tag = "1")]
    pub event_stream_id: String,
    #[prost(int64, required, tag = "2")]
    pub from_event_number: i64,
    #[prost(int32, required, tag = "3")]
    pub max_count: i32,
    #[prost(bool, required, tag = "4")]
    pub resolve_link_tos: bool,
    #[prost(bool, required, tag = "5")]
    pub require_master: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadStreamEventsCompleted {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<ResolvedIndexedEvent>,
    #[prost(enumeration = "ReadStreamResult", required, tag = "2")]
    pub result: i32,
    #[prost(int64, required, tag = "3")]
    pub next_event_number: i64,
    #[prost(int64, required, tag = "4")]
    pub last_event_number: i64,
    #[prost(bool, required, tag = "5")]
    pub is_end_of_stream: bool,
    #[prost(int64, required, tag = "6")]
    pub last_commit_position: i64,
    #[prost(string, optional, tag = "7")]
    pub error: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadAllEvents {
    #[prost(int64, required, tag = "1")]
    pub commit_position: i64,
    #[prost(int64, required, tag = "2")]
    pub prepare_position: i64,
    #[prost(int32, required, tag = "3")]
    pub max_count: i32,
    #[prost(bool, required, tag = "4")]
    pub resolve_link_tos: bool,
    #[prost(bool, required, tag = "5")]
    pub require_master: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadAllEventsCompleted {
    #[prost(int64, required, tag = "1")]
    pub commit_position: i64,
    #[prost(int64, required, tag = "2")]
    pub prepare_position: i64,
    #[prost(message, repeated, tag = "3")]
    pub events: Vec<ResolvedEvent>,
    #[prost(int64, required, tag = "4")]
    pub next_commit_position: i64,
    #[prost(int64, required, tag = "5")]
    pub next_prepare_position: i64,
    /// Absent means `Success`.
    #[prost(enumeration = "ReadAllResult", optional, tag = "6")]
    pub result: Option<i32>,
    #[prost(string, optional, tag = "7")]
    pub error: Option<String>,
}

// ============================================================================
// Volatile subscriptions
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeToStream {
    /// Empty string subscribes to `$all`.
    #[prost(string, required, tag = "1")]
    pub event_stream_id: String,
    #[prost(bool, required, tag = "2")]
    pub resolve_link_tos: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscriptionConfirmation {
    #[prost(int64, required, tag = "1")]
    pub last_commit_position: i64,
    #[prost(int64, optional, tag = "2")]
    pub last_event_number: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamEventAppeared {
    #[prost(message, required, tag = "1")]
    pub event: ResolvedEvent,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnsubscribeFromStream {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SubscriptionDropReason {
    Unsubscribed = 0,
    AccessDenied = 1,
    NotFound = 2,
    PersistentSubscriptionDeleted = 3,
    SubscriberMaxCountReached = 4,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscriptionDropped {
    /// Absent means `Unsubscribed`.
    #[prost(enumeration = "SubscriptionDropReason", optional, tag = "1")]
    pub reason: Option<i32>,
}

// ============================================================================
// Persistent subscriptions
// ============================================================================

/// Settings shared by the create and update requests.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreatePersistentSubscription {
    #[prost(string, required, tag = "1")]
    pub subscription_group_name: String,
    #[prost(string, required, tag = "2")]
    pub event_stream_id: String,
    #[prost(bool, required, tag = "3")]
    pub resolve_link_tos: bool,
    #[prost(int64, required, tag = "4")]
    pub start_from: i64,
    #[prost(int32, required, tag = "5")]
    pub message_timeout_milliseconds: i32,
    #[prost(bool, required, tag = "6")]
    pub record_statistics: bool,
    #[prost(int32, required, tag = "7")]
    pub live_buffer_size: i32,
    #[prost(int32, required, tag = "8")]
    pub read_batch_size: i32,
    #[prost(int32, required, tag = "9")]
    pub buffer_size: i32,
    #[prost(int32, required, tag = "10")]
    pub max_retry_count: i32,
    #[prost(bool, required, tag = "11")]
    pub prefer_round_robin: bool,
    #[prost(int32, required, tag = "12")]
    pub checkpoint_after_time: i32,
    #[prost(int32, required, tag = "13")]
    pub checkpoint_max_count: i32,
    #[prost(int32, required, tag = "14")]
    pub checkpoint_min_count: i32,
    #[prost(int32, required, tag = "15")]
    pub subscriber_max_count: i32,
    #[prost(string, optional, tag = "16")]
    pub named_consumer_strategy: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdatePersistentSubscription {
    #[prost(string, required, tag = "1")]
    pub subscription_group_name: String,
    #[prost(string, required, tag = "2")]
    pub event_stream_id: String,
    #[prost(bool, required, tag = "3")]
    pub resolve_link_tos: bool,
    #[prost(int64, required, tag = "4")]
    pub start_from: i64,
    #[prost(int32, required, tag = "5")]
    pub message_timeout_milliseconds: i32,
    #[prost(bool, required, tag = "6")]
    pub record_statistics: bool,
    #[prost(int32, required, tag = "7")]
    pub live_buffer_size: i32,
    #[prost(int32, required, tag = "8")]
    pub read_batch_size: i32,
    #[prost(int32, required, tag = "9")]
    pub buffer_size: i32,
    #[prost(int32, required, tag = "10")]
    pub max_retry_count: i32,
    #[prost(bool, required, tag = "11")]
    pub prefer_round_robin: bool,
    #[prost(int32, required, tag = "12")]
    pub checkpoint_after_time: i32,
    #[prost(int32, required, tag = "13")]
    pub checkpoint_max_count: i32,
    #[prost(int32, required, tag = "14")]
    pub checkpoint_min_count: i32,
    #[prost(int32, required, tag = "15")]
    pub subscriber_max_count: i32,
    #[prost(string, optional, tag = "16")]
    pub named_consumer_strategy: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeletePersistentSubscription {
    #[prost(string, required, tag = "1")]
    pub subscription_group_name: String,
    #[prost(string, required, tag = "2")]
    pub event_stream_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CreatePersistentSubscriptionResult {
    Success = 0,
    AlreadyExists = 1,
    Fail = 2,
    AccessDenied = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum UpdatePersistentSubscriptionResult {
    Success = 0,
    DoesNotExist = 1,
    Fail = 2,
    AccessDenied = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DeletePersistentSubscriptionResult {
    Success = 0,
    DoesNotExist = 1,
    Fail = 2,
    AccessDenied = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreatePersistentSubscriptionCompleted {
    #[prost(enumeration = "CreatePersistentSubscriptionResult", required, tag = "1")]
    pub result: i32,
    #[prost(string, optional, tag = "2")]
    pub reason: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdatePersistentSubscriptionCompleted {
    #[prost(enumeration = "UpdatePersistentSubscriptionResult", required, tag = "1")]
    pub result: i32,
    #[prost(string, optional, tag = "2")]
    pub reason: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeletePersistentSubscriptionCompleted {
    #[prost(enumeration = "DeletePersistentSubscriptionResult", required, tag = "1")]
    pub result: i32,
    #[prost(string, optional, tag = "2")]
    pub reason: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectToPersistentSubscription {
    #[prost(string, required, tag = "1")]
    pub subscription_id: String,
    #[prost(string, required, tag = "2")]
    pub event_stream_id: String,
    #[prost(int32, required, tag = "3")]
    pub allowed_in_flight_messages: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PersistentSubscriptionConfirmation {
    #[prost(int64, required, tag = "1")]
    pub last_commit_position: i64,
    #[prost(string, required, tag = "2")]
    pub subscription_id: String,
    #[prost(int64, optional, tag = "3")]
    pub last_event_number: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PersistentSubscriptionStreamEventAppeared {
    #[prost(message, required, tag = "1")]
    pub event: ResolvedIndexedEvent,
    #[prost(int32, optional, tag = "2")]
    pub retry_count: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PersistentSubscriptionAckEvents {
    #[prost(string, required, tag = "1")]
    pub subscription_id: String,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub processed_event_ids: Vec<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum NakAction {
    Unknown = 0,
    Park = 1,
    Retry = 2,
    Skip = 3,
    Stop = 4,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PersistentSubscriptionNakEvents {
    #[prost(string, required, tag = "1")]
    pub subscription_id: String,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub processed_event_ids: Vec<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub message: Option<String>,
    #[prost(enumeration = "NakAction", required, tag = "4")]
    pub action: i32,
}

// ============================================================================
// Session and routing
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum NotHandledReason {
    NotReady = 0,
    TooBusy = 1,
    NotMaster = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NotHandled {
    #[prost(enumeration = "NotHandledReason", required, tag = "1")]
    pub reason: i32,
    /// Encoded [`MasterInfo`] when `reason` is `NotMaster`.
    #[prost(bytes = "vec", optional, tag = "2")]
    pub additional_info: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MasterInfo {
    #[prost(string, required, tag = "1")]
    pub external_tcp_address: String,
    #[prost(int32, required, tag = "2")]
    pub external_tcp_port: i32,
    #[prost(string, required, tag = "3")]
    pub external_http_address: String,
    #[prost(int32, required, tag = "4")]
    pub external_http_port: i32,
    #[prost(string, optional, tag = "5")]
    pub external_secure_tcp_address: Option<String>,
    #[prost(int32, optional, tag = "6")]
    pub external_secure_tcp_port: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IdentifyClient {
    #[prost(int32, required, tag = "1")]
    pub version: i32,
    #[prost(string, optional, tag = "2")]
    pub connection_name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientIdentified {}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_required_defaults_are_encoded() {
        let msg = TransactionCommit {
            transaction_id: 0,
            require_master: false,
        };
        // proto2 required fields are written even when zero.
        assert_eq!(msg.encode_to_vec(), vec![0x08, 0x00, 0x10, 0x00]);
    }

    #[test]
    fn test_nak_message_encoding() {
        let msg = PersistentSubscriptionNakEvents {
            subscription_id: "invoices::billing".to_string(),
            processed_event_ids: vec![vec![1u8; 16], vec![2u8; 16]],
            message: Some("later".to_string()),
            action: NakAction::Retry as i32,
        };
        let decoded =
            PersistentSubscriptionNakEvents::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.subscription_id, "invoices::billing");
        assert_eq!(decoded.processed_event_ids.len(), 2);
        assert_eq!(
            enum_value::<NakAction>("NakAction", decoded.action).unwrap(),
            NakAction::Retry
        );
    }

    #[test]
    fn test_enum_value_rejects_unknown() {
        let result = enum_value::<OperationResult>("OperationResult", 99);
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidEnumValue {
                field: "OperationResult",
                value: 99
            })
        ));
        assert_eq!(
            enum_value::<OperationResult>("OperationResult", 4).unwrap(),
            OperationResult::WrongExpectedVersion
        );
    }

    #[test]
    fn test_optional_drop_reason() {
        let msg = SubscriptionDropped { reason: None };
        let decoded = SubscriptionDropped::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert!(decoded.reason.is_none());
    }
}
