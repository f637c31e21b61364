//! Volatile and persistent subscriptions.
//!
//! A subscription stays registered with the dispatcher under one
//! correlation id from the subscribe request until it is dropped. Events
//! travel to the caller's handle through a bounded channel, so delivery for
//! one subscription is strictly ordered and a slow consumer never blocks
//! the read loop.

use crate::connection::ConnectionWriter;
use crate::dispatcher::Dispatcher;
use crate::error::ClientError;
use crate::operation::{
    inspect_not_handled, InspectionDecision, InspectionResult, Operation, OperationKind,
};
use crate::types::ResolvedEvent;
use evstore_protocol::message::{
    enum_value, ConnectToPersistentSubscription, NakAction, PersistentSubscriptionAckEvents,
    PersistentSubscriptionNakEvents, SubscribeToStream, SubscriptionDropReason,
    UnsubscribeFromStream,
};
use evstore_protocol::{Credentials, Frame, InboundMessage, InboundPackage, TcpCommand};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

/// Default capacity of a subscription's event channel.
pub const DEFAULT_MAX_LIVE_QUEUE_SIZE: usize = 10_000;

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unconfirmed,
    Live,
    Dropped,
}

/// Why a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    Unsubscribed,
    AccessDenied,
    NotFound,
    SubscriptionDeleted,
    SubscriberMaxCountReached,
    ConnectionClosed,
    NotAuthenticated,
    ServerError,
    ProcessingQueueOverflow,
    CatchUpError,
}

impl From<SubscriptionDropReason> for DropReason {
    fn from(reason: SubscriptionDropReason) -> Self {
        match reason {
            SubscriptionDropReason::Unsubscribed => DropReason::Unsubscribed,
            SubscriptionDropReason::AccessDenied => DropReason::AccessDenied,
            SubscriptionDropReason::NotFound => DropReason::NotFound,
            SubscriptionDropReason::PersistentSubscriptionDeleted => {
                DropReason::SubscriptionDeleted
            }
            SubscriptionDropReason::SubscriberMaxCountReached => {
                DropReason::SubscriberMaxCountReached
            }
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DropReason::Unsubscribed => "unsubscribed",
            DropReason::AccessDenied => "access denied",
            DropReason::NotFound => "not found",
            DropReason::SubscriptionDeleted => "subscription deleted",
            DropReason::SubscriberMaxCountReached => "subscriber max count reached",
            DropReason::ConnectionClosed => "connection closed",
            DropReason::NotAuthenticated => "not authenticated",
            DropReason::ServerError => "server error",
            DropReason::ProcessingQueueOverflow => "processing queue overflow",
            DropReason::CatchUpError => "catch-up error",
        };
        f.write_str(text)
    }
}

/// Final notification of a subscription.
#[derive(Debug)]
pub struct SubscriptionDropped {
    pub reason: DropReason,
    /// Set when the drop was caused by a failure.
    pub error: Option<ClientError>,
}

/// What the server reported when it confirmed a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfirmed {
    pub last_commit_position: i64,
    pub last_event_number: Option<i64>,
    /// Persistent subscriptions only.
    pub subscription_id: Option<String>,
}

pub(crate) fn drop_reason_for(error: &ClientError) -> DropReason {
    match error {
        ClientError::ConnectionClosed | ClientError::HeartbeatTimeout | ClientError::Io(_) => {
            DropReason::ConnectionClosed
        }
        ClientError::NotAuthenticated(_) => DropReason::NotAuthenticated,
        ClientError::AccessDenied(_) => DropReason::AccessDenied,
        ClientError::SubscriptionDropped(reason) => *reason,
        _ => DropReason::ServerError,
    }
}

/// Receiving halves handed to the caller once the subscription is confirmed.
pub(crate) struct PendingSubscription<T> {
    pub(crate) confirmed: oneshot::Receiver<Result<SubscriptionConfirmed, ClientError>>,
    pub(crate) events: mpsc::Receiver<T>,
    pub(crate) dropped: oneshot::Receiver<SubscriptionDropped>,
    pub(crate) state: watch::Receiver<SubscriptionState>,
}

/// Sending halves shared by both subscription kinds.
struct SubscriptionCore<T> {
    confirmed: Option<oneshot::Sender<Result<SubscriptionConfirmed, ClientError>>>,
    events: mpsc::Sender<T>,
    dropped: Option<oneshot::Sender<SubscriptionDropped>>,
    state: watch::Sender<SubscriptionState>,
    /// The server ended the subscription; no unsubscribe is owed.
    dropped_by_server: bool,
}

impl<T> SubscriptionCore<T> {
    fn new(capacity: usize) -> (Self, PendingSubscription<T>) {
        let (confirmed_tx, confirmed_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Unconfirmed);
        let core = Self {
            confirmed: Some(confirmed_tx),
            events: events_tx,
            dropped: Some(dropped_tx),
            state: state_tx,
            dropped_by_server: false,
        };
        let pending = PendingSubscription {
            confirmed: confirmed_rx,
            events: events_rx,
            dropped: dropped_rx,
            state: state_rx,
        };
        (core, pending)
    }

    fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    fn confirm(&mut self, confirmed: SubscriptionConfirmed) -> InspectionResult {
        if self.state() != SubscriptionState::Unconfirmed {
            return InspectionResult::new(InspectionDecision::DoNothing, "duplicate confirmation");
        }
        let description = format!(
            "Subscribed at {}, {:?}",
            confirmed.last_commit_position, confirmed.last_event_number
        );
        self.state.send_replace(SubscriptionState::Live);
        if let Some(tx) = self.confirmed.take() {
            let _ = tx.send(Ok(confirmed));
        }
        InspectionResult::new(InspectionDecision::Subscribed, description)
    }

    fn deliver(&mut self, event: T) -> InspectionResult {
        match self.events.try_send(event) {
            Ok(()) => InspectionResult::new(InspectionDecision::DoNothing, "EventAppeared"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("subscription queue is full, dropping subscription");
                self.drop_with(DropReason::ProcessingQueueOverflow, None);
                InspectionResult::end("ProcessingQueueOverflow")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.drop_with(DropReason::Unsubscribed, None);
                InspectionResult::end("consumer gone")
            }
        }
    }

    fn server_dropped(&mut self, reason: DropReason) -> InspectionResult {
        self.dropped_by_server = true;
        let error = match reason {
            DropReason::Unsubscribed => None,
            other => Some(ClientError::SubscriptionDropped(other)),
        };
        self.drop_with(reason, error);
        InspectionResult::end(format!("Dropped: {}", reason))
    }

    /// Moves to `Dropped`. Before confirmation the failure goes to the
    /// subscribe call instead of the drop handler.
    fn drop_with(&mut self, reason: DropReason, error: Option<ClientError>) {
        if self.state() == SubscriptionState::Dropped {
            return;
        }
        self.state.send_replace(SubscriptionState::Dropped);
        tracing::debug!(%reason, "subscription dropped");
        if let Some(tx) = self.confirmed.take() {
            let _ = tx.send(Err(error.unwrap_or(ClientError::SubscriptionDropped(reason))));
            return;
        }
        if let Some(tx) = self.dropped.take() {
            let _ = tx.send(SubscriptionDropped { reason, error });
        }
    }

    fn fail(&mut self, error: ClientError) {
        let reason = drop_reason_for(&error);
        self.drop_with(reason, Some(error));
    }

    fn is_cancelled(&self) -> bool {
        match &self.confirmed {
            Some(tx) => tx.is_closed(),
            None => self.events.is_closed(),
        }
    }

    /// Handles the replies every subscription understands.
    fn inspect_common(&mut self, package: InboundPackage) -> InspectionResult {
        match package.message {
            InboundMessage::SubscriptionDropped(dropped) => {
                let reason = match dropped.reason {
                    None => DropReason::Unsubscribed,
                    Some(raw) => match enum_value::<SubscriptionDropReason>(
                        "SubscriptionDropReason",
                        raw,
                    ) {
                        Ok(reason) => reason.into(),
                        Err(err) => {
                            self.dropped_by_server = true;
                            self.drop_with(DropReason::ServerError, Some(err.into()));
                            return InspectionResult::end("unknown drop reason");
                        }
                    },
                };
                self.server_dropped(reason)
            }
            InboundMessage::NotHandled(ref not_handled) => match inspect_not_handled(not_handled)
            {
                Ok(result) => result,
                Err(error) => {
                    self.drop_with(DropReason::ServerError, Some(error));
                    InspectionResult::end("NotHandled")
                }
            },
            InboundMessage::NotAuthenticated(reason) => {
                self.dropped_by_server = true;
                self.drop_with(
                    DropReason::NotAuthenticated,
                    Some(ClientError::NotAuthenticated(reason)),
                );
                InspectionResult::end("NotAuthenticated")
            }
            InboundMessage::BadRequest(reason) => {
                self.dropped_by_server = true;
                self.drop_with(DropReason::ServerError, Some(ClientError::BadRequest(reason)));
                InspectionResult::end("BadRequest")
            }
            _ => InspectionResult::new(
                InspectionDecision::NotHandled,
                format!("unexpected command {}", package.command),
            ),
        }
    }

    fn teardown(&self, correlation_id: Uuid, credentials: &Option<Credentials>) -> Option<Frame> {
        if self.dropped_by_server {
            return None;
        }
        Some(unsubscribe_frame(correlation_id, credentials))
    }
}

fn unsubscribe_frame(correlation_id: Uuid, credentials: &Option<Credentials>) -> Frame {
    Frame::from_message(
        TcpCommand::UnsubscribeFromStream,
        correlation_id,
        &UnsubscribeFromStream {},
    )
    .with_credentials(credentials.clone())
}

/// Held by a confirmed subscription handle. Dropping the handle while the
/// subscription is still open deregisters it and unsubscribes.
pub(crate) struct SubscriptionGuard {
    correlation_id: Uuid,
    dispatcher: Arc<Dispatcher>,
    writer: ConnectionWriter,
    credentials: Option<Credentials>,
    state: watch::Receiver<SubscriptionState>,
    unsubscribe_sent: AtomicBool,
}

impl SubscriptionGuard {
    pub(crate) fn new(
        correlation_id: Uuid,
        dispatcher: Arc<Dispatcher>,
        writer: ConnectionWriter,
        credentials: Option<Credentials>,
        state: watch::Receiver<SubscriptionState>,
    ) -> Self {
        Self {
            correlation_id,
            dispatcher,
            writer,
            credentials,
            state,
            unsubscribe_sent: AtomicBool::new(false),
        }
    }

    fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    async fn unsubscribe(&self) -> Result<(), ClientError> {
        self.unsubscribe_sent.store(true, Ordering::SeqCst);
        self.writer
            .send(&unsubscribe_frame(self.correlation_id, &self.credentials))
            .await
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.state() == SubscriptionState::Dropped {
            return;
        }
        if !self.dispatcher.remove(self.correlation_id) {
            return;
        }
        tracing::debug!(correlation_id = %self.correlation_id, "subscription handle dropped");
        if self.unsubscribe_sent.load(Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let writer = self.writer.clone();
        let frame = unsubscribe_frame(self.correlation_id, &self.credentials);
        runtime.spawn(async move {
            if let Err(err) = writer.send(&frame).await {
                tracing::debug!(
                    correlation_id = %frame.correlation_id,
                    error = %err,
                    "unsubscribe after drop failed"
                );
            }
        });
    }
}

fn decode_failure(core: &mut SubscriptionCore<impl Sized>, error: ClientError) -> InspectionResult {
    tracing::error!(%error, "undecodable subscription event");
    core.drop_with(DropReason::ServerError, Some(error));
    InspectionResult::end("undecodable event")
}

// ============================================================================
// Volatile subscriptions
// ============================================================================

/// Live-only subscription to one stream, or to `$all` when the stream is empty.
pub(crate) struct VolatileSubscriptionOperation {
    stream: String,
    resolve_link_tos: bool,
    credentials: Option<Credentials>,
    core: SubscriptionCore<ResolvedEvent>,
}

impl VolatileSubscriptionOperation {
    pub(crate) fn new(
        stream: impl Into<String>,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
        capacity: usize,
    ) -> (Self, PendingSubscription<ResolvedEvent>) {
        let (core, pending) = SubscriptionCore::new(capacity);
        let operation = Self {
            stream: stream.into(),
            resolve_link_tos,
            credentials,
            core,
        };
        (operation, pending)
    }
}

impl Operation for VolatileSubscriptionOperation {
    fn name(&self) -> &'static str {
        "SubscribeToStream"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Subscription
    }

    fn create_network_package(&self, correlation_id: Uuid) -> Frame {
        let request = SubscribeToStream {
            event_stream_id: self.stream.clone(),
            resolve_link_tos: self.resolve_link_tos,
        };
        Frame::from_message(TcpCommand::SubscribeToStream, correlation_id, &request)
            .with_credentials(self.credentials.clone())
    }

    fn inspect_package(&mut self, package: InboundPackage) -> InspectionResult {
        match package.message {
            InboundMessage::SubscriptionConfirmation(confirmation) => {
                self.core.confirm(SubscriptionConfirmed {
                    last_commit_position: confirmation.last_commit_position,
                    last_event_number: confirmation.last_event_number,
                    subscription_id: None,
                })
            }
            InboundMessage::StreamEventAppeared(appeared) => {
                match ResolvedEvent::from_all(appeared.event) {
                    Ok(event) => self.core.deliver(event),
                    Err(err) => decode_failure(&mut self.core, err.into()),
                }
            }
            _ => self.core.inspect_common(package),
        }
    }

    fn fail(&mut self, error: ClientError) {
        self.core.fail(error);
    }

    fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    fn teardown_package(&self, correlation_id: Uuid) -> Option<Frame> {
        self.core.teardown(correlation_id, &self.credentials)
    }
}

/// Handle of a confirmed volatile subscription.
///
/// Dropping the handle before the subscription ends unsubscribes it.
pub struct VolatileSubscription {
    stream: String,
    confirmed: SubscriptionConfirmed,
    events: mpsc::Receiver<ResolvedEvent>,
    dropped: oneshot::Receiver<SubscriptionDropped>,
    guard: SubscriptionGuard,
}

impl VolatileSubscription {
    pub(crate) fn new(
        stream: String,
        confirmed: SubscriptionConfirmed,
        pending: PendingSubscription<ResolvedEvent>,
        guard: SubscriptionGuard,
    ) -> Self {
        Self {
            stream,
            confirmed,
            events: pending.events,
            dropped: pending.dropped,
            guard,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.guard.correlation_id
    }

    /// Stream name; empty for `$all`.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn last_commit_position(&self) -> i64 {
        self.confirmed.last_commit_position
    }

    pub fn last_event_number(&self) -> Option<i64> {
        self.confirmed.last_event_number
    }

    pub fn state(&self) -> SubscriptionState {
        self.guard.state()
    }

    /// Next event, or `None` once the subscription is dropped and drained.
    pub async fn next(&mut self) -> Option<ResolvedEvent> {
        self.events.recv().await
    }

    /// Asks the server to end the subscription.
    ///
    /// The state stays `Live` until the server answers with
    /// `SubscriptionDropped`; [`dropped`](Self::dropped) then reports
    /// [`DropReason::Unsubscribed`].
    pub async fn unsubscribe(&self) -> Result<(), ClientError> {
        self.guard.unsubscribe().await
    }

    /// Waits for the drop notification.
    pub async fn dropped(self) -> SubscriptionDropped {
        let Self {
            events, dropped, ..
        } = self;
        let outcome = dropped.await;
        drop(events);
        outcome.unwrap_or(SubscriptionDropped {
            reason: DropReason::ConnectionClosed,
            error: None,
        })
    }
}

// ============================================================================
// Persistent subscriptions
// ============================================================================

/// Subscription identifier used by acks and naks.
pub fn persistent_subscription_id(stream: &str, group: &str) -> String {
    format!("{}::{}", stream, group)
}

/// An event as delivered to a persistent subscription.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PersistentDelivery {
    event: ResolvedEvent,
    retry_count: i32,
}

pub(crate) struct PersistentSubscriptionOperation {
    stream: String,
    group: String,
    buffer_size: i32,
    credentials: Option<Credentials>,
    core: SubscriptionCore<PersistentDelivery>,
}

impl PersistentSubscriptionOperation {
    pub(crate) fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        buffer_size: i32,
        credentials: Option<Credentials>,
        capacity: usize,
    ) -> (Self, PendingSubscription<PersistentDelivery>) {
        let (core, pending) = SubscriptionCore::new(capacity);
        let operation = Self {
            stream: stream.into(),
            group: group.into(),
            buffer_size,
            credentials,
            core,
        };
        (operation, pending)
    }
}

impl Operation for PersistentSubscriptionOperation {
    fn name(&self) -> &'static str {
        "ConnectToPersistentSubscription"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Subscription
    }

    fn create_network_package(&self, correlation_id: Uuid) -> Frame {
        let request = ConnectToPersistentSubscription {
            subscription_id: self.group.clone(),
            event_stream_id: self.stream.clone(),
            allowed_in_flight_messages: self.buffer_size,
        };
        Frame::from_message(
            TcpCommand::ConnectToPersistentSubscription,
            correlation_id,
            &request,
        )
        .with_credentials(self.credentials.clone())
    }

    fn inspect_package(&mut self, package: InboundPackage) -> InspectionResult {
        match package.message {
            InboundMessage::PersistentSubscriptionConfirmation(confirmation) => {
                self.core.confirm(SubscriptionConfirmed {
                    last_commit_position: confirmation.last_commit_position,
                    last_event_number: confirmation.last_event_number,
                    subscription_id: Some(confirmation.subscription_id),
                })
            }
            InboundMessage::PersistentSubscriptionStreamEventAppeared(appeared) => {
                let retry_count = appeared.retry_count.unwrap_or(0);
                match ResolvedEvent::from_indexed(appeared.event) {
                    Ok(event) => self.core.deliver(PersistentDelivery { event, retry_count }),
                    Err(err) => decode_failure(&mut self.core, err.into()),
                }
            }
            _ => self.core.inspect_common(package),
        }
    }

    fn fail(&mut self, error: ClientError) {
        self.core.fail(error);
    }

    fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    fn teardown_package(&self, correlation_id: Uuid) -> Option<Frame> {
        self.core.teardown(correlation_id, &self.credentials)
    }
}

/// Sends acks and naks for one persistent subscription.
///
/// Both travel under the subscription's correlation id. Neither waits for
/// a reply.
#[derive(Clone)]
pub struct Acknowledger {
    subscription_id: String,
    correlation_id: Uuid,
    writer: ConnectionWriter,
    credentials: Option<Credentials>,
}

fn id_bytes(ids: &[Uuid]) -> Vec<Vec<u8>> {
    ids.iter().map(|id| id.as_bytes().to_vec()).collect()
}

impl Acknowledger {
    pub(crate) fn new(
        subscription_id: String,
        correlation_id: Uuid,
        writer: ConnectionWriter,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            subscription_id,
            correlation_id,
            writer,
            credentials,
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn ack_frame(&self, ids: &[Uuid]) -> Frame {
        let message = PersistentSubscriptionAckEvents {
            subscription_id: self.subscription_id.clone(),
            processed_event_ids: id_bytes(ids),
        };
        Frame::from_message(
            TcpCommand::PersistentSubscriptionAckEvents,
            self.correlation_id,
            &message,
        )
        .with_credentials(self.credentials.clone())
    }

    pub fn nak_frame(&self, ids: &[Uuid], action: NakAction, message: Option<String>) -> Frame {
        let message = PersistentSubscriptionNakEvents {
            subscription_id: self.subscription_id.clone(),
            processed_event_ids: id_bytes(ids),
            message,
            action: action as i32,
        };
        Frame::from_message(
            TcpCommand::PersistentSubscriptionNakEvents,
            self.correlation_id,
            &message,
        )
        .with_credentials(self.credentials.clone())
    }

    pub async fn ack(&self, ids: &[Uuid]) -> Result<(), ClientError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.writer.send(&self.ack_frame(ids)).await
    }

    pub async fn nak(
        &self,
        ids: &[Uuid],
        action: NakAction,
        message: Option<String>,
    ) -> Result<(), ClientError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.writer.send(&self.nak_frame(ids, action, message)).await
    }
}

/// A persistent subscription event that can be acked on its own.
pub struct AcknowledgeableEvent {
    pub event: ResolvedEvent,
    /// How many times the server has delivered this event before.
    pub retry_count: i32,
    acknowledger: Acknowledger,
}

impl AcknowledgeableEvent {
    fn ack_id(&self) -> Result<Uuid, ClientError> {
        self.event.ack_id().ok_or_else(|| {
            ClientError::InvalidArgument("event has no record to acknowledge".into())
        })
    }

    pub async fn ack(&self) -> Result<(), ClientError> {
        self.acknowledger.ack(&[self.ack_id()?]).await
    }

    pub async fn nack(
        &self,
        action: NakAction,
        message: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.acknowledger
            .nak(&[self.ack_id()?], action, Some(message.into()))
            .await
    }
}

impl fmt::Debug for AcknowledgeableEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcknowledgeableEvent")
            .field("event", &self.event)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

/// Handle of a confirmed persistent subscription.
///
/// Dropping the handle before the subscription ends disconnects from the
/// group.
pub struct PersistentSubscription {
    stream: String,
    group: String,
    confirmed: SubscriptionConfirmed,
    acknowledger: Acknowledger,
    events: mpsc::Receiver<PersistentDelivery>,
    dropped: oneshot::Receiver<SubscriptionDropped>,
    guard: SubscriptionGuard,
}

impl PersistentSubscription {
    pub(crate) fn new(
        stream: String,
        group: String,
        confirmed: SubscriptionConfirmed,
        pending: PendingSubscription<PersistentDelivery>,
        guard: SubscriptionGuard,
    ) -> Self {
        let subscription_id = confirmed
            .subscription_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| persistent_subscription_id(&stream, &group));
        Self {
            acknowledger: Acknowledger::new(
                subscription_id,
                guard.correlation_id,
                guard.writer.clone(),
                guard.credentials.clone(),
            ),
            stream,
            group,
            confirmed,
            events: pending.events,
            dropped: pending.dropped,
            guard,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// `"<stream>::<group>"` as confirmed by the server.
    pub fn subscription_id(&self) -> &str {
        self.acknowledger.subscription_id()
    }

    pub fn correlation_id(&self) -> Uuid {
        self.acknowledger.correlation_id
    }

    pub fn last_commit_position(&self) -> i64 {
        self.confirmed.last_commit_position
    }

    pub fn last_event_number(&self) -> Option<i64> {
        self.confirmed.last_event_number
    }

    pub fn state(&self) -> SubscriptionState {
        self.guard.state()
    }

    pub fn acknowledger(&self) -> Acknowledger {
        self.acknowledger.clone()
    }

    pub async fn next(&mut self) -> Option<AcknowledgeableEvent> {
        let delivery = self.events.recv().await?;
        Some(AcknowledgeableEvent {
            event: delivery.event,
            retry_count: delivery.retry_count,
            acknowledger: self.acknowledger.clone(),
        })
    }

    /// Acknowledges a batch of events in one frame.
    pub async fn acknowledge(&self, ids: &[Uuid]) -> Result<(), ClientError> {
        self.acknowledger.ack(ids).await
    }

    /// Rejects a batch of events in one frame.
    pub async fn fail(
        &self,
        ids: &[Uuid],
        action: NakAction,
        message: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.acknowledger.nak(ids, action, Some(message.into())).await
    }

    /// Disconnects from the group. The state stays `Live` until the server
    /// confirms with `SubscriptionDropped`.
    pub async fn stop(&self) -> Result<(), ClientError> {
        self.guard.unsubscribe().await
    }

    pub async fn dropped(self) -> SubscriptionDropped {
        let Self {
            events, dropped, ..
        } = self;
        let outcome = dropped.await;
        drop(events);
        outcome.unwrap_or(SubscriptionDropped {
            reason: DropReason::ConnectionClosed,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstore_protocol::message::{
        self, EventRecord, PersistentSubscriptionConfirmation,
        PersistentSubscriptionStreamEventAppeared, ResolvedIndexedEvent, StreamEventAppeared,
        SubscriptionConfirmation,
    };
    use prost::Message;

    fn record(number: i64) -> EventRecord {
        EventRecord {
            event_stream_id: "orders-1".to_string(),
            event_id: Uuid::new_v4().as_bytes().to_vec(),
            event_number: number,
            event_type: "OrderPlaced".to_string(),
            data_content_type: 1,
            metadata_content_type: 0,
            data: b"{}".to_vec(),
            metadata: None,
            created: None,
            created_epoch: None,
        }
    }

    fn package(message: InboundMessage, command: TcpCommand) -> InboundPackage {
        InboundPackage {
            command,
            correlation_id: Uuid::nil(),
            message,
        }
    }

    fn confirmation() -> InboundPackage {
        package(
            InboundMessage::SubscriptionConfirmation(SubscriptionConfirmation {
                last_commit_position: 1200,
                last_event_number: Some(41),
            }),
            TcpCommand::SubscriptionConfirmation,
        )
    }

    fn appeared(number: i64) -> InboundPackage {
        package(
            InboundMessage::StreamEventAppeared(StreamEventAppeared {
                event: message::ResolvedEvent {
                    event: Some(record(number)),
                    link: None,
                    commit_position: 1300 + number,
                    prepare_position: 1300 + number,
                },
            }),
            TcpCommand::StreamEventAppeared,
        )
    }

    fn dropped(reason: SubscriptionDropReason) -> InboundPackage {
        package(
            InboundMessage::SubscriptionDropped(message::SubscriptionDropped {
                reason: Some(reason as i32),
            }),
            TcpCommand::SubscriptionDropped,
        )
    }

    #[tokio::test]
    async fn test_volatile_lifecycle() {
        let (mut op, mut pending) = VolatileSubscriptionOperation::new("orders-1", false, None, 8);
        assert_eq!(*pending.state.borrow(), SubscriptionState::Unconfirmed);

        let frame = op.create_network_package(Uuid::nil());
        let request: SubscribeToStream = frame.decode_payload().unwrap();
        assert_eq!(request.event_stream_id, "orders-1");

        assert_eq!(
            op.inspect_package(confirmation()).decision,
            InspectionDecision::Subscribed
        );
        let confirmed = pending.confirmed.try_recv().unwrap().unwrap();
        assert_eq!(confirmed.last_commit_position, 1200);
        assert_eq!(confirmed.last_event_number, Some(41));
        assert_eq!(*pending.state.borrow(), SubscriptionState::Live);

        assert_eq!(
            op.inspect_package(appeared(42)).decision,
            InspectionDecision::DoNothing
        );
        let event = pending.events.recv().await.unwrap();
        assert_eq!(event.original_event_number(), Some(42));
        assert_eq!(event.position.unwrap().commit, 1342);

        let result = op.inspect_package(dropped(SubscriptionDropReason::AccessDenied));
        assert_eq!(result.decision, InspectionDecision::EndOperation);
        let notification = pending.dropped.await.unwrap();
        assert_eq!(notification.reason, DropReason::AccessDenied);
        assert!(notification.error.is_some());
        assert_eq!(*pending.state.borrow(), SubscriptionState::Dropped);
        // The server ended it, so no unsubscribe is owed.
        assert!(op.teardown_package(Uuid::nil()).is_none());
    }

    #[tokio::test]
    async fn test_drop_before_confirmation_fails_subscribe() {
        let (mut op, pending) = VolatileSubscriptionOperation::new("orders-1", false, None, 8);
        op.inspect_package(dropped(SubscriptionDropReason::NotFound));
        assert!(matches!(
            pending.confirmed.await.unwrap(),
            Err(ClientError::SubscriptionDropped(DropReason::NotFound))
        ));
    }

    #[tokio::test]
    async fn test_overflow_drops_and_unsubscribes() {
        let (mut op, mut pending) = VolatileSubscriptionOperation::new("orders-1", false, None, 1);
        op.inspect_package(confirmation());
        assert_eq!(
            op.inspect_package(appeared(1)).decision,
            InspectionDecision::DoNothing
        );
        assert_eq!(
            op.inspect_package(appeared(2)).decision,
            InspectionDecision::EndOperation
        );

        let notification = pending.dropped.await.unwrap();
        assert_eq!(notification.reason, DropReason::ProcessingQueueOverflow);
        let teardown = op.teardown_package(Uuid::nil()).unwrap();
        assert_eq!(teardown.command, TcpCommand::UnsubscribeFromStream);
        // The event delivered before the overflow is still readable.
        assert!(pending.events.recv().await.is_some());
    }

    #[test]
    fn test_cancelled_when_handle_dropped() {
        let (mut op, pending) = VolatileSubscriptionOperation::new("orders-1", false, None, 8);
        assert!(!op.is_cancelled());
        op.inspect_package(confirmation());
        let PendingSubscription { events, .. } = pending;
        drop(events);
        assert!(op.is_cancelled());
    }

    #[tokio::test]
    async fn test_connection_failure_drops_live_subscription() {
        let (mut op, pending) = VolatileSubscriptionOperation::new("orders-1", false, None, 8);
        op.inspect_package(confirmation());
        op.fail(ClientError::ConnectionClosed);
        let notification = pending.dropped.await.unwrap();
        assert_eq!(notification.reason, DropReason::ConnectionClosed);
        assert!(matches!(notification.error, Some(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_persistent_confirmation_and_delivery() {
        let (mut op, mut pending) =
            PersistentSubscriptionOperation::new("invoices", "billing", 10, None, 8);
        let frame = op.create_network_package(Uuid::nil());
        let request: ConnectToPersistentSubscription = frame.decode_payload().unwrap();
        assert_eq!(request.subscription_id, "billing");
        assert_eq!(request.event_stream_id, "invoices");
        assert_eq!(request.allowed_in_flight_messages, 10);

        op.inspect_package(package(
            InboundMessage::PersistentSubscriptionConfirmation(
                PersistentSubscriptionConfirmation {
                    last_commit_position: 5,
                    subscription_id: "invoices::billing".to_string(),
                    last_event_number: None,
                },
            ),
            TcpCommand::PersistentSubscriptionConfirmation,
        ));
        let confirmed = pending.confirmed.try_recv().unwrap().unwrap();
        assert_eq!(confirmed.subscription_id.as_deref(), Some("invoices::billing"));

        op.inspect_package(package(
            InboundMessage::PersistentSubscriptionStreamEventAppeared(
                PersistentSubscriptionStreamEventAppeared {
                    event: ResolvedIndexedEvent {
                        event: Some(record(3)),
                        link: None,
                    },
                    retry_count: Some(2),
                },
            ),
            TcpCommand::PersistentSubscriptionStreamEventAppeared,
        ));
        let delivery = pending.events.recv().await.unwrap();
        assert_eq!(delivery.retry_count, 2);
        assert_eq!(delivery.event.original_event_number(), Some(3));
    }

    #[test]
    fn test_nak_frame_names_every_id() {
        let acknowledger = Acknowledger::new(
            persistent_subscription_id("invoices", "billing"),
            Uuid::new_v4(),
            ConnectionWriter::default(),
            None,
        );
        let ids = [Uuid::new_v4(), Uuid::new_v4()];
        let frame = acknowledger.nak_frame(&ids, NakAction::Retry, Some("later".to_string()));
        assert_eq!(frame.command, TcpCommand::PersistentSubscriptionNakEvents);
        assert_eq!(frame.correlation_id, acknowledger.correlation_id);

        let nak = PersistentSubscriptionNakEvents::decode(frame.payload.clone()).unwrap();
        assert_eq!(nak.subscription_id, "invoices::billing");
        assert_eq!(nak.action, NakAction::Retry as i32);
        assert_eq!(nak.message.as_deref(), Some("later"));
        assert_eq!(
            nak.processed_event_ids,
            vec![ids[0].as_bytes().to_vec(), ids[1].as_bytes().to_vec()]
        );

        let ack: PersistentSubscriptionAckEvents =
            acknowledger.ack_frame(&ids[..1]).decode_payload().unwrap();
        assert_eq!(ack.processed_event_ids.len(), 1);
    }

    #[test]
    fn test_drop_reason_display() {
        assert_eq!(DropReason::AccessDenied.to_string(), "access denied");
        assert_eq!(
            DropReason::from(SubscriptionDropReason::PersistentSubscriptionDeleted),
            DropReason::SubscriptionDeleted
        );
    }
}
