//! Catch-up subscriptions: history first, then live events.

use crate::client::Client;
use crate::error::ClientError;
use crate::subscription::{
    drop_reason_for, DropReason, SubscriptionDropped, SubscriptionState, VolatileSubscription,
    DEFAULT_MAX_LIVE_QUEUE_SIZE,
};
use crate::types::{ResolvedEvent, SliceReadStatus};
use evstore_protocol::Credentials;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Settings of a catch-up subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchUpSettings {
    /// Events requested per history read.
    pub read_batch_size: usize,
    /// Capacity of the channel between the subscription and its consumer.
    pub max_live_queue_size: usize,
    pub resolve_link_tos: bool,
}

impl Default for CatchUpSettings {
    fn default() -> Self {
        Self {
            read_batch_size: 500,
            max_live_queue_size: DEFAULT_MAX_LIVE_QUEUE_SIZE,
            resolve_link_tos: false,
        }
    }
}

/// Handle of a running catch-up subscription.
///
/// Events arrive in stream order and each event number is delivered at
/// most once, whether it was read from history or pushed live.
pub struct CatchUpSubscription {
    stream: String,
    events: mpsc::Receiver<ResolvedEvent>,
    dropped: oneshot::Receiver<SubscriptionDropped>,
    state: watch::Receiver<SubscriptionState>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CatchUpSubscription {
    pub(crate) fn start(
        client: Client,
        stream: String,
        last_checkpoint: Option<i64>,
        settings: CatchUpSettings,
        credentials: Option<Credentials>,
    ) -> Self {
        let (events_tx, events) = mpsc::channel(settings.max_live_queue_size.max(1));
        let (dropped_tx, dropped) = oneshot::channel();
        let (state_tx, state) = watch::channel(SubscriptionState::Unconfirmed);
        let (stop, stop_rx) = watch::channel(false);

        let driver = CatchUpDriver {
            client,
            stream: stream.clone(),
            settings,
            credentials,
            events: events_tx,
            state: state_tx,
            stop: stop_rx,
            last_delivered: last_checkpoint,
        };
        let task = tokio::spawn(driver.run(dropped_tx));

        Self {
            stream,
            events,
            dropped,
            state,
            stop,
            task,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// `Unconfirmed` while reading history, `Live` once caught up.
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Next event, or `None` once the subscription is dropped and drained.
    pub async fn next(&mut self) -> Option<ResolvedEvent> {
        self.events.recv().await
    }

    /// Stops the subscription. The drop reason is `Unsubscribed`.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Waits for the drop notification. Undrained events keep the
    /// subscription waiting on the consumer.
    pub async fn dropped(self) -> SubscriptionDropped {
        let Self {
            events,
            dropped,
            task,
            ..
        } = self;
        let outcome = dropped.await;
        drop(events);
        let _ = task.await;
        outcome.unwrap_or(SubscriptionDropped {
            reason: DropReason::ConnectionClosed,
            error: None,
        })
    }
}

struct CatchUpDriver {
    client: Client,
    stream: String,
    settings: CatchUpSettings,
    credentials: Option<Credentials>,
    events: mpsc::Sender<ResolvedEvent>,
    state: watch::Sender<SubscriptionState>,
    stop: watch::Receiver<bool>,
    last_delivered: Option<i64>,
}

fn unsubscribed() -> SubscriptionDropped {
    SubscriptionDropped {
        reason: DropReason::Unsubscribed,
        error: None,
    }
}

fn catch_up_error(error: ClientError) -> SubscriptionDropped {
    SubscriptionDropped {
        reason: DropReason::CatchUpError,
        error: Some(error),
    }
}

/// Resolves once a stop is requested or the handle is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

impl CatchUpDriver {
    async fn run(mut self, dropped: oneshot::Sender<SubscriptionDropped>) {
        let notification = self.catch_up().await;
        match &notification.error {
            Some(error) => tracing::warn!(
                stream = %self.stream,
                reason = %notification.reason,
                %error,
                "catch-up subscription dropped"
            ),
            None => tracing::debug!(
                stream = %self.stream,
                reason = %notification.reason,
                "catch-up subscription dropped"
            ),
        }
        self.state.send_replace(SubscriptionState::Dropped);
        let _ = dropped.send(notification);
    }

    async fn catch_up(&mut self) -> SubscriptionDropped {
        if let Err(dropped) = self.read_history().await {
            return dropped;
        }

        let mut live = match self
            .client
            .subscribe_to_stream(
                &self.stream,
                self.settings.resolve_link_tos,
                self.credentials.clone(),
            )
            .await
        {
            Ok(live) => live,
            Err(error) => {
                return SubscriptionDropped {
                    reason: drop_reason_for(&error),
                    error: Some(error),
                }
            }
        };

        // Events appended between the last read and the confirmation.
        if let Err(dropped) = self.read_history().await {
            let _ = live.unsubscribe().await;
            return dropped;
        }

        tracing::debug!(
            stream = %self.stream,
            last_delivered = ?self.last_delivered,
            "catch-up subscription is live"
        );
        self.state.send_replace(SubscriptionState::Live);

        match self.follow(&mut live).await {
            Ok(()) => live.dropped().await,
            Err(dropped) => {
                let _ = live.unsubscribe().await;
                dropped
            }
        }
    }

    /// Reads forward from the last delivered event to the end of the stream.
    async fn read_history(&mut self) -> Result<(), SubscriptionDropped> {
        let mut cursor = self.last_delivered.map_or(0, |n| n + 1);
        loop {
            if *self.stop.borrow() {
                return Err(unsubscribed());
            }

            let page = self
                .client
                .read_stream_events_forward(
                    &self.stream,
                    cursor,
                    self.settings.read_batch_size,
                    self.settings.resolve_link_tos,
                    self.credentials.clone(),
                )
                .await
                .map_err(catch_up_error)?;

            match page.status {
                SliceReadStatus::Success => {}
                SliceReadStatus::StreamNotFound => return Ok(()),
                SliceReadStatus::StreamDeleted => {
                    return Err(catch_up_error(ClientError::StreamDeleted(
                        self.stream.clone(),
                    )))
                }
            }

            let received = page.events.len();
            for event in page.events {
                self.deliver(event).await?;
            }
            if page.is_end_of_stream || received == 0 {
                return Ok(());
            }
            cursor = page.next_event_number;
        }
    }

    async fn follow(&mut self, live: &mut VolatileSubscription) -> Result<(), SubscriptionDropped> {
        loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => return Err(unsubscribed()),
                next = live.next() => match next {
                    Some(event) => self.deliver(event).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    async fn deliver(&mut self, event: ResolvedEvent) -> Result<(), SubscriptionDropped> {
        if let Some(number) = event.original_event_number() {
            if self.last_delivered.is_some_and(|last| number <= last) {
                tracing::trace!(stream = %self.stream, number, "skipping delivered event");
                return Ok(());
            }
            self.last_delivered = Some(number);
        }

        tokio::select! {
            biased;
            _ = stop_requested(&mut self.stop) => Err(unsubscribed()),
            sent = self.events.send(event) => sent.map_err(|_| unsubscribed()),
        }
    }
}
