//! High-level client API.

use crate::catchup::{CatchUpSettings, CatchUpSubscription};
use crate::config::{ClientSettings, ConfigError};
use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use crate::metadata::{metastream_of, StreamMetadata, StreamMetadataResult, METADATA_EVENT_TYPE};
use crate::operation::{OneShotOperation, OperationSpec};
use crate::operations::{
    AppendToStream, CommitTransaction, CreatePersistentSubscription, DeletePersistentSubscription,
    DeleteStream, Ping, ReadAllEvents, ReadEvent, ReadStreamEvents, StartTransaction,
    TransactionalWrite, UpdatePersistentSubscription,
};
use crate::subscription::{
    PendingSubscription, PersistentSubscription, PersistentSubscriptionOperation,
    SubscriptionConfirmed, SubscriptionGuard, VolatileSubscription, VolatileSubscriptionOperation,
};
use crate::types::{
    AllEventsSlice, DeleteResult, EventData, EventReadResult, EventReadStatus, ExpectedVersion,
    PersistentSubscriptionSettings, Position, ReadDirection, SliceReadStatus, StreamEventsSlice,
    StreamPosition, WriteResult, MAX_READ_SIZE,
};
use evstore_protocol::Credentials;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// High-level client for an event store server.
///
/// Cloning is cheap; clones share one connection.
#[derive(Clone)]
pub struct Client {
    conn: Arc<Connection>,
    driver: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
            driver: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a client from layered settings.
    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ConfigError> {
        Ok(Self::new(settings.connection_config()?))
    }

    /// Connects to the server and starts the background driver.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await?;
        self.spawn_driver();
        Ok(())
    }

    /// Runs the client over an already established transport.
    ///
    /// The transport cannot be reopened, so the client does not reconnect.
    pub async fn connect_stream<S>(&self, stream: S) -> Result<(), ClientError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        self.conn.connect_stream(stream).await?;
        self.spawn_driver();
        Ok(())
    }

    fn spawn_driver(&self) {
        let handle = tokio::spawn(self.conn.clone().run());
        if let Some(previous) = self.driver.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await?;
        let driver = self.driver.lock().take();
        if let Some(handle) = driver {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    fn credentials(&self, credentials: Option<Credentials>) -> Option<Credentials> {
        credentials.or_else(|| self.conn.config().credentials.clone())
    }

    fn require_master(&self) -> bool {
        self.conn.config().require_master
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    async fn execute<S: OperationSpec>(
        &self,
        spec: S,
        credentials: Option<Credentials>,
    ) -> Result<S::Output, ClientError> {
        let name = spec.name();
        let (operation, rx) = OneShotOperation::new(spec, self.credentials(credentials));
        let correlation_id = self.conn.submit(Box::new(operation)).await?;

        match tokio::time::timeout(self.conn.config().operation_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                tracing::warn!(%correlation_id, operation = name, "operation timed out");
                self.conn.dispatcher().remove(correlation_id);
                Err(ClientError::Timeout)
            }
        }
    }

    async fn await_confirmation(
        &self,
        correlation_id: Uuid,
        confirmed: &mut oneshot::Receiver<Result<SubscriptionConfirmed, ClientError>>,
    ) -> Result<SubscriptionConfirmed, ClientError> {
        match tokio::time::timeout(self.conn.config().operation_timeout, confirmed).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.conn.dispatcher().remove(correlation_id);
                Err(ClientError::Timeout)
            }
        }
    }

    fn subscription_guard<T>(
        &self,
        correlation_id: Uuid,
        credentials: Option<Credentials>,
        pending: &PendingSubscription<T>,
    ) -> SubscriptionGuard {
        SubscriptionGuard::new(
            correlation_id,
            self.conn.dispatcher().clone(),
            self.conn.writer(),
            credentials,
            pending.state.clone(),
        )
    }

    // =========================================================================
    // System operations
    // =========================================================================

    /// Pings the server.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.execute(Ping, None).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Appends events to a stream.
    pub async fn append_to_stream(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        events: &[EventData],
        credentials: Option<Credentials>,
    ) -> Result<WriteResult, ClientError> {
        let spec = AppendToStream::new(stream, expected_version, events, self.require_master());
        self.execute(spec, credentials).await
    }

    /// Deletes a stream. A hard delete removes it for good.
    pub async fn delete_stream(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        hard_delete: bool,
        credentials: Option<Credentials>,
    ) -> Result<DeleteResult, ClientError> {
        let spec = DeleteStream::new(stream, expected_version, hard_delete, self.require_master());
        self.execute(spec, credentials).await
    }

    /// Opens a transaction on a stream.
    pub async fn start_transaction(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        credentials: Option<Credentials>,
    ) -> Result<Transaction, ClientError> {
        let credentials = self.credentials(credentials);
        let spec = StartTransaction::new(stream, expected_version, self.require_master());
        let transaction_id = self.execute(spec, credentials.clone()).await?;
        Ok(Transaction {
            client: self.clone(),
            transaction_id,
            stream: stream.to_string(),
            expected_version,
            credentials,
            completed: false,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads a single event. `StreamPosition::END` reads the last one.
    pub async fn read_event(
        &self,
        stream: &str,
        event_number: i64,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<EventReadResult, ClientError> {
        let spec = ReadEvent::new(stream, event_number, resolve_link_tos, self.require_master());
        self.execute(spec, credentials).await
    }

    /// Reads one page forward.
    pub async fn read_stream_events_forward(
        &self,
        stream: &str,
        start: i64,
        count: usize,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<StreamEventsSlice, ClientError> {
        self.read_stream_page(
            stream,
            start,
            count,
            ReadDirection::Forward,
            resolve_link_tos,
            credentials,
        )
        .await
    }

    /// Reads one page backward.
    pub async fn read_stream_events_backward(
        &self,
        stream: &str,
        start: i64,
        count: usize,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<StreamEventsSlice, ClientError> {
        self.read_stream_page(
            stream,
            start,
            count,
            ReadDirection::Backward,
            resolve_link_tos,
            credentials,
        )
        .await
    }

    async fn read_stream_page(
        &self,
        stream: &str,
        start: i64,
        count: usize,
        direction: ReadDirection,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<StreamEventsSlice, ClientError> {
        let max_count = page_size(count)?;
        let spec = ReadStreamEvents::new(
            stream,
            start,
            max_count,
            direction,
            resolve_link_tos,
            self.require_master(),
        );
        self.execute(spec, credentials).await
    }

    /// Reads up to `count` events, issuing as many requests as needed.
    ///
    /// The merged slice starts at `start` and carries the cursor and
    /// end-of-stream flag of the last page.
    pub async fn read_stream_events(
        &self,
        stream: &str,
        start: i64,
        count: usize,
        direction: ReadDirection,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<StreamEventsSlice, ClientError> {
        if count == 0 {
            return Err(ClientError::InvalidArgument(
                "count must be positive".to_string(),
            ));
        }
        let credentials = self.credentials(credentials);
        let mut events = Vec::new();
        let mut cursor = start;

        loop {
            let wanted = (count - events.len()).min(MAX_READ_SIZE);
            let page = self
                .read_stream_page(
                    stream,
                    cursor,
                    wanted,
                    direction,
                    resolve_link_tos,
                    credentials.clone(),
                )
                .await?;

            if page.status != SliceReadStatus::Success && events.is_empty() {
                return Ok(StreamEventsSlice {
                    from_event_number: start,
                    ..page
                });
            }

            let received = page.events.len();
            events.extend(page.events);
            let done = page.status != SliceReadStatus::Success
                || page.is_end_of_stream
                || received == 0
                || events.len() >= count;

            if done {
                events.truncate(count);
                return Ok(StreamEventsSlice {
                    status: page.status,
                    stream: page.stream,
                    from_event_number: start,
                    direction,
                    events,
                    next_event_number: page.next_event_number,
                    last_event_number: page.last_event_number,
                    is_end_of_stream: page.is_end_of_stream,
                });
            }

            tracing::debug!(
                stream,
                received,
                next = page.next_event_number,
                "continuing paginated read"
            );
            cursor = page.next_event_number;
        }
    }

    /// Reads one page of `$all` forward.
    pub async fn read_all_events_forward(
        &self,
        position: Position,
        max_count: usize,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<AllEventsSlice, ClientError> {
        let spec = ReadAllEvents::new(
            position,
            page_size(max_count)?,
            ReadDirection::Forward,
            resolve_link_tos,
            self.require_master(),
        );
        self.execute(spec, credentials).await
    }

    /// Reads one page of `$all` backward.
    pub async fn read_all_events_backward(
        &self,
        position: Position,
        max_count: usize,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<AllEventsSlice, ClientError> {
        let spec = ReadAllEvents::new(
            position,
            page_size(max_count)?,
            ReadDirection::Backward,
            resolve_link_tos,
            self.require_master(),
        );
        self.execute(spec, credentials).await
    }

    // =========================================================================
    // Stream metadata
    // =========================================================================

    /// Writes stream metadata as a new `$metadata` event in `$$<stream>`.
    pub async fn set_stream_metadata(
        &self,
        stream: &str,
        expected_metastream_version: ExpectedVersion,
        metadata: &StreamMetadata,
        credentials: Option<Credentials>,
    ) -> Result<WriteResult, ClientError> {
        let event = EventData::json(METADATA_EVENT_TYPE, metadata)?;
        self.append_to_stream(
            &metastream_of(stream),
            expected_metastream_version,
            &[event],
            credentials,
        )
        .await
    }

    /// Reads the latest stream metadata.
    pub async fn get_stream_metadata(
        &self,
        stream: &str,
        credentials: Option<Credentials>,
    ) -> Result<StreamMetadataResult, ClientError> {
        let read = self
            .read_event(&metastream_of(stream), StreamPosition::END, false, credentials)
            .await?;

        let mut result = StreamMetadataResult {
            stream: stream.to_string(),
            is_stream_deleted: false,
            metastream_version: -1,
            metadata: StreamMetadata::default(),
        };
        match read.status {
            EventReadStatus::Success => {
                if let Some(event) = read.event.as_ref().and_then(|e| e.original_event()) {
                    result.metastream_version = event.event_number;
                    if !event.data.is_empty() {
                        result.metadata = event.data_as()?;
                    }
                }
            }
            EventReadStatus::StreamDeleted => result.is_stream_deleted = true,
            EventReadStatus::NotFound | EventReadStatus::NoStream => {}
        }
        Ok(result)
    }

    // =========================================================================
    // Persistent subscription management
    // =========================================================================

    pub async fn create_persistent_subscription(
        &self,
        stream: &str,
        group: &str,
        settings: PersistentSubscriptionSettings,
        credentials: Option<Credentials>,
    ) -> Result<(), ClientError> {
        self.execute(
            CreatePersistentSubscription::new(stream, group, settings),
            credentials,
        )
        .await
    }

    pub async fn update_persistent_subscription(
        &self,
        stream: &str,
        group: &str,
        settings: PersistentSubscriptionSettings,
        credentials: Option<Credentials>,
    ) -> Result<(), ClientError> {
        self.execute(
            UpdatePersistentSubscription::new(stream, group, settings),
            credentials,
        )
        .await
    }

    pub async fn delete_persistent_subscription(
        &self,
        stream: &str,
        group: &str,
        credentials: Option<Credentials>,
    ) -> Result<(), ClientError> {
        self.execute(DeletePersistentSubscription::new(stream, group), credentials)
            .await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribes to new events of one stream. Resolves once confirmed.
    pub async fn subscribe_to_stream(
        &self,
        stream: &str,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<VolatileSubscription, ClientError> {
        let credentials = self.credentials(credentials);
        let (operation, mut pending) = VolatileSubscriptionOperation::new(
            stream,
            resolve_link_tos,
            credentials.clone(),
            self.conn.config().max_live_queue_size,
        );
        let correlation_id = self.conn.submit(Box::new(operation)).await?;
        let confirmed = self
            .await_confirmation(correlation_id, &mut pending.confirmed)
            .await?;
        tracing::debug!(%correlation_id, stream, "subscription confirmed");
        let guard = self.subscription_guard(correlation_id, credentials, &pending);
        Ok(VolatileSubscription::new(stream.to_string(), confirmed, pending, guard))
    }

    /// Subscribes to new events of every stream.
    pub async fn subscribe_to_all(
        &self,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<VolatileSubscription, ClientError> {
        self.subscribe_to_stream("", resolve_link_tos, credentials)
            .await
    }

    /// Joins a persistent subscription group.
    pub async fn connect_to_persistent_subscription(
        &self,
        stream: &str,
        group: &str,
        buffer_size: i32,
        credentials: Option<Credentials>,
    ) -> Result<PersistentSubscription, ClientError> {
        let credentials = self.credentials(credentials);
        let (operation, mut pending) = PersistentSubscriptionOperation::new(
            stream,
            group,
            buffer_size,
            credentials.clone(),
            self.conn.config().max_live_queue_size,
        );
        let correlation_id = self.conn.submit(Box::new(operation)).await?;
        let confirmed = self
            .await_confirmation(correlation_id, &mut pending.confirmed)
            .await?;
        tracing::debug!(%correlation_id, stream, group, "persistent subscription confirmed");
        let guard = self.subscription_guard(correlation_id, credentials, &pending);
        Ok(PersistentSubscription::new(
            stream.to_string(),
            group.to_string(),
            confirmed,
            pending,
            guard,
        ))
    }

    /// Reads history after `last_checkpoint`, then follows live events.
    pub fn subscribe_to_stream_from(
        &self,
        stream: &str,
        last_checkpoint: Option<i64>,
        settings: CatchUpSettings,
        credentials: Option<Credentials>,
    ) -> CatchUpSubscription {
        CatchUpSubscription::start(
            self.clone(),
            stream.to_string(),
            last_checkpoint,
            settings,
            self.credentials(credentials),
        )
    }

    /// Catch-up settings derived from the connection configuration.
    pub fn catch_up_settings(&self) -> CatchUpSettings {
        let config = self.conn.config();
        CatchUpSettings {
            read_batch_size: (config.read_batch_size.max(1) as usize).min(MAX_READ_SIZE),
            max_live_queue_size: config.max_live_queue_size,
            resolve_link_tos: false,
        }
    }
}

fn page_size(count: usize) -> Result<i32, ClientError> {
    if count == 0 || count > MAX_READ_SIZE {
        return Err(ClientError::InvalidArgument(format!(
            "page size must be between 1 and {}, got {}",
            MAX_READ_SIZE, count
        )));
    }
    Ok(count as i32)
}

/// An open transaction on one stream.
///
/// Commit or roll back exactly once; afterwards every call fails with
/// [`ClientError::TransactionCompleted`].
pub struct Transaction {
    client: Client,
    transaction_id: i64,
    stream: String,
    expected_version: ExpectedVersion,
    credentials: Option<Credentials>,
    completed: bool,
}

impl Transaction {
    pub fn transaction_id(&self) -> i64 {
        self.transaction_id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.completed {
            return Err(ClientError::TransactionCompleted(self.transaction_id));
        }
        Ok(())
    }

    /// Adds events to the transaction.
    pub async fn write(&mut self, events: &[EventData]) -> Result<(), ClientError> {
        self.ensure_open()?;
        let spec = TransactionalWrite::new(
            self.transaction_id,
            self.stream.clone(),
            self.expected_version,
            events,
            self.client.require_master(),
        );
        self.client.execute(spec, self.credentials.clone()).await
    }

    /// Commits every written event atomically.
    pub async fn commit(&mut self) -> Result<WriteResult, ClientError> {
        self.ensure_open()?;
        self.completed = true;
        let spec = CommitTransaction::new(
            self.transaction_id,
            self.stream.clone(),
            self.expected_version,
            self.client.require_master(),
        );
        self.client.execute(spec, self.credentials.clone()).await
    }

    /// Abandons the transaction. The server discards uncommitted writes.
    pub fn rollback(&mut self) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.completed = true;
        tracing::debug!(transaction_id = self.transaction_id, "transaction rolled back");
        Ok(())
    }
}
