//! Connection management.

use crate::dispatcher::{DispatchAction, Dispatcher, RetryPolicy};
use crate::error::ClientError;
use crate::operation::Operation;
use crate::stream::ClientStream;
use crate::subscription::DEFAULT_MAX_LIVE_QUEUE_SIZE;
use evstore_protocol::message::IdentifyClient;
use evstore_protocol::{
    Credentials, DispatchTable, Frame, InboundMessage, InboundPackage, ReadBuffer, TcpCommand,
    CLIENT_VERSION,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// TLS configuration for client connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsClientConfig {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If None, the bundled web roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Skip server certificate verification (INSECURE - development only).
    pub insecure: bool,
    /// Server name for SNI (defaults to the endpoint's IP).
    pub server_name: Option<String>,
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self.enabled = true;
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self.enabled = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Caller-level deadline of one-shot operations.
    pub operation_timeout: Duration,
    /// Name announced in `IdentifyClient`.
    pub connection_name: Option<String>,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Default credentials; also used to authenticate the connection.
    pub credentials: Option<Credentials>,
    /// TLS configuration (optional).
    pub tls: Option<TlsClientConfig>,
    /// Silence after which the client sends its own heartbeat.
    pub heartbeat_interval: Duration,
    /// Further silence after which the connection is considered dead.
    pub heartbeat_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_reconnections: u32,
    pub reconnection_delay: Duration,
    /// Capacity of each subscription's event channel.
    pub max_live_queue_size: usize,
    /// Page size of catch-up subscriptions' history reads.
    pub read_batch_size: i32,
    /// Reject writes and reads served by a non-master node.
    pub require_master: bool,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(30),
            connection_name: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            credentials: None,
            tls: None,
            heartbeat_interval: Duration::from_millis(750),
            heartbeat_timeout: Duration::from_millis(1500),
            retry: RetryPolicy::default(),
            max_reconnections: 10,
            reconnection_delay: Duration::from_millis(100),
            max_live_queue_size: DEFAULT_MAX_LIVE_QUEUE_SIZE,
            read_batch_size: 500,
            require_master: true,
        }
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reconnection(mut self, max_reconnections: u32, delay: Duration) -> Self {
        self.max_reconnections = max_reconnections;
        self.reconnection_delay = delay;
        self
    }

    pub fn with_max_live_queue_size(mut self, size: usize) -> Self {
        self.max_live_queue_size = size.max(1);
        self
    }

    pub fn with_read_batch_size(mut self, size: i32) -> Self {
        self.read_batch_size = size.max(1);
        self
    }

    pub fn with_require_master(mut self, require_master: bool) -> Self {
        self.require_master = require_master;
        self
    }

    fn tls_enabled(&self) -> bool {
        self.tls.as_ref().is_some_and(|tls| tls.enabled)
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Serializes every outbound frame of one connection.
#[derive(Clone, Default)]
pub struct ConnectionWriter {
    inner: Arc<Mutex<Option<BoxedWriter>>>,
}

impl ConnectionWriter {
    /// Encodes and writes one frame.
    pub async fn send(&self, frame: &Frame) -> Result<(), ClientError> {
        let encoded = frame.encode()?;
        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        tracing::debug!(
            correlation_id = %frame.correlation_id,
            command = %frame.command,
            bytes = encoded.len(),
            "sent frame"
        );
        Ok(())
    }

    async fn attach(&self, writer: BoxedWriter) {
        *self.inner.lock().await = Some(writer);
    }

    async fn detach(&self) {
        if let Some(mut writer) = self.inner.lock().await.take() {
            tracing::debug!("Shutting down writer");
            let _ = writer.shutdown().await;
        }
    }

    pub async fn is_attached(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

struct ReaderState {
    stream: BoxedReader,
    buffer: ReadBuffer,
}

/// Why [`Connection::read_loop`] returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLoopExit {
    /// An operation asked to move to the master at this address.
    Redirect(SocketAddr),
    /// [`Connection::close`] was called.
    Closed,
}

/// A connection to an event store server.
pub struct Connection {
    config: ConnectionConfig,
    writer: ConnectionWriter,
    /// Read half plus its reassembly buffer.
    reader: Mutex<Option<ReaderState>>,
    dispatcher: Arc<Dispatcher>,
    connected: AtomicBool,
    closing: AtomicBool,
    /// False for caller-supplied transports, which cannot be reopened.
    reconnectable: AtomicBool,
    endpoint: parking_lot::Mutex<SocketAddr>,
    shutdown: Notify,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.retry));
        let endpoint = parking_lot::Mutex::new(config.addr);
        Self {
            config,
            writer: ConnectionWriter::default(),
            reader: Mutex::new(None),
            dispatcher,
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            reconnectable: AtomicBool::new(true),
            endpoint,
            shutdown: Notify::new(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn writer(&self) -> ConnectionWriter {
        self.writer.clone()
    }

    /// Address of the node currently connected to.
    pub fn endpoint(&self) -> SocketAddr {
        *self.endpoint.lock()
    }

    /// Connects to the configured server and performs the handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.closing.store(false, Ordering::SeqCst);
        self.reconnectable.store(true, Ordering::SeqCst);
        self.open(self.config.addr).await
    }

    /// Runs the protocol over an already established transport.
    pub async fn connect_stream<S>(&self, stream: S) -> Result<(), ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.closing.store(false, Ordering::SeqCst);
        self.reconnectable.store(false, Ordering::SeqCst);
        self.attach(stream).await;
        self.handshake().await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn open(&self, addr: SocketAddr) -> Result<(), ClientError> {
        tracing::debug!(%addr, "connecting");
        let stream =
            ClientStream::connect(addr, self.config.tls.as_ref(), self.config.connect_timeout)
                .await?;

        self.attach(stream).await;
        self.handshake().await?;
        *self.endpoint.lock() = addr;
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(%addr, tls = self.config.tls_enabled(), "connected");
        Ok(())
    }

    async fn attach<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        self.writer.attach(Box::new(write_half)).await;
        *self.reader.lock().await = Some(ReaderState {
            stream: Box::new(read_half),
            buffer: ReadBuffer::new(DispatchTable::new()),
        });
    }

    /// Identifies the client and, with default credentials, authenticates.
    /// Replies are read directly since the read loop isn't running yet.
    async fn handshake(&self) -> Result<(), ClientError> {
        let mut guard = self.reader.lock().await;
        let state = guard.as_mut().ok_or(ClientError::NotConnected)?;

        let identify = IdentifyClient {
            version: CLIENT_VERSION,
            connection_name: self.config.connection_name.clone(),
        };
        let id = Uuid::new_v4();
        self.writer
            .send(&Frame::from_message(TcpCommand::IdentifyClient, id, &identify))
            .await?;
        let reply = self.await_reply(state, id).await?;
        match reply.message {
            InboundMessage::ClientIdentified => {}
            other => return Err(handshake_error("IdentifyClient", reply.command, other)),
        }

        if let Some(ref credentials) = self.config.credentials {
            tracing::debug!(username = credentials.username(), "Authenticating...");
            let id = Uuid::new_v4();
            let frame = Frame::empty(TcpCommand::Authenticate, id)
                .with_credentials(Some(credentials.clone()));
            self.writer.send(&frame).await?;
            let reply = self.await_reply(state, id).await?;
            match reply.message {
                InboundMessage::Authenticated => {}
                other => return Err(handshake_error("Authenticate", reply.command, other)),
            }
        }

        tracing::debug!("Handshake complete");
        Ok(())
    }

    /// Reads until a package for `correlation_id` arrives, leaving every
    /// other package queued.
    async fn await_reply(
        &self,
        state: &mut ReaderState,
        correlation_id: Uuid,
    ) -> Result<InboundPackage, ClientError> {
        tokio::time::timeout(
            self.config.operation_timeout,
            read_reply(state, correlation_id, self.config.read_buffer_size),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Handshake timeout");
            ClientError::Timeout
        })?
    }

    /// Registers `operation` and sends its request.
    pub async fn submit(&self, operation: Box<dyn Operation>) -> Result<Uuid, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let correlation_id = Uuid::new_v4();
        let frame = self.dispatcher.register(correlation_id, operation)?;
        if let Err(err) = self.writer.send(&frame).await {
            self.dispatcher.remove(correlation_id);
            return Err(err);
        }
        Ok(correlation_id)
    }

    /// Reads, answers heartbeats and dispatches replies until the
    /// transport fails or the connection is closed.
    pub async fn read_loop(&self) -> Result<ReadLoopExit, ClientError> {
        let mut guard = self.reader.lock().await;
        let state = guard.as_mut().ok_or(ClientError::NotConnected)?;
        let mut buf = vec![0u8; self.config.read_buffer_size];
        let mut heartbeat_sent = false;

        for package in state.buffer.drain() {
            if let Some(exit) = self.process(package).await? {
                return Ok(exit);
            }
        }

        loop {
            let wait = if heartbeat_sent {
                self.config.heartbeat_timeout
            } else {
                self.config.heartbeat_interval
            };
            let read = tokio::select! {
                _ = self.shutdown.notified() => {
                    if self.is_closing() {
                        return Ok(ReadLoopExit::Closed);
                    }
                    continue;
                }
                read = tokio::time::timeout(wait, state.stream.read(&mut buf)) => read,
            };

            let n = match read {
                Ok(result) => result?,
                Err(_) if heartbeat_sent => {
                    tracing::warn!("no heartbeat from server");
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(ClientError::HeartbeatTimeout);
                }
                Err(_) => {
                    let id = Uuid::new_v4();
                    tracing::trace!(correlation_id = %id, "sending heartbeat request");
                    self.writer
                        .send(&Frame::empty(TcpCommand::HeartbeatRequest, id))
                        .await?;
                    heartbeat_sent = true;
                    continue;
                }
            };

            if n == 0 {
                tracing::debug!("read_loop: connection closed");
                self.connected.store(false, Ordering::SeqCst);
                return Err(ClientError::ConnectionClosed);
            }
            heartbeat_sent = false;

            // Packages decoded ahead of a corrupt frame are still dispatched.
            let extended = state.buffer.extend(&buf[..n]);
            while let Some(package) = state.buffer.next_package() {
                if let Some(exit) = self.process(package).await? {
                    return Ok(exit);
                }
            }
            if let Err(err) = extended {
                self.connected.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        }
    }

    async fn process(&self, package: InboundPackage) -> Result<Option<ReadLoopExit>, ClientError> {
        let correlation_id = package.correlation_id;
        match package.message {
            InboundMessage::HeartbeatRequest => {
                tracing::trace!(%correlation_id, "answering heartbeat");
                self.writer
                    .send(&Frame::empty(TcpCommand::HeartbeatResponse, correlation_id))
                    .await?;
                Ok(None)
            }
            InboundMessage::HeartbeatResponse => {
                tracing::trace!(%correlation_id, "heartbeat response");
                Ok(None)
            }
            InboundMessage::Ping => {
                self.writer
                    .send(&Frame::empty(TcpCommand::Pong, correlation_id))
                    .await?;
                Ok(None)
            }
            _ => match self.dispatcher.handle(package) {
                DispatchAction::None => Ok(None),
                DispatchAction::Send(frame) => {
                    self.writer.send(&frame).await?;
                    Ok(None)
                }
                DispatchAction::Resend { frame, delay } => {
                    let writer = self.writer.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Err(err) = writer.send(&frame).await {
                            tracing::warn!(
                                correlation_id = %frame.correlation_id,
                                error = %err,
                                "retry send failed"
                            );
                        }
                    });
                    Ok(None)
                }
                DispatchAction::Reconnect(master) => {
                    let addr = master.select(self.config.tls_enabled());
                    tracing::warn!(%addr, "redirected to master");
                    Ok(Some(ReadLoopExit::Redirect(addr)))
                }
            },
        }
    }

    /// Reopens the connection to `addr` and resends pending requests.
    pub async fn reconnect(&self, addr: SocketAddr) -> Result<(), ClientError> {
        self.connected.store(false, Ordering::SeqCst);
        self.writer.detach().await;
        let frames = self.dispatcher.prepare_reconnect();

        let mut attempt = 0;
        loop {
            attempt += 1;
            tokio::time::sleep(self.config.reconnection_delay).await;
            if self.is_closing() {
                return Err(ClientError::ConnectionClosed);
            }
            match self.open(addr).await {
                Ok(()) => break,
                Err(err) if attempt < self.config.max_reconnections => {
                    tracing::warn!(%addr, attempt, error = %err, "reconnect failed");
                }
                Err(err) => {
                    tracing::error!(%addr, attempt, error = %err, "giving up reconnecting");
                    return Err(err);
                }
            }
        }

        tracing::debug!(%addr, resent = frames.len(), "reconnected");
        for frame in &frames {
            self.writer.send(frame).await?;
        }
        Ok(())
    }

    /// Drives the read loop and reconnects after failures until closed.
    pub async fn run(self: Arc<Self>) {
        loop {
            let exit = self.read_loop().await;
            if self.is_closing() {
                break;
            }
            let addr = match exit {
                Ok(ReadLoopExit::Closed) => break,
                Ok(ReadLoopExit::Redirect(addr)) => addr,
                Err(err) => {
                    tracing::warn!(error = %err, "connection lost");
                    self.endpoint()
                }
            };
            if !self.reconnectable.load(Ordering::SeqCst) || self.config.max_reconnections == 0 {
                break;
            }
            if self.reconnect(addr).await.is_err() {
                break;
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        self.dispatcher.fail_all(|| ClientError::ConnectionClosed);
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Closes the connection and fails everything still pending.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");

        self.closing.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();

        self.writer.detach().await;
        let _ = self.reader.lock().await.take();

        tracing::debug!(
            "Clearing {} pending requests",
            self.dispatcher.pending_count()
        );
        self.dispatcher.fail_all(|| ClientError::ConnectionClosed);

        tracing::debug!("Connection closed");
        Ok(())
    }

    /// Returns the number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending_count()
    }
}

async fn read_reply(
    state: &mut ReaderState,
    correlation_id: Uuid,
    buffer_size: usize,
) -> Result<InboundPackage, ClientError> {
    let mut buf = vec![0u8; buffer_size];
    loop {
        if let Some(package) = state.buffer.take_for(correlation_id).into_iter().next() {
            return Ok(package);
        }
        let n = state.stream.read(&mut buf).await?;
        if n == 0 {
            tracing::debug!("Connection closed (0 bytes)");
            return Err(ClientError::ConnectionClosed);
        }
        state.buffer.extend(&buf[..n])?;
    }
}

fn handshake_error(
    operation: &'static str,
    command: TcpCommand,
    message: InboundMessage,
) -> ClientError {
    match message {
        InboundMessage::NotAuthenticated(reason) => ClientError::NotAuthenticated(reason),
        InboundMessage::BadRequest(reason) => ClientError::BadRequest(reason),
        _ => ClientError::UnexpectedCommand { operation, command },
    }
}
