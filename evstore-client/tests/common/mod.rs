//! Scripted in-memory server for client tests.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use evstore_client::{Client, ConnectionConfig};
use evstore_protocol::message::{EventRecord, ResolvedIndexedEvent};
use evstore_protocol::{Frame, TcpCommand};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use uuid::Uuid;

pub fn config() -> ConnectionConfig {
    ConnectionConfig::new("127.0.0.1:1113".parse().unwrap())
        .with_operation_timeout(Duration::from_secs(5))
        .with_heartbeat(Duration::from_secs(60), Duration::from_secs(60))
}

/// Server end of a scripted transport, in-memory unless stated otherwise.
pub struct FakeServer<S = DuplexStream> {
    stream: S,
    buf: BytesMut,
}

impl FakeServer<tokio::net::TcpStream> {
    /// Accepts the next client on `listener` and answers its handshake.
    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("no client connected")
            .unwrap();
        let mut server = Self::new(stream);
        server.accept_handshake().await;
        server
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FakeServer<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Next frame written by the client, heartbeats included.
    pub async fn recv_any(&mut self) -> Frame {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buf).unwrap() {
                return frame;
            }
            let mut chunk = [0u8; 4096];
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut chunk))
                .await
                .expect("client went quiet")
                .unwrap();
            assert!(n > 0, "client closed the transport");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Next non-heartbeat frame written by the client.
    pub async fn recv(&mut self) -> Frame {
        loop {
            let frame = self.recv_any().await;
            match frame.command {
                TcpCommand::HeartbeatRequest | TcpCommand::HeartbeatResponse => continue,
                _ => return frame,
            }
        }
    }

    /// Next frame, which must carry `command`.
    pub async fn expect(&mut self, command: TcpCommand) -> Frame {
        let frame = self.recv().await;
        assert_eq!(frame.command, command, "unexpected frame {:?}", frame);
        frame
    }

    pub async fn send(&mut self, frame: Frame) {
        self.stream
            .write_all(&frame.encode().unwrap())
            .await
            .unwrap();
    }

    /// Writes raw bytes in a single write.
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn reply<M: prost::Message>(&mut self, command: TcpCommand, id: Uuid, message: &M) {
        self.send(Frame::from_message(command, id, message)).await;
    }

    pub async fn reply_raw(&mut self, command: TcpCommand, id: Uuid, payload: &'static [u8]) {
        self.send(Frame::new(command, id, Bytes::from_static(payload)))
            .await;
    }

    /// Answers IdentifyClient.
    pub async fn accept_handshake(&mut self) {
        let identify = self.expect(TcpCommand::IdentifyClient).await;
        self.send(Frame::empty(
            TcpCommand::ClientIdentified,
            identify.correlation_id,
        ))
        .await;
    }
}

/// A client connected to a fresh scripted server.
pub async fn connect(config: ConnectionConfig) -> (Client, FakeServer) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let handshake = tokio::spawn(async move {
        let mut server = FakeServer::new(server_io);
        server.accept_handshake().await;
        server
    });

    let client = Client::new(config);
    client.connect_stream(client_io).await.unwrap();
    (client, handshake.await.unwrap())
}

pub fn record(stream: &str, number: i64) -> EventRecord {
    EventRecord {
        event_stream_id: stream.to_string(),
        event_number: number,
        event_id: Uuid::new_v4().as_bytes().to_vec(),
        event_type: "OrderPlaced".to_string(),
        data_content_type: 1,
        metadata_content_type: 0,
        data: format!("{{\"n\":{}}}", number).into_bytes(),
        metadata: None,
        created: None,
        created_epoch: Some(1_700_000_000_000),
    }
}

pub fn indexed(stream: &str, number: i64) -> ResolvedIndexedEvent {
    ResolvedIndexedEvent {
        event: Some(record(stream, number)),
        link: None,
    }
}
