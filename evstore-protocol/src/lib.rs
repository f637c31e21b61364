//! # evstore-protocol
//!
//! Wire protocol implementation for the event store TCP interface.
//!
//! This crate provides:
//! - Length-prefixed framing with correlation ids and optional credentials
//! - Command codes and frame flags
//! - Protobuf message types for every request and reply
//! - The inbound dispatch table and the reassembling read buffer

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod inbound;
pub mod message;

pub use codec::ReadBuffer;
pub use command::TcpCommand;
pub use error::ProtocolError;
pub use frame::{Credentials, Frame, FrameFlags, FRAME_HEADER_SIZE, LENGTH_PREFIX_SIZE};
pub use inbound::{DispatchTable, InboundMessage, InboundPackage};

/// Client protocol version announced in `IdentifyClient`.
pub const CLIENT_VERSION: i32 = 1;

/// Default TCP port of the server.
pub const DEFAULT_PORT: u16 = 1113;

/// Maximum frame body size (64 MiB), excluding the length prefix.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;
