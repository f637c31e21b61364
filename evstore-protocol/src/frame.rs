//! Binary frame format of the TCP protocol.
//!
//! Frame layout (4 bytes length prefix + 18 bytes header + optional
//! credentials + payload):
//!
//! ```text
//! +------------+---------+-------+----------------+
//! | length     | command | flags | correlation id |
//! | 4 bytes LE | 1 byte  | 1 byte|    16 bytes    |
//! +------------+---------+-------+----------------+
//! | [ulen | username | plen | password] | payload |
//! |  only when flags & AUTHENTICATED    |         |
//! +-------------------------------------+---------+
//! ```
//!
//! `length` counts every byte after the prefix itself.

use crate::command::TcpCommand;
use crate::error::ProtocolError;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use uuid::Uuid;

/// Size of the little-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the fixed frame header: command + flags + correlation id.
pub const FRAME_HEADER_SIZE: usize = 1 + 1 + 16;

/// Frame flags bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Credentials follow the header.
    pub const AUTHENTICATED: u8 = 1 << 0;
    /// Write comes from a trusted source (server-internal use).
    pub const TRUSTED_WRITE: u8 = 1 << 1;

    const VALID_MASK: u8 = 0x03;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_authenticated(mut self) -> Self {
        self.0 |= Self::AUTHENTICATED;
        self
    }

    pub fn with_trusted_write(mut self) -> Self {
        self.0 |= Self::TRUSTED_WRITE;
        self
    }

    fn without_authenticated(mut self) -> Self {
        self.0 &= !Self::AUTHENTICATED;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.0 & Self::AUTHENTICATED != 0
    }

    pub fn is_trusted_write(&self) -> bool {
        self.0 & Self::TRUSTED_WRITE != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Result<Self, ProtocolError> {
        if bits & !Self::VALID_MASK != 0 {
            return Err(ProtocolError::InvalidFlags(bits));
        }
        Ok(Self(bits))
    }
}

/// Username and password sent inline with an authenticated frame.
///
/// Both parts are length-prefixed by a single byte on the wire, so each is
/// limited to 255 bytes of UTF-8.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let username = username.into();
        let password = password.into();
        if username.len() > u8::MAX as usize {
            return Err(ProtocolError::CredentialsTooLong {
                field: "username",
                len: username.len(),
            });
        }
        if password.len() > u8::MAX as usize {
            return Err(ProtocolError::CredentialsTooLong {
                field: "password",
                len: password.len(),
            });
        }
        Ok(Self { username, password })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    fn encoded_len(&self) -> usize {
        2 + self.username.len() + self.password.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.username.len() as u8);
        buf.put_slice(self.username.as_bytes());
        buf.put_u8(self.password.len() as u8);
        buf.put_slice(self.password.as_bytes());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let username = read_short_string(buf, "username")?;
        let password = read_short_string(buf, "password")?;
        Ok(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

fn read_short_string(buf: &mut Bytes, field: &'static str) -> Result<String, ProtocolError> {
    if !buf.has_remaining() {
        return Err(ProtocolError::Truncated(field));
    }
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated(field));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}

/// A parsed protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command code.
    pub command: TcpCommand,
    /// Frame flags. The authenticated bit always mirrors `credentials`.
    pub flags: FrameFlags,
    /// Correlation id binding this frame to a request.
    pub correlation_id: Uuid,
    /// Inline credentials (present iff the authenticated flag is set).
    pub credentials: Option<Credentials>,
    /// Command-specific protobuf payload.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame without credentials.
    pub fn new(command: TcpCommand, correlation_id: Uuid, payload: Bytes) -> Self {
        Self {
            command,
            flags: FrameFlags::new(),
            correlation_id,
            credentials: None,
            payload,
        }
    }

    /// Creates a frame whose payload is the encoded protobuf message.
    pub fn from_message<M: prost::Message>(
        command: TcpCommand,
        correlation_id: Uuid,
        message: &M,
    ) -> Self {
        Self::new(command, correlation_id, Bytes::from(message.encode_to_vec()))
    }

    /// Creates a frame with an empty payload.
    pub fn empty(command: TcpCommand, correlation_id: Uuid) -> Self {
        Self::new(command, correlation_id, Bytes::new())
    }

    /// Attaches credentials, setting the authenticated flag.
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.flags = match credentials {
            Some(_) => self.flags.with_authenticated(),
            None => self.flags.without_authenticated(),
        };
        self.credentials = credentials;
        self
    }

    /// Length of the frame body, i.e. the value written in the prefix.
    pub fn body_len(&self) -> usize {
        let auth_len = self
            .credentials
            .as_ref()
            .map(Credentials::encoded_len)
            .unwrap_or(0);
        FRAME_HEADER_SIZE + auth_len + self.payload.len()
    }

    /// Encodes the frame, including its length prefix.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let body_len = self.body_len();
        if body_len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body_len);
        buf.put_u32_le(body_len as u32);
        buf.put_u8(self.command.as_u8());

        let flags = match self.credentials {
            Some(_) => self.flags.with_authenticated(),
            None => self.flags.without_authenticated(),
        };
        buf.put_u8(flags.bits());
        buf.put_slice(self.correlation_id.as_bytes());

        if let Some(ref credentials) = self.credentials {
            credentials.encode(&mut buf);
        }

        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Reads and validates a length prefix.
    pub fn read_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize, ProtocolError> {
        let length = u32::from_le_bytes(prefix) as usize;
        if length < FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort {
                length,
                min: FRAME_HEADER_SIZE,
            });
        }
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(length)
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let length = Self::read_length([buf[0], buf[1], buf[2], buf[3]])?;
        if buf.len() < LENGTH_PREFIX_SIZE + length {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let body = buf.split_to(length).freeze();
        Self::from_body(body).map(Some)
    }

    /// Parses a frame body (everything after the length prefix).
    pub fn from_body(mut body: Bytes) -> Result<Self, ProtocolError> {
        if body.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort {
                length: body.len(),
                min: FRAME_HEADER_SIZE,
            });
        }

        let command = TcpCommand::from_u8(body.get_u8())?;
        let flags = FrameFlags::from_bits(body.get_u8())?;

        let mut id = [0u8; 16];
        body.copy_to_slice(&mut id);
        let correlation_id = Uuid::from_bytes(id);

        let credentials = if flags.is_authenticated() {
            Some(Credentials::decode(&mut body)?)
        } else {
            None
        };

        Ok(Self {
            command,
            flags,
            correlation_id,
            credentials,
            payload: body,
        })
    }

    /// Decodes the payload as a protobuf message.
    pub fn decode_payload<M: prost::Message + Default>(&self) -> Result<M, ProtocolError> {
        Ok(M::decode(self.payload.clone())?)
    }
}
