//! Command codes carried in byte 0 of every frame body.

use crate::error::ProtocolError;
use std::fmt;

/// One-byte command codes of the TCP protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TcpCommand {
    // Connection keep-alive
    HeartbeatRequest = 0x01,
    HeartbeatResponse = 0x02,
    Ping = 0x03,
    Pong = 0x04,

    // Writes
    WriteEvents = 0x82,
    WriteEventsCompleted = 0x83,
    TransactionStart = 0x84,
    TransactionStartCompleted = 0x85,
    TransactionWrite = 0x86,
    TransactionWriteCompleted = 0x87,
    TransactionCommit = 0x88,
    TransactionCommitCompleted = 0x89,
    DeleteStream = 0x8A,
    DeleteStreamCompleted = 0x8B,

    // Reads
    ReadEvent = 0xB0,
    ReadEventCompleted = 0xB1,
    ReadStreamEventsForward = 0xB2,
    ReadStreamEventsForwardCompleted = 0xB3,
    ReadStreamEventsBackward = 0xB4,
    ReadStreamEventsBackwardCompleted = 0xB5,
    ReadAllEventsForward = 0xB6,
    ReadAllEventsForwardCompleted = 0xB7,
    ReadAllEventsBackward = 0xB8,
    ReadAllEventsBackwardCompleted = 0xB9,

    // Subscriptions
    SubscribeToStream = 0xC0,
    SubscriptionConfirmation = 0xC1,
    StreamEventAppeared = 0xC2,
    UnsubscribeFromStream = 0xC3,
    SubscriptionDropped = 0xC4,
    ConnectToPersistentSubscription = 0xC5,
    PersistentSubscriptionConfirmation = 0xC6,
    PersistentSubscriptionStreamEventAppeared = 0xC7,
    CreatePersistentSubscription = 0xC8,
    CreatePersistentSubscriptionCompleted = 0xC9,
    DeletePersistentSubscription = 0xCA,
    DeletePersistentSubscriptionCompleted = 0xCB,
    PersistentSubscriptionAckEvents = 0xCC,
    PersistentSubscriptionNakEvents = 0xCD,
    UpdatePersistentSubscription = 0xCE,
    UpdatePersistentSubscriptionCompleted = 0xCF,

    // Session and errors
    BadRequest = 0xF0,
    NotHandled = 0xF1,
    Authenticate = 0xF2,
    Authenticated = 0xF3,
    NotAuthenticated = 0xF4,
    IdentifyClient = 0xF5,
    ClientIdentified = 0xF6,
}

impl TcpCommand {
    /// Parses a wire command byte.
    pub fn from_u8(code: u8) -> Result<Self, ProtocolError> {
        use TcpCommand::*;
        let command = match code {
            0x01 => HeartbeatRequest,
            0x02 => HeartbeatResponse,
            0x03 => Ping,
            0x04 => Pong,
            0x82 => WriteEvents,
            0x83 => WriteEventsCompleted,
            0x84 => TransactionStart,
            0x85 => TransactionStartCompleted,
            0x86 => TransactionWrite,
            0x87 => TransactionWriteCompleted,
            0x88 => TransactionCommit,
            0x89 => TransactionCommitCompleted,
            0x8A => DeleteStream,
            0x8B => DeleteStreamCompleted,
            0xB0 => ReadEvent,
            0xB1 => ReadEventCompleted,
            0xB2 => ReadStreamEventsForward,
            0xB3 => ReadStreamEventsForwardCompleted,
            0xB4 => ReadStreamEventsBackward,
            0xB5 => ReadStreamEventsBackwardCompleted,
            0xB6 => ReadAllEventsForward,
            0xB7 => ReadAllEventsForwardCompleted,
            0xB8 => ReadAllEventsBackward,
            0xB9 => ReadAllEventsBackwardCompleted,
            0xC0 => SubscribeToStream,
            0xC1 => SubscriptionConfirmation,
            0xC2 => StreamEventAppeared,
            0xC3 => UnsubscribeFromStream,
            0xC4 => SubscriptionDropped,
            0xC5 => ConnectToPersistentSubscription,
            0xC6 => PersistentSubscriptionConfirmation,
            0xC7 => PersistentSubscriptionStreamEventAppeared,
            0xC8 => CreatePersistentSubscription,
            0xC9 => CreatePersistentSubscriptionCompleted,
            0xCA => DeletePersistentSubscription,
            0xCB => DeletePersistentSubscriptionCompleted,
            0xCC => PersistentSubscriptionAckEvents,
            0xCD => PersistentSubscriptionNakEvents,
            0xCE => UpdatePersistentSubscription,
            0xCF => UpdatePersistentSubscriptionCompleted,
            0xF0 => BadRequest,
            0xF1 => NotHandled,
            0xF2 => Authenticate,
            0xF3 => Authenticated,
            0xF4 => NotAuthenticated,
            0xF5 => IdentifyClient,
            0xF6 => ClientIdentified,
            other => return Err(ProtocolError::UnknownCommand(other)),
        };
        Ok(command)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for TcpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl TryFrom<u8> for TcpCommand {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_u8(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_byte_roundtrip() {
        for code in 0u8..=255 {
            if let Ok(command) = TcpCommand::from_u8(code) {
                assert_eq!(command.as_u8(), code);
            }
        }
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(TcpCommand::WriteEvents.as_u8(), 0x82);
        assert_eq!(TcpCommand::PersistentSubscriptionNakEvents.as_u8(), 0xCD);
        assert_eq!(
            TcpCommand::from_u8(0xF1).unwrap(),
            TcpCommand::NotHandled
        );
    }

    #[test]
    fn test_unknown_code() {
        assert!(matches!(
            TcpCommand::from_u8(0x99),
            Err(ProtocolError::UnknownCommand(0x99))
        ));
    }
}
