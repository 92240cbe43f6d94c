//! Unified error kinds for the subscription engine (spec §7).

use std::fmt;

use jaus_messages::MessageError;
use jaus_transport::TransportError;
use jaus_wire::WireError;

#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    InvalidHeader(String),
    ShortRead,
    UnknownCommandCode(u16),
    InvalidPresenceVector { code: u16, mask: u16, got: u16 },
    UnsupportedVersion,
    Timeout,
    TransportFull,
    NotConnected,
    AuthorityDenied,
    ServiceConnectionRefused(u8),
    EventRefused(u8),
    UnknownSubscription,
    InstanceIdExhausted,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidHeader(s) => write!(f, "invalid header: {}", s),
            CoreError::ShortRead => write!(f, "short read"),
            CoreError::UnknownCommandCode(code) => write!(f, "unknown command code 0x{:04X}", code),
            CoreError::InvalidPresenceVector { code, mask, got } => write!(
                f,
                "presence vector 0x{:04X} not a subset of mask 0x{:04X} for code 0x{:04X}",
                got, mask, code
            ),
            CoreError::UnsupportedVersion => write!(f, "unsupported protocol version"),
            CoreError::Timeout => write!(f, "request timed out"),
            CoreError::TransportFull => write!(f, "transport outbound buffer is full"),
            CoreError::NotConnected => write!(f, "transport is not connected"),
            CoreError::AuthorityDenied => write!(f, "sender authority too low"),
            CoreError::ServiceConnectionRefused(code) => write!(f, "service connection refused, code {}", code),
            CoreError::EventRefused(code) => write!(f, "event request refused, code {}", code),
            CoreError::UnknownSubscription => write!(f, "no matching subscription"),
            CoreError::InstanceIdExhausted => write!(f, "no instance ID available for this message code"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<WireError> for CoreError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::InvalidHeader(s) => CoreError::InvalidHeader(s),
            WireError::ShortRead => CoreError::ShortRead,
        }
    }
}

impl From<MessageError> for CoreError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::UnknownCode(code) => CoreError::UnknownCommandCode(code),
            MessageError::ShortRead => CoreError::ShortRead,
            MessageError::InvalidPresenceVector { code, mask, got } => {
                CoreError::InvalidPresenceVector { code, mask, got }
            }
        }
    }
}

impl From<TransportError> for CoreError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Full => CoreError::TransportFull,
            TransportError::NotConnected => CoreError::NotConnected,
        }
    }
}
