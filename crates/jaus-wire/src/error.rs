use std::fmt;

/// Errors raised while decoding bytes off the wire.
///
/// Wire-decode errors are local: the malformed bytes are dropped by the
/// caller and no peer notification is sent (JAUS has no link-layer NACK
/// beyond the optional header ack/nack bit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The header failed one of the validity rules in the data model
    /// (zero-byte address, reserved bits set, unsupported version, ...).
    InvalidHeader(String),
    /// Fewer bytes were available than the field being decoded requires.
    ShortRead,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::InvalidHeader(s) => write!(f, "invalid header: {}", s),
            WireError::ShortRead => write!(f, "short read"),
        }
    }
}

impl std::error::Error for WireError {}
