use std::fmt;

/// Errors raised while looking up or (de)serializing a registered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// No registry entry for this command code.
    UnknownCode(u16),
    /// Fewer bytes were available than the message body requires.
    ShortRead,
    /// The presence vector carries a bit outside the registered mask for
    /// this command code and protocol version.
    InvalidPresenceVector { code: u16, mask: u16, got: u16 },
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::UnknownCode(code) => write!(f, "unknown command code 0x{:04X}", code),
            MessageError::ShortRead => write!(f, "short read while decoding message body"),
            MessageError::InvalidPresenceVector { code, mask, got } => write!(
                f,
                "presence vector 0x{:04X} not a subset of mask 0x{:04X} for code 0x{:04X}",
                got, mask, code
            ),
        }
    }
}

impl std::error::Error for MessageError {}
