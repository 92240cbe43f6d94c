use std::fmt;

/// Errors a transport adapter implementation may report back to C4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The adapter's outbound ring buffer has no room for another packet.
    Full,
    /// `send` was called while the Node Manager link is down.
    NotConnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Full => write!(f, "transport outbound buffer is full"),
            TransportError::NotConnected => write!(f, "transport is not connected"),
        }
    }
}

impl std::error::Error for TransportError {}
