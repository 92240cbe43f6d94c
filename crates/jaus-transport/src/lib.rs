//! jaus-transport: the Transport Adapter contract (C3).
//!
//! Abstracts the path between a component and its Node Manager. The JAUS
//! reference implementation uses shared memory with a fixed-size ring
//! buffer; this crate only fixes the *contract* the core depends on, not
//! an implementation — a real deployment supplies its own `Transport`.
//! `jaus-test-support::LoopbackTransport` is the one concrete
//! implementation in this workspace, used to drive integration tests.

pub mod error;

pub use error::TransportError;

use jaus_wire::header::Header;

/// Opaque tag identifying which underlying medium/peer a packet arrived on.
/// Transports with a single peer (like the loopback) always report the
/// same tag; transports multiplexing several links use it to let C4 reply
/// on the same path a request arrived on.
pub type MediumTag = u64;

/// Connect/Disconnect signal, fired when the adapter's link to the Node
/// Manager changes state. The core uses this to gate discovery and
/// invalidate all currently-requested subscriptions on disconnect (spec
/// §4.3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

/// Invoked once per inbound message, on an adapter-owned thread, with the
/// raw payload bytes (header included), the already-parsed header, and
/// the medium tag the packet arrived on.
pub type ReceiveCallback = Box<dyn Fn(&[u8], Header, MediumTag) + Send + Sync>;

/// Invoked on every connect/disconnect transition.
pub type ConnectionCallback = Box<dyn Fn(ConnectionEvent) + Send + Sync>;

/// The contract C4 depends on to move bytes to and from the Node Manager.
///
/// Implementations own their own worker thread(s) for reading the medium
/// and invoking the receive callback; `send` only guarantees local
/// handoff, not wire delivery.
pub trait Transport: Send + Sync {
    /// Enqueue a fully serialized message stream (header + body) for
    /// transmission. Returns once the stream has been handed to the
    /// adapter's outbound buffer, not once it has left the wire.
    fn send(&self, stream: &[u8]) -> Result<(), TransportError>;

    /// Register the callback invoked for every inbound message. Only one
    /// callback is supported; registering a second replaces the first.
    fn set_receive_callback(&self, callback: ReceiveCallback);

    /// Register the callback invoked on connect/disconnect transitions.
    fn set_connection_callback(&self, callback: ConnectionCallback);

    /// Current connection state, for callers that need to poll rather
    /// than wait on the connection callback.
    fn is_connected(&self) -> bool;
}
