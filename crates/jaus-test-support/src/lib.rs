//! jaus-test-support: a concrete `Transport` for driving integration
//! tests end-to-end, without a real Node Manager.
//!
//! `LoopbackTransport::pair` returns two linked transports standing in
//! for two components attached to the same (simulated) Node Manager
//! ring buffer, mirroring the bounded shared-memory channel the JAUS
//! reference architecture describes — default capacity is ten
//! max-size packets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use jaus_transport::{ConnectionCallback, ConnectionEvent, ReceiveCallback, Transport, TransportError};
use jaus_wire::header::Header;
use jaus_wire::Address;
use tracing::{debug, warn};

/// Packet slots held by the simulated ring buffer before `send` starts
/// returning `TransportError::Full`.
pub const DEFAULT_CAPACITY: usize = 10;

struct Shared {
    outbound: SyncSender<Vec<u8>>,
    connected: AtomicBool,
    receive_callback: Mutex<Option<ReceiveCallback>>,
    connection_callback: Mutex<Option<ConnectionCallback>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// One end of an in-process loopback link.
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    /// Build two linked transports, each delivering what the other sends.
    pub fn pair() -> (Arc<LoopbackTransport>, Arc<LoopbackTransport>) {
        Self::pair_with_capacity(DEFAULT_CAPACITY)
    }

    pub fn pair_with_capacity(capacity: usize) -> (Arc<LoopbackTransport>, Arc<LoopbackTransport>) {
        let (tx_a_to_b, rx_a_to_b) = sync_channel(capacity);
        let (tx_b_to_a, rx_b_to_a) = sync_channel(capacity);

        let a = LoopbackTransport::new(tx_a_to_b);
        let b = LoopbackTransport::new(tx_b_to_a);

        a.spawn_reader(rx_b_to_a);
        b.spawn_reader(rx_a_to_b);

        (Arc::new(a), Arc::new(b))
    }

    fn new(outbound: SyncSender<Vec<u8>>) -> LoopbackTransport {
        LoopbackTransport {
            shared: Arc::new(Shared {
                outbound,
                connected: AtomicBool::new(true),
                receive_callback: Mutex::new(None),
                connection_callback: Mutex::new(None),
                reader: Mutex::new(None),
            }),
        }
    }

    fn spawn_reader(&self, inbound: Receiver<Vec<u8>>) {
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("loopback-transport-reader".into())
            .spawn(move || {
                while let Ok(stream) = inbound.recv() {
                    let header = match Header::decode(&stream) {
                        Ok((header, _rest)) => header,
                        Err(err) => {
                            warn!(?err, "loopback transport dropped an undecodable packet");
                            continue;
                        }
                    };
                    let callback = shared.receive_callback.lock().expect("receive_callback poisoned");
                    if let Some(callback) = callback.as_ref() {
                        callback(&stream, header, 0);
                    } else {
                        debug!("loopback transport received a packet with no callback registered");
                    }
                }
            })
            .expect("failed to spawn loopback transport reader thread");
        *self.shared.reader.lock().expect("reader poisoned") = Some(handle);
    }

    /// Simulate the Node Manager link dropping: flips to disconnected and
    /// fires the connection callback. Does not stop the reader thread —
    /// dropping the peer's sender closes its channel, which is what
    /// actually ends the reader loop.
    pub fn disconnect(&self) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            if let Some(callback) = self.shared.connection_callback.lock().expect("connection_callback poisoned").as_ref() {
                callback(ConnectionEvent::Disconnected);
            }
        }
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, stream: &[u8]) -> Result<(), TransportError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        match self.shared.outbound.try_send(stream.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::Full),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::NotConnected),
        }
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        *self.shared.receive_callback.lock().expect("receive_callback poisoned") = Some(callback);
    }

    fn set_connection_callback(&self, callback: ConnectionCallback) {
        if self.shared.connected.load(Ordering::SeqCst) {
            callback(ConnectionEvent::Connected);
        }
        *self.shared.connection_callback.lock().expect("connection_callback poisoned") = Some(callback);
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

/// An in-process stand-in for the Node Manager's shared-memory segment
/// shared by every component on a (simulated) node: routes each outbound
/// stream to its header's destination address, the way a real Node
/// Manager fans a single ring buffer out to many local components.
/// `LoopbackTransport::pair` is enough for a two-party exchange; anything
/// with three or more components (S1-S4) needs this instead.
struct BusShared {
    routes: Mutex<HashMap<Address, SyncSender<Vec<u8>>>>,
}

pub struct LoopbackBus {
    shared: Arc<BusShared>,
}

impl LoopbackBus {
    pub fn new() -> Arc<LoopbackBus> {
        Arc::new(LoopbackBus {
            shared: Arc::new(BusShared {
                routes: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Attach a new component at `address`, returning its transport handle.
    pub fn connect(self: &Arc<Self>, address: Address) -> Arc<LoopbackBusTransport> {
        self.connect_with_capacity(address, DEFAULT_CAPACITY)
    }

    pub fn connect_with_capacity(self: &Arc<Self>, address: Address, capacity: usize) -> Arc<LoopbackBusTransport> {
        let (tx, rx) = sync_channel(capacity);
        self.shared.routes.lock().expect("routes poisoned").insert(address, tx);
        let transport = Arc::new(LoopbackBusTransport {
            address,
            bus: Arc::clone(self),
            connected: AtomicBool::new(true),
            receive_callback: Mutex::new(None),
            connection_callback: Mutex::new(None),
            reader: Mutex::new(None),
        });
        transport.spawn_reader(rx);
        transport
    }

    fn route(&self, destination: Address) -> Option<SyncSender<Vec<u8>>> {
        self.shared.routes.lock().expect("routes poisoned").get(&destination).cloned()
    }

    fn remove(&self, address: Address) {
        self.shared.routes.lock().expect("routes poisoned").remove(&address);
    }
}

pub struct LoopbackBusTransport {
    address: Address,
    bus: Arc<LoopbackBus>,
    connected: AtomicBool,
    receive_callback: Mutex<Option<ReceiveCallback>>,
    connection_callback: Mutex<Option<ConnectionCallback>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackBusTransport {
    fn spawn_reader(self: &Arc<Self>, inbound: Receiver<Vec<u8>>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("loopback-bus-reader".into())
            .spawn(move || {
                while let Ok(stream) = inbound.recv() {
                    let header = match Header::decode(&stream) {
                        Ok((header, _rest)) => header,
                        Err(err) => {
                            warn!(?err, "loopback bus dropped an undecodable packet");
                            continue;
                        }
                    };
                    let callback = this.receive_callback.lock().expect("receive_callback poisoned");
                    if let Some(callback) = callback.as_ref() {
                        callback(&stream, header, 0);
                    } else {
                        debug!("loopback bus received a packet with no callback registered");
                    }
                }
            })
            .expect("failed to spawn loopback bus reader thread");
        *self.reader.lock().expect("reader poisoned") = Some(handle);
    }

    /// Simulate this component dropping off the bus: unroutes it and
    /// fires its own connection callback. Other attached components are
    /// unaffected until they try to address this one.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.bus.remove(self.address);
            if let Some(callback) = self.connection_callback.lock().expect("connection_callback poisoned").as_ref() {
                callback(ConnectionEvent::Disconnected);
            }
        }
    }
}

impl Transport for LoopbackBusTransport {
    fn send(&self, stream: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let (header, _rest) = Header::decode(stream).map_err(|_| TransportError::NotConnected)?;
        let sender = self.bus.route(header.destination).ok_or(TransportError::NotConnected)?;
        match sender.try_send(stream.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::Full),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::NotConnected),
        }
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        *self.receive_callback.lock().expect("receive_callback poisoned") = Some(callback);
    }

    fn set_connection_callback(&self, callback: ConnectionCallback) {
        if self.connected.load(Ordering::SeqCst) {
            callback(ConnectionEvent::Connected);
        }
        *self.connection_callback.lock().expect("connection_callback poisoned") = Some(callback);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
