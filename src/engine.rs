//! Send/Receive Engine (C4): header construction, multi-packet
//! split/reassembly, pending-receipt bookkeeping, and the inbound
//! dispatch chain (spec §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use jaus_messages::messages::event::{
    CancelEvent, ConfirmEventRequest, CreateEventRequest, EventEnvelope, EventRequestBody, EventResponseCode,
    EventType, RejectEventRequest, UpdateEvent,
};
use jaus_messages::messages::service_connection::{
    ActivateServiceConnection, ConfirmCode, ConfirmServiceConnection, CreateServiceConnection,
    SuspendServiceConnection, TerminateServiceConnection,
};
use jaus_messages::{codes, Message, Registry};
use jaus_transport::Transport;
use jaus_wire::header::{AckNack, DataControl, Header, Priority, Version};
use jaus_wire::{Address, EXPERIMENTAL_CODE_MIN, MAX_SINGLE_PACKET_DATA};
use tracing::{debug, trace, warn};

use crate::component::Counters;
use crate::discovery::{DiscoveryEngine, Platform};
use crate::error::CoreError;
use crate::events::{EventId, EventManager, SubscribedEvent};
use crate::service_connections::{RequestedServiceConnection, ScStatus, ServiceConnectionTable};

/// Outcome of the user-supplied `process_event_request` hook.
#[derive(Debug, Clone)]
pub enum EventAdmissionDecision {
    Ok { confirmed_rate_hz: Option<f64> },
    Reject { response_code: EventResponseCode, error_message: String },
}

/// Outcome of the user-supplied `process_sc_request` hook.
#[derive(Debug, Clone, Copy)]
pub enum ScAdmissionDecision {
    Ok { confirmed_rate_hz: f64 },
    Reject { response_code: ConfirmCode },
}

type EventRequestHook = dyn Fn(&EventRequestBody, Address) -> EventAdmissionDecision + Send + Sync;
type ScRequestHook = dyn Fn(&CreateServiceConnection, Address) -> ScAdmissionDecision + Send + Sync;
type DiscoveryHook = dyn Fn(Platform, crate::discovery::DiscoveryEvent) + Send + Sync;
type DeliverHook = dyn Fn(Address, Box<dyn Message>) + Send + Sync;
type ReEstablishEventHook = dyn Fn(&crate::events::SubscribedEvent) -> bool + Send + Sync;
type ReEstablishScHook = dyn Fn(&crate::service_connections::RequestedServiceConnection) -> bool + Send + Sync;
/// Produces a fresh message for `(message_code, presence_vector_filter)`,
/// for periodic/HPT generation of produced events and service connections.
type GenerateHook = dyn Fn(u16, u16) -> Box<dyn Message> + Send + Sync;

/// User-overridable hooks. All run outside the core's mutexes, on snapshot
/// copies (spec §5's deadlock-avoidance rule), and all have a permissive
/// default so a component can be stood up without wiring any of them.
pub struct Callbacks {
    pub process_event_request: Arc<EventRequestHook>,
    pub process_sc_request: Arc<ScRequestHook>,
    pub on_discovery: Arc<DiscoveryHook>,
    pub re_establish_event: Arc<ReEstablishEventHook>,
    pub re_establish_sc: Arc<ReEstablishScHook>,
    pub deliver: Arc<DeliverHook>,
    /// `None` means produced periodic/HPT events and service connections
    /// never generate — a component with nothing to publish doesn't need
    /// to supply this.
    pub generate: Option<Arc<GenerateHook>>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Callbacks {
            process_event_request: Arc::new(|request, _requester| EventAdmissionDecision::Ok {
                confirmed_rate_hz: request.requested_rate_hz,
            }),
            process_sc_request: Arc::new(|create, _requester| ScAdmissionDecision::Ok {
                confirmed_rate_hz: create.rate_hz,
            }),
            on_discovery: Arc::new(|_platform, _event| {}),
            re_establish_event: Arc::new(|_event| true),
            re_establish_sc: Arc::new(|_sc| true),
            deliver: Arc::new(|_source, _msg| {}),
            generate: None,
        }
    }
}

/// Correlates an inbound Confirm/Reject with the caller blocked on it.
/// Confirm Service Connection carries no request ID on the wire (spec
/// §6), so SC receipts are keyed by provider address alone — two
/// concurrently outstanding creates to the same provider for different
/// message codes would collide; the reference protocol treats Create/
/// Confirm as a serialized request-reply per provider, so this mirrors
/// that assumption rather than being a shortcut unique to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiptKey {
    EventRequestId(u8),
    ServiceConnection { provider: Address },
}

struct PendingSlot {
    expected_response_codes: Vec<u16>,
    result: Option<Box<dyn Message>>,
}

/// What was asked for in an outstanding `CreateServiceConnection`, kept
/// around because `ConfirmServiceConnection` doesn't carry the message
/// code or presence vector on the wire (spec §6) — recorded into the
/// requested table once the Confirm arrives (spec §4.6, S1).
struct PendingScCreate {
    message_code: u16,
    presence_vector: u16,
}

/// What was asked for in an outstanding `CreateEventRequest`/`UpdateEvent`,
/// keyed by `request_id` (the one correlator the wire does carry) and
/// recorded into the subscribed table once the Confirm arrives.
struct PendingEventCreate {
    message_code: u16,
    event_type: EventType,
}

pub(crate) struct HptHandle {
    pub(crate) quit: Arc<AtomicBool>,
    pub(crate) join: std::thread::JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum HptKey {
    Event { message_code: u16, event_id: EventId },
    Sc { message_code: u16, presence_vector: u16 },
}

#[derive(Default)]
pub(crate) struct HptRegistry {
    pub(crate) timers: HashMap<HptKey, HptHandle>,
}

impl HptRegistry {
    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }
}

/// The subscription engine's shared state, one instance per JAUS
/// component. Construct via `Component::new` (in the crate root), which
/// also registers the receive/connection callbacks with the transport.
pub struct Component {
    pub(crate) address: Address,
    pub(crate) authority: u8,
    pub(crate) node_manager: Address,
    pub(crate) hpt_threshold_hz: f64,
    pub(crate) discovery_ttl: Duration,
    pub(crate) version: Version,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) counters: Counters,
    pub(crate) callbacks: Callbacks,
    pub(crate) registry: Registry,

    pub(crate) sc_mutex: Mutex<ServiceConnectionTable>,
    pub(crate) events_mutex: Mutex<EventManager>,
    pub(crate) discovery_mutex: Mutex<DiscoveryEngine>,
    pub(crate) hpt_mutex: Mutex<HptRegistry>,
    pending_receipts: Mutex<HashMap<ReceiptKey, PendingSlot>>,
    receipt_condvar: Condvar,
    pending_sc_creates: Mutex<HashMap<Address, PendingScCreate>>,
    pending_event_creates: Mutex<HashMap<u8, PendingEventCreate>>,

    reassembly: Mutex<HashMap<(Address, u16), Vec<u8>>>,

    pub(crate) quit: Arc<AtomicBool>,
    pub(crate) subscription_loop: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Component {
    pub(crate) fn new_inner(
        address: Address,
        authority: u8,
        node_manager: Address,
        hpt_threshold_hz: f64,
        discovery_ttl: Duration,
        transport: Arc<dyn Transport>,
        discovery: DiscoveryEngine,
        callbacks: Callbacks,
    ) -> Component {
        Component {
            address,
            authority,
            node_manager,
            hpt_threshold_hz,
            discovery_ttl,
            version: Version::V3_4,
            transport,
            counters: Counters::new(),
            callbacks,
            registry: Registry::new(),
            sc_mutex: Mutex::new(ServiceConnectionTable::new()),
            events_mutex: Mutex::new(EventManager::new()),
            discovery_mutex: Mutex::new(discovery),
            hpt_mutex: Mutex::new(HptRegistry::default()),
            pending_receipts: Mutex::new(HashMap::new()),
            receipt_condvar: Condvar::new(),
            pending_sc_creates: Mutex::new(HashMap::new()),
            pending_event_creates: Mutex::new(HashMap::new()),
            reassembly: Mutex::new(HashMap::new()),
            quit: Arc::new(AtomicBool::new(false)),
            subscription_loop: Mutex::new(None),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    fn reply_priority(&self) -> Priority {
        Priority::new(self.authority)
    }

    /// Serialize and hand `msg` to the transport, splitting into a
    /// First/Normal/.../Last sequence if its encoded body exceeds
    /// `MAX_SINGLE_PACKET_DATA` (spec §4.4, §6).
    pub fn send(&self, destination: Address, msg: &dyn Message, service_connection: bool) -> Result<(), CoreError> {
        self.track_pending_create(destination, msg);
        self.send_impl(destination, msg, service_connection, None)
    }

    /// Deliver a service connection update, stamping the provider's
    /// logical SC sequence number (spec §4.6) onto every packet's header
    /// instead of the ordinary chunk-index numbering — reassembly on the
    /// receiving end keys on `(source, command_code)` and never reads
    /// `sequence_number`, so this is safe even for multi-packet sends.
    pub(crate) fn send_sc(&self, destination: Address, msg: &dyn Message, sequence_number: u16) -> Result<(), CoreError> {
        self.send_impl(destination, msg, true, Some(sequence_number))
    }

    /// Record an outstanding `CreateServiceConnection`/`CreateEventRequest`/
    /// `UpdateEvent` so the table entry can be reconstructed once its
    /// Confirm arrives (spec §4.6, S1) — neither Confirm carries enough of
    /// the original request on the wire to do this any other way.
    fn track_pending_create(&self, destination: Address, msg: &dyn Message) {
        if let Some(create) = msg.as_any().downcast_ref::<CreateServiceConnection>() {
            let mut pending = self.pending_sc_creates.lock().expect("pending_sc_creates poisoned");
            pending.insert(
                destination,
                PendingScCreate {
                    message_code: create.message_code,
                    presence_vector: create.presence_vector_filter,
                },
            );
        } else if let Some(request) = msg.as_any().downcast_ref::<CreateEventRequest>() {
            let mut pending = self.pending_event_creates.lock().expect("pending_event_creates poisoned");
            pending.insert(
                request.0.request_id,
                PendingEventCreate {
                    message_code: request.0.message_code,
                    event_type: request.0.event_type,
                },
            );
        } else if let Some(update) = msg.as_any().downcast_ref::<UpdateEvent>() {
            let mut pending = self.pending_event_creates.lock().expect("pending_event_creates poisoned");
            pending.insert(
                update.0.request_id,
                PendingEventCreate {
                    message_code: update.0.message_code,
                    event_type: update.0.event_type,
                },
            );
        }
    }

    fn send_impl(
        &self,
        destination: Address,
        msg: &dyn Message,
        service_connection: bool,
        sc_sequence: Option<u16>,
    ) -> Result<(), CoreError> {
        let body = self.registry.encode(msg, self.version);
        let command_code = msg.command_code();
        let experimental = command_code >= EXPERIMENTAL_CODE_MIN;

        if body.len() <= MAX_SINGLE_PACKET_DATA {
            let header = Header {
                version: self.version,
                experimental,
                service_connection,
                ack_nack: AckNack::None,
                priority: self.reply_priority(),
                command_code,
                destination,
                source: self.address,
                data_size: body.len() as u16,
                data_flag: DataControl::Single,
                sequence_number: sc_sequence.unwrap_or(0),
            };
            return self.send_stream(&header, &body);
        }

        let chunks: Vec<&[u8]> = body.chunks(MAX_SINGLE_PACKET_DATA).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let data_flag = match i {
                0 => DataControl::First,
                n if n == last => DataControl::Last,
                _ => DataControl::Normal,
            };
            let header = Header {
                version: self.version,
                experimental,
                service_connection,
                ack_nack: AckNack::None,
                priority: self.reply_priority(),
                command_code,
                destination,
                source: self.address,
                data_size: chunk.len() as u16,
                data_flag,
                sequence_number: sc_sequence.unwrap_or(i as u16),
            };
            self.send_stream(&header, chunk)?;
        }
        Ok(())
    }

    fn send_stream(&self, header: &Header, body: &[u8]) -> Result<(), CoreError> {
        let mut stream = Vec::with_capacity(jaus_wire::HEADER_SIZE + body.len());
        stream.extend_from_slice(&header.encode());
        stream.extend_from_slice(body);
        self.transport.send(&stream).map_err(|err| {
            if matches!(err, jaus_transport::TransportError::Full) {
                self.counters.transport_full.fetch_add(1, Ordering::Relaxed);
            }
            CoreError::from(err)
        })
    }

    /// Send `msg`, block up to `timeout_ms` for a reply satisfying one of
    /// `expected_response_codes` under `key`, retransmitting every
    /// `timeout_ms / tries`. Spec §4.4's `send_with_receipt`.
    pub fn send_with_receipt(
        &self,
        destination: Address,
        msg: &dyn Message,
        key: ReceiptKey,
        expected_response_codes: &[u16],
        service_connection: bool,
        timeout_ms: u64,
        tries: u32,
    ) -> Result<Box<dyn Message>, CoreError> {
        let tries = tries.max(1);
        {
            let mut pending = self.pending_receipts.lock().expect("pending_receipts_mutex poisoned");
            pending.insert(
                key,
                PendingSlot {
                    expected_response_codes: expected_response_codes.to_vec(),
                    result: None,
                },
            );
        }

        let per_try = Duration::from_millis((timeout_ms / u64::from(tries)).max(1));
        let result = (|| {
            for attempt in 0..tries {
                trace!(?key, attempt, "send_with_receipt attempt");
                self.send(destination, msg, service_connection)?;

                let mut pending = self.pending_receipts.lock().expect("pending_receipts_mutex poisoned");
                let deadline = Instant::now() + per_try;
                loop {
                    if let Some(slot) = pending.get(&key) {
                        if slot.result.is_some() {
                            return Ok(pending.remove(&key).unwrap().result.unwrap());
                        }
                    }
                    if self.quit.load(Ordering::SeqCst) {
                        return Err(CoreError::Timeout);
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, timeout_result) = self
                        .receipt_condvar
                        .wait_timeout(pending, deadline - now)
                        .expect("pending_receipts_mutex poisoned");
                    pending = guard;
                    if timeout_result.timed_out() {
                        break;
                    }
                }
            }
            self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
            Err(CoreError::Timeout)
        })();

        if result.is_err() {
            self.pending_receipts.lock().expect("pending_receipts_mutex poisoned").remove(&key);
        }
        result
    }

    /// Wake every thread blocked in `send_with_receipt`, used by shutdown
    /// so they observe the quit flag instead of waiting out their deadline.
    pub(crate) fn receipt_condvar_notify(&self) {
        let _pending = self.pending_receipts.lock().expect("pending_receipts_mutex poisoned");
        self.receipt_condvar.notify_all();
    }

    fn fulfill(&self, key: ReceiptKey, response_code: u16, msg: Box<dyn Message>) {
        let mut pending = self.pending_receipts.lock().expect("pending_receipts_mutex poisoned");
        if let Some(slot) = pending.get_mut(&key) {
            if slot.expected_response_codes.contains(&response_code) {
                slot.result = Some(msg);
                self.receipt_condvar.notify_all();
            }
        }
    }

    /// Entry point registered as the transport's receive callback.
    pub(crate) fn on_receive(self: &Arc<Self>, stream: &[u8], header: Header, _tag: jaus_transport::MediumTag) {
        let body = &stream[jaus_wire::HEADER_SIZE.min(stream.len())..];
        match header.data_flag {
            DataControl::Single => self.dispatch_logical(header, body.to_vec()),
            DataControl::First => {
                let mut reassembly = self.reassembly.lock().expect("reassembly poisoned");
                reassembly.insert((header.source, header.command_code), body.to_vec());
            }
            DataControl::Normal | DataControl::Retransmit => {
                let mut reassembly = self.reassembly.lock().expect("reassembly poisoned");
                if let Some(buf) = reassembly.get_mut(&(header.source, header.command_code)) {
                    buf.extend_from_slice(body);
                }
            }
            DataControl::Last => {
                let full = {
                    let mut reassembly = self.reassembly.lock().expect("reassembly poisoned");
                    let mut buf = reassembly.remove(&(header.source, header.command_code)).unwrap_or_default();
                    buf.extend_from_slice(body);
                    buf
                };
                self.dispatch_logical(header, full);
            }
        }
    }

    fn dispatch_logical(self: &Arc<Self>, header: Header, body: Vec<u8>) {
        let msg = match self.registry.decode(header.command_code, header.version, &body) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(?err, code = header.command_code, "failed to decode inbound message");
                match err {
                    jaus_messages::MessageError::UnknownCode(_) => {
                        self.counters.unknown_command_codes.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {
                        self.counters.header_decode_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                return;
            }
        };

        if header.service_connection {
            self.handle_sc_inbound(&header, msg.as_ref());
            return;
        }

        if header.command_code == codes::EVENT {
            self.handle_event_envelope(&header, msg.as_ref());
            return;
        }

        if matches!(
            header.command_code,
            codes::REPORT_SUBSYSTEM_LIST | codes::REPORT_CONFIGURATION | codes::REPORT_IDENTIFICATION | codes::REPORT_SERVICES
        ) {
            self.handle_discovery_inbound(&header, msg.as_ref());
            return;
        }

        self.handle_routed_message(&header, msg);
    }

    /// Fold an inbound discovery report into `DiscoveryEngine` state and
    /// fire `on_discovery` for every subsystem that changed (spec §4.8).
    fn handle_discovery_inbound(self: &Arc<Self>, header: &Header, msg: &dyn Message) {
        use jaus_messages::messages::discovery::{ReportConfiguration, ReportIdentification, ReportServices, ReportSubsystemList};

        match header.command_code {
            codes::REPORT_SUBSYSTEM_LIST => {
                let Some(report) = msg.as_any().downcast_ref::<ReportSubsystemList>() else { return };
                let diff = {
                    let mut discovery = self.discovery_mutex.lock().expect("discovery_mutex poisoned");
                    discovery.apply_subsystem_list(&report.subsystem_ids)
                };
                for id in diff.added {
                    let platform = {
                        let discovery = self.discovery_mutex.lock().expect("discovery_mutex poisoned");
                        discovery.platform(id).cloned().unwrap_or_default()
                    };
                    (self.callbacks.on_discovery)(platform, crate::discovery::DiscoveryEvent::Connect);
                    self.retry_lost_subscriptions(id);
                }
                for id in diff.removed {
                    (self.callbacks.on_discovery)(
                        crate::discovery::Platform {
                            subsystem_id: id,
                            ..Default::default()
                        },
                        crate::discovery::DiscoveryEvent::Disconnect,
                    );
                    self.prune_subsystem(id);
                }
            }
            codes::REPORT_CONFIGURATION => {
                let Some(report) = msg.as_any().downcast_ref::<ReportConfiguration>() else { return };
                let changed = {
                    let mut discovery = self.discovery_mutex.lock().expect("discovery_mutex poisoned");
                    discovery.update_configuration(report.subsystem_id, report.entries.clone())
                };
                self.notify_discovery_update(changed, report.subsystem_id);
            }
            codes::REPORT_IDENTIFICATION => {
                let Some(report) = msg.as_any().downcast_ref::<ReportIdentification>() else { return };
                let changed = {
                    let mut discovery = self.discovery_mutex.lock().expect("discovery_mutex poisoned");
                    discovery.update_identification(report.subsystem_id, report.identification.clone())
                };
                self.notify_discovery_update(changed, report.subsystem_id);
            }
            codes::REPORT_SERVICES => {
                let Some(report) = msg.as_any().downcast_ref::<ReportServices>() else { return };
                let subsystem_id = header.source.subsystem;
                let changed = {
                    let mut discovery = self.discovery_mutex.lock().expect("discovery_mutex poisoned");
                    discovery.update_services(subsystem_id, report.services.clone())
                };
                self.notify_discovery_update(changed, subsystem_id);
            }
            _ => {}
        }
    }

    fn notify_discovery_update(self: &Arc<Self>, changed: bool, subsystem_id: u8) {
        if !changed {
            return;
        }
        let platform = {
            let discovery = self.discovery_mutex.lock().expect("discovery_mutex poisoned");
            discovery.platform(subsystem_id).cloned()
        };
        if let Some(platform) = platform {
            (self.callbacks.on_discovery)(platform, crate::discovery::DiscoveryEvent::Update);
        }
    }

    /// A subsystem vanished: drop every requested SC and subscribed
    /// event whose provider lived there, parking the `re_establish`
    /// ones for `retry_lost_subscriptions` to pick back up (spec §4.8).
    fn prune_subsystem(self: &Arc<Self>, subsystem_id: u8) {
        let providers: Vec<Address> = {
            let sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
            sc.all_requested()
                .into_iter()
                .map(|e| e.provider)
                .filter(|p| p.subsystem == subsystem_id)
                .collect()
        };
        {
            let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
            for provider in providers {
                sc.prune_provider(provider);
            }
        }

        let providers: Vec<Address> = {
            let events = self.events_mutex.lock().expect("events_mutex poisoned");
            events
                .all_subscribed()
                .into_iter()
                .map(|e| e.provider)
                .filter(|p| p.subsystem == subsystem_id)
                .collect()
        };
        let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
        for provider in providers {
            events.prune_provider(provider);
        }
    }

    /// A subsystem reappeared: re-request every SC and event that was
    /// parked under it when it disappeared (spec §4.8).
    fn retry_lost_subscriptions(self: &Arc<Self>, subsystem_id: u8) {
        let sc_providers = self.sc_mutex.lock().expect("sc_mutex poisoned").lost_providers(subsystem_id);
        for provider in sc_providers {
            let lost = {
                let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
                let lost = sc.lost_requested_for(provider);
                sc.clear_lost_requested_for(provider);
                lost
            };
            for sc in lost {
                self.re_request_sc(&sc);
            }
        }

        let event_providers = self.events_mutex.lock().expect("events_mutex poisoned").lost_providers(subsystem_id);
        for provider in event_providers {
            let lost = {
                let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
                let lost = events.lost_events_for(provider);
                events.clear_lost_events_for(provider);
                lost
            };
            for event in lost {
                self.re_request_event(&event);
            }
        }
    }

    /// Subscribe to the local Node Manager's subsystem list as a standing
    /// EveryChange event, the mechanism discovery uses to stay current
    /// (spec §4.8). Called once by `Component::new` when discovery is
    /// enabled.
    pub(crate) fn request_subsystem_discovery(self: &Arc<Self>) {
        let request_id = self.events_mutex.lock().expect("events_mutex poisoned").next_request_id();
        let request = CreateEventRequest(EventRequestBody {
            message_code: codes::REPORT_SUBSYSTEM_LIST,
            event_type: EventType::EveryChange,
            requested_rate_hz: None,
            query_filter: None,
            boundary: None,
            request_id,
        });
        if let Err(err) = self.send(self.node_manager, &request, false) {
            warn!(?err, "failed to subscribe to the subsystem list");
        }
    }

    /// On a successful `ConfirmServiceConnection`, turn the matching
    /// `track_pending_create` entry into a requested-table row (spec
    /// §4.6, S1). A no-op if there's no pending create for `provider` or
    /// the provider refused.
    fn record_sc_confirmation(self: &Arc<Self>, provider: Address, msg: &dyn Message) {
        let Some(confirm) = msg.as_any().downcast_ref::<ConfirmServiceConnection>() else {
            return;
        };
        let pending = self.pending_sc_creates.lock().expect("pending_sc_creates poisoned").remove(&provider);
        let Some(pending) = pending else { return };
        if confirm.response_code != ConfirmCode::Created {
            return;
        }
        let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
        sc.record_requested(RequestedServiceConnection {
            provider,
            message_code: pending.message_code,
            presence_vector: pending.presence_vector,
            instance_id: confirm.instance_id,
            rate_hz: confirm.confirmed_rate_hz,
            last_update: Instant::now(),
            sequence_number: 0,
            primary_status: ScStatus::Active,
            re_establish: true,
        });
    }

    /// On a successful `ConfirmEventRequest`, turn the matching
    /// `track_pending_create` entry into a subscribed-table row (spec
    /// §4.5, S1).
    fn record_event_confirmation(self: &Arc<Self>, provider: Address, confirm: &ConfirmEventRequest) {
        let pending = self
            .pending_event_creates
            .lock()
            .expect("pending_event_creates poisoned")
            .remove(&confirm.request_id);
        let Some(pending) = pending else { return };
        if confirm.response_code != EventResponseCode::Created {
            return;
        }
        let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
        events.record_subscribed(SubscribedEvent {
            provider,
            message_code: pending.message_code,
            event_id: confirm.event_id,
            event_type: pending.event_type,
            confirmed_rate_hz: confirm.confirmed_rate_hz,
            last_sequence_number: None,
            last_update: Instant::now(),
            re_establish: true,
        });
    }

    fn handle_sc_inbound(self: &Arc<Self>, header: &Header, msg: &dyn Message) {
        let presence_vector = msg.presence_vector();
        {
            let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
            if let Some(entry) = sc.requested_mut(header.source, header.command_code, presence_vector) {
                entry.primary_status = ScStatus::Active;
                entry.last_update = Instant::now();
                entry.sequence_number = entry.sequence_number.wrapping_add(1);
            }
        }
        (self.callbacks.deliver)(header.source, msg.clone_box());
    }

    fn handle_event_envelope(self: &Arc<Self>, header: &Header, envelope_msg: &dyn Message) {
        let Some(envelope) = envelope_msg.as_any().downcast_ref::<EventEnvelope>() else {
            return;
        };
        let inner = match self.registry.decode(envelope.inner_message_code, header.version, &envelope.inner_payload) {
            Ok(inner) => inner,
            Err(err) => {
                debug!(?err, code = envelope.inner_message_code, "failed to decode event envelope payload");
                self.counters.header_decode_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        {
            let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
            if let Some(sub) = events.subscribed_event_mut(header.source, envelope.inner_message_code, envelope.event_id) {
                sub.last_sequence_number = Some(envelope.sequence_number);
                sub.last_update = Instant::now();
            }
        }
        (self.callbacks.deliver)(header.source, inner);
    }

    fn handle_routed_message(self: &Arc<Self>, header: &Header, msg: Box<dyn Message>) {
        let is_command = matches!(
            header.command_code,
            codes::CREATE_SERVICE_CONNECTION
                | codes::TERMINATE_SERVICE_CONNECTION
                | codes::SUSPEND_SERVICE_CONNECTION
                | codes::ACTIVATE_SERVICE_CONNECTION
                | codes::CREATE_EVENT_REQUEST
                | codes::UPDATE_EVENT
                | codes::CANCEL_EVENT
        );
        if is_command && header.priority.value() < self.authority && header.source != self.node_manager {
            let name = self.registry.lookup(header.command_code).map_or("?", |e| e.name);
            debug!(source = ?header.source, code = header.command_code, name, "dropped command from lower-authority sender");
            return;
        }

        match header.command_code {
            codes::CREATE_SERVICE_CONNECTION => self.handle_create_sc(header, msg),
            codes::CONFIRM_SERVICE_CONNECTION => {
                self.record_sc_confirmation(header.source, msg.as_ref());
                self.fulfill(
                    ReceiptKey::ServiceConnection { provider: header.source },
                    codes::CONFIRM_SERVICE_CONNECTION,
                    msg,
                )
            }
            codes::TERMINATE_SERVICE_CONNECTION => self.handle_terminate_sc(header, msg),
            codes::SUSPEND_SERVICE_CONNECTION => self.handle_suspend_sc(msg),
            codes::ACTIVATE_SERVICE_CONNECTION => self.handle_activate_sc(msg),
            codes::CREATE_EVENT_REQUEST => self.handle_create_event(header, msg, false),
            codes::UPDATE_EVENT => self.handle_create_event(header, msg, true),
            codes::CANCEL_EVENT => self.handle_cancel_event(header, msg),
            codes::CONFIRM_EVENT_REQUEST => {
                if let Some(confirm) = msg.as_any().downcast_ref::<ConfirmEventRequest>() {
                    self.record_event_confirmation(header.source, confirm);
                    self.fulfill(ReceiptKey::EventRequestId(confirm.request_id), codes::CONFIRM_EVENT_REQUEST, msg.clone_box());
                }
            }
            codes::REJECT_EVENT_REQUEST => {
                if let Some(reject) = msg.as_any().downcast_ref::<RejectEventRequest>() {
                    self.fulfill(ReceiptKey::EventRequestId(reject.request_id), codes::REJECT_EVENT_REQUEST, msg.clone_box());
                }
            }
            _ => (self.callbacks.deliver)(header.source, msg),
        }
    }

    fn handle_create_sc(self: &Arc<Self>, header: &Header, msg: Box<dyn Message>) {
        let Some(create) = msg.as_any().downcast_ref::<CreateServiceConnection>() else {
            return;
        };
        let decision = (self.callbacks.process_sc_request)(create, header.source);
        let reply = match decision {
            ScAdmissionDecision::Reject { response_code } => ConfirmServiceConnection {
                response_code,
                instance_id: 0,
                confirmed_rate_hz: 0.0,
            },
            ScAdmissionDecision::Ok { confirmed_rate_hz } => {
                let requestor_authority = header.priority.value();
                let admission = {
                    let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
                    sc.admit_create(
                        header.source,
                        create.message_code,
                        create.presence_vector_filter,
                        confirmed_rate_hz,
                        requestor_authority,
                        Instant::now(),
                    )
                };
                match admission {
                    Ok(admission) => {
                        if admission.confirmed_rate_hz >= self.hpt_threshold_hz {
                            self.install_sc_hpt(create.message_code, create.presence_vector_filter, admission.confirmed_rate_hz);
                        }
                        ConfirmServiceConnection {
                            response_code: ConfirmCode::Created,
                            instance_id: admission.instance_id,
                            confirmed_rate_hz: admission.confirmed_rate_hz,
                        }
                    }
                    Err(err) => {
                        warn!(?err, "service connection admission failed");
                        ConfirmServiceConnection {
                            response_code: ConfirmCode::Refused,
                            instance_id: 0,
                            confirmed_rate_hz: 0.0,
                        }
                    }
                }
            }
        };
        if let Err(err) = self.send(header.source, &reply, false) {
            warn!(?err, "failed to send confirm service connection");
        }
    }

    fn handle_terminate_sc(self: &Arc<Self>, _header: &Header, msg: Box<dyn Message>) {
        let Some(cmd) = msg.as_any().downcast_ref::<TerminateServiceConnection>() else {
            return;
        };
        let removed = {
            let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
            sc.terminate_as_provider(_header.source, cmd.0.message_code, cmd.0.presence_vector_filter)
        };
        if removed {
            self.stop_hpt(HptKey::Sc {
                message_code: cmd.0.message_code,
                presence_vector: cmd.0.presence_vector_filter,
            });
        }
    }

    fn handle_suspend_sc(self: &Arc<Self>, msg: Box<dyn Message>) {
        let Some(cmd) = msg.as_any().downcast_ref::<SuspendServiceConnection>() else {
            return;
        };
        {
            let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
            sc.suspend(cmd.0.message_code, cmd.0.presence_vector_filter);
        }
        self.stop_hpt(HptKey::Sc {
            message_code: cmd.0.message_code,
            presence_vector: cmd.0.presence_vector_filter,
        });
    }

    fn handle_activate_sc(self: &Arc<Self>, msg: Box<dyn Message>) {
        let Some(cmd) = msg.as_any().downcast_ref::<ActivateServiceConnection>() else {
            return;
        };
        let rate = {
            let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
            sc.activate(cmd.0.message_code, cmd.0.presence_vector_filter);
            sc.provided(cmd.0.message_code, cmd.0.presence_vector_filter).map(|e| e.rate_hz)
        };
        if let Some(rate) = rate {
            if rate >= self.hpt_threshold_hz {
                self.install_sc_hpt(cmd.0.message_code, cmd.0.presence_vector_filter, rate);
            }
        }
    }

    fn handle_create_event(self: &Arc<Self>, header: &Header, msg: Box<dyn Message>, is_update: bool) {
        let request = if is_update {
            msg.as_any().downcast_ref::<UpdateEvent>().map(|m| m.0.clone())
        } else {
            msg.as_any().downcast_ref::<CreateEventRequest>().map(|m| m.0.clone())
        };
        let Some(request) = request else {
            return;
        };

        let decision = (self.callbacks.process_event_request)(&request, header.source);
        let reply: Box<dyn Message> = match decision {
            EventAdmissionDecision::Reject { response_code, error_message } => Box::new(RejectEventRequest {
                response_code,
                request_id: request.request_id,
                error_message,
            }),
            EventAdmissionDecision::Ok { confirmed_rate_hz } => {
                let mut admitted_request = request.clone();
                admitted_request.requested_rate_hz = confirmed_rate_hz.or(request.requested_rate_hz);
                let admission = {
                    let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
                    if is_update {
                        events.admit_update(header.source, &admitted_request, Instant::now())
                    } else {
                        events.admit_create(header.source, &admitted_request, Instant::now())
                    }
                };
                match admission {
                    Ok(admission) => {
                        match request.event_type {
                            EventType::Periodic | EventType::PeriodicWithoutReplacement => {
                                if let Some(rate) = confirmed_rate_hz {
                                    if rate >= self.hpt_threshold_hz {
                                        self.install_event_hpt(request.message_code, admission.event_id, rate);
                                    }
                                }
                            }
                            EventType::OneTime => {
                                self.generate_and_deliver_event(request.message_code, admission.event_id);
                                let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
                                events.cancel(header.source, request.message_code, admission.event_id);
                            }
                            _ => {}
                        }
                        Box::new(ConfirmEventRequest {
                            response_code: EventResponseCode::Created,
                            event_id: admission.event_id,
                            confirmed_rate_hz,
                            request_id: request.request_id,
                        })
                    }
                    Err(err) => {
                        warn!(?err, "event admission failed");
                        Box::new(RejectEventRequest {
                            response_code: EventResponseCode::InvalidEventSetup,
                            request_id: request.request_id,
                            error_message: err.to_string(),
                        })
                    }
                }
            }
        };
        if let Err(err) = self.send(header.source, reply.as_ref(), false) {
            warn!(?err, "failed to send event request response");
        }
    }

    fn handle_cancel_event(self: &Arc<Self>, header: &Header, msg: Box<dyn Message>) {
        let Some(cancel) = msg.as_any().downcast_ref::<CancelEvent>() else {
            return;
        };
        let deleted = {
            let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
            events.cancel(header.source, cancel.message_code, cancel.event_id)
        };
        if deleted {
            self.stop_hpt(HptKey::Event {
                message_code: cancel.message_code,
                event_id: cancel.event_id,
            });
        }
    }

    /// Generate one delivery for a produced event and send it, wrapped in
    /// the generic `Event` envelope, to every current subscriber. Used by
    /// OneTime creation, the subscription loop's periodic pass, and HPT
    /// timer firings alike (spec §4.5).
    pub(crate) fn generate_and_deliver_event(self: &Arc<Self>, message_code: u16, event_id: EventId) {
        let Some(generate) = self.callbacks.generate.as_ref() else {
            return;
        };
        let inner = generate(message_code, 0);
        let (subscribers, sequence_number) = {
            let events = self.events_mutex.lock().expect("events_mutex poisoned");
            match events.produced_event(message_code, event_id) {
                Some(event) => (event.subscribers.iter().copied().collect::<Vec<_>>(), event.sequence_number),
                None => return,
            }
        };
        let inner_body = self.registry.encode(inner.as_ref(), self.version);
        let envelope = EventEnvelope {
            event_id,
            inner_message_code: inner.command_code(),
            sequence_number,
            inner_payload: inner_body,
        };
        for subscriber in subscribers {
            if let Err(err) = self.send(subscriber, &envelope, false) {
                warn!(?err, ?subscriber, "event delivery failed");
            }
        }
    }

    /// Generate one update for a produced service connection and deliver
    /// it to every current requestor (spec §4.6).
    pub(crate) fn generate_and_deliver_sc(self: &Arc<Self>, message_code: u16, presence_vector: u16) {
        let Some(generate) = self.callbacks.generate.as_ref() else {
            return;
        };
        let inform = generate(message_code, presence_vector);
        let (requestors, sequence_number) = {
            let sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
            match sc.provided(message_code, presence_vector) {
                Some(entry) => (entry.requestors.keys().copied().collect::<Vec<_>>(), entry.sequence_number),
                None => return,
            }
        };
        for requestor in requestors {
            if let Err(err) = self.send_sc(requestor, inform.as_ref(), sequence_number) {
                warn!(?err, ?requestor, "service connection delivery failed");
            }
        }
    }

    /// Fire every EveryChange/FirstChange event on `message_code` once:
    /// the owning service calls this when its state actually mutates
    /// (spec §4.5 — generation for these types is the producer's job, not
    /// the manager's). FirstChange events are retired after their one
    /// delivery; EveryChange events stay registered for the next call.
    pub fn notify_state_changed(self: &Arc<Self>, message_code: u16) {
        let mut first_change_keys: Vec<(u16, EventId)> = Vec::new();
        let keys: Vec<(u16, EventId)> = {
            let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
            events
                .produced_events_mut()
                .filter(|event| {
                    event.message_code == message_code
                        && matches!(event.event_type, EventType::EveryChange | EventType::FirstChange)
                })
                .map(|event| {
                    event.sequence_number = event.sequence_number.wrapping_add(1);
                    event.last_generated = Instant::now();
                    if event.event_type == EventType::FirstChange {
                        first_change_keys.push((event.message_code, event.event_id));
                    }
                    (event.message_code, event.event_id)
                })
                .collect()
        };
        for (code, event_id) in keys {
            self.generate_and_deliver_event(code, event_id);
        }
        if !first_change_keys.is_empty() {
            let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
            for (code, event_id) in first_change_keys {
                events.remove_produced(code, event_id);
            }
        }
    }
}
