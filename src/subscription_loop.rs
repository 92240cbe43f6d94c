//! Subscription Loop (C7): HPT timer installation/teardown, the
//! periodic polling pass for sub-threshold rates, the liveness pass
//! that re-requests stale subscriptions, and orderly shutdown (spec §4.7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jaus_messages::messages::event::{CancelEvent, CreateEventRequest, EventRequestBody};
use jaus_messages::messages::service_connection::{CreateServiceConnection, ServiceConnectionCommand, TerminateServiceConnection};
use tracing::warn;

use crate::engine::{Component, HptHandle, HptKey};
use crate::events::EventId;
use crate::service_connections::RequestedServiceConnection;

/// Sleep granularity of the subscription loop's polling pass. Chosen well
/// under the HPT threshold's fastest period (30 Hz, ~33ms) so sub-HPT
/// periodic generation stays on schedule and the quit flag is observed
/// quickly during shutdown.
const TICK: Duration = Duration::from_millis(3);

impl Component {
    /// Install a dedicated timer thread for a produced event at or above
    /// `hpt_threshold_hz`. A no-op if one is already installed for this
    /// key.
    pub(crate) fn install_event_hpt(self: &Arc<Self>, message_code: u16, event_id: EventId, rate_hz: f64) {
        let key = HptKey::Event { message_code, event_id };
        if self.hpt_mutex.lock().expect("hpt_mutex poisoned").timers.contains_key(&key) {
            return;
        }
        {
            let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
            events.mark_hpt_installed(message_code, event_id, true);
        }
        let interval = Duration::from_secs_f64(1.0 / rate_hz.max(0.001));
        let quit = Arc::new(AtomicBool::new(false));
        let thread_quit = Arc::clone(&quit);
        let component = Arc::clone(self);
        let join = std::thread::Builder::new()
            .name(format!("jaus-event-hpt-{message_code:04x}-{event_id}"))
            .spawn(move || {
                while !thread_quit.load(Ordering::SeqCst) && !component.quit.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    if thread_quit.load(Ordering::SeqCst) || component.quit.load(Ordering::SeqCst) {
                        break;
                    }
                    {
                        let mut events = component.events_mutex.lock().expect("events_mutex poisoned");
                        if let Some(event) = events.produced_event_mut(message_code, event_id) {
                            event.sequence_number = event.sequence_number.wrapping_add(1);
                            event.last_generated = Instant::now();
                        }
                    }
                    component.generate_and_deliver_event(message_code, event_id);
                }
            })
            .expect("failed to spawn event HPT thread");
        self.hpt_mutex
            .lock()
            .expect("hpt_mutex poisoned")
            .timers
            .insert(key, HptHandle { quit, join });
    }

    /// Install a dedicated timer thread for a provided service
    /// connection at or above `hpt_threshold_hz`.
    pub(crate) fn install_sc_hpt(self: &Arc<Self>, message_code: u16, presence_vector: u16, rate_hz: f64) {
        let key = HptKey::Sc { message_code, presence_vector };
        if self.hpt_mutex.lock().expect("hpt_mutex poisoned").timers.contains_key(&key) {
            return;
        }
        {
            let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
            if let Some(entry) = sc.provided_mut().find(|e| e.message_code == message_code && e.presence_vector == presence_vector) {
                entry.hpt_installed = true;
            }
        }
        let interval = Duration::from_secs_f64(1.0 / rate_hz.max(0.001));
        let quit = Arc::new(AtomicBool::new(false));
        let thread_quit = Arc::clone(&quit);
        let component = Arc::clone(self);
        let join = std::thread::Builder::new()
            .name(format!("jaus-sc-hpt-{message_code:04x}"))
            .spawn(move || {
                while !thread_quit.load(Ordering::SeqCst) && !component.quit.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    if thread_quit.load(Ordering::SeqCst) || component.quit.load(Ordering::SeqCst) {
                        break;
                    }
                    {
                        let mut sc = component.sc_mutex.lock().expect("sc_mutex poisoned");
                        if let Some(entry) = sc.provided_entry_mut(message_code, presence_vector) {
                            entry.last_update = Instant::now();
                            entry.sequence_number = entry.sequence_number.wrapping_add(1);
                        }
                    }
                    component.generate_and_deliver_sc(message_code, presence_vector);
                }
            })
            .expect("failed to spawn service connection HPT thread");
        self.hpt_mutex
            .lock()
            .expect("hpt_mutex poisoned")
            .timers
            .insert(key, HptHandle { quit, join });
    }

    /// Stop and join a timer thread, clearing its `hpt_installed` flag.
    /// A no-op if no timer is installed for `key`.
    pub(crate) fn stop_hpt(self: &Arc<Self>, key: HptKey) {
        let handle = self.hpt_mutex.lock().expect("hpt_mutex poisoned").timers.remove(&key);
        if let Some(handle) = handle {
            handle.quit.store(true, Ordering::SeqCst);
            let _ = handle.join.join();
        }
        match key {
            HptKey::Event { message_code, event_id } => {
                let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
                events.mark_hpt_installed(message_code, event_id, false);
            }
            HptKey::Sc { message_code, presence_vector } => {
                let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
                if let Some(entry) = sc.provided_mut().find(|e| e.message_code == message_code && e.presence_vector == presence_vector) {
                    entry.hpt_installed = false;
                }
            }
        }
    }

    /// One pass of sub-HPT-threshold periodic generation, for both
    /// produced events and provided service connections.
    fn subscription_tick(self: &Arc<Self>, now: Instant) {
        let due_events = {
            let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
            events.due_periodic(now, self.hpt_threshold_hz)
        };
        for key in due_events {
            self.generate_and_deliver_event(key.message_code, key.event_id);
        }

        let due_sc = {
            let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
            sc.due_periodic(now, self.hpt_threshold_hz)
        };
        for key in due_sc {
            self.generate_and_deliver_sc(key.message_code, key.presence_vector);
        }
    }

    /// Once-per-`discovery_ttl` liveness pass: re-requests stale
    /// requested service connections and subscribed events, consulting
    /// the re-establish hooks on a snapshot (spec §4.7).
    fn liveness_pass(self: &Arc<Self>, now: Instant) {
        let stale_sc = {
            let sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
            sc.stale_requested(now)
        };
        for key in stale_sc {
            let snapshot = {
                let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
                sc.requested_mut(key.provider, key.message_code, key.presence_vector).map(|e| e.clone())
            };
            let Some(snapshot) = snapshot else { continue };
            if (self.callbacks.re_establish_sc)(&snapshot) {
                self.re_request_sc(&snapshot);
            } else {
                let mut sc = self.sc_mutex.lock().expect("sc_mutex poisoned");
                sc.remove_requested(key.provider, key.message_code, key.presence_vector);
            }
        }

        let stale_events = {
            let events = self.events_mutex.lock().expect("events_mutex poisoned");
            events.stale_subscribed(now)
        };
        for key in stale_events {
            let snapshot = {
                let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
                events
                    .subscribed_event_mut(key.provider, key.message_code, key.event_id)
                    .map(|e| e.clone())
            };
            let Some(snapshot) = snapshot else { continue };
            if (self.callbacks.re_establish_event)(&snapshot) {
                self.re_request_event(&snapshot);
            }
        }
    }

    pub(crate) fn re_request_sc(self: &Arc<Self>, sc: &RequestedServiceConnection) {
        let msg = CreateServiceConnection {
            message_code: sc.message_code,
            presence_vector_filter: sc.presence_vector,
            rate_hz: sc.rate_hz,
        };
        if let Err(err) = self.send(sc.provider, &msg, false) {
            warn!(?err, provider = ?sc.provider, "failed to re-request a stale service connection");
        }
        let mut table = self.sc_mutex.lock().expect("sc_mutex poisoned");
        if let Some(entry) = table.requested_mut(sc.provider, sc.message_code, sc.presence_vector) {
            entry.last_update = Instant::now();
        }
    }

    pub(crate) fn re_request_event(self: &Arc<Self>, event: &crate::events::SubscribedEvent) {
        let request_id = self.events_mutex.lock().expect("events_mutex poisoned").next_request_id();
        let msg = CreateEventRequest(EventRequestBody {
            message_code: event.message_code,
            event_type: event.event_type,
            requested_rate_hz: event.confirmed_rate_hz,
            query_filter: None,
            boundary: None,
            request_id,
        });
        if let Err(err) = self.send(event.provider, &msg, false) {
            warn!(?err, provider = ?event.provider, "failed to re-request a stale event subscription");
        }
        let mut events = self.events_mutex.lock().expect("events_mutex poisoned");
        if let Some(entry) = events.subscribed_event_mut(event.provider, event.message_code, event.event_id) {
            entry.last_update = Instant::now();
        }
    }

    /// Start the background worker thread driving periodic generation and
    /// liveness checks. Called once by `Component::new`.
    pub(crate) fn start_subscription_loop(self: &Arc<Self>) {
        let component = Arc::clone(self);
        let join = std::thread::Builder::new()
            .name("jaus-subscription-loop".into())
            .spawn(move || {
                let mut last_liveness = Instant::now();
                while !component.quit.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    component.subscription_tick(now);
                    if now.duration_since(last_liveness) >= component.discovery_ttl {
                        component.liveness_pass(now);
                        last_liveness = now;
                    }
                    std::thread::sleep(TICK);
                }
            })
            .expect("failed to spawn subscription loop thread");
        *self.subscription_loop.lock().expect("subscription_loop mutex poisoned") = Some(join);
    }

    /// Stop every background thread, then release this component's
    /// subscriptions: terminate every service connection it holds from a
    /// remote provider, and cancel every event it subscribes to, each
    /// with provider notification (spec §4.7). The subscription loop and
    /// every HPT thread poll the quit flag well inside the nominal
    /// 500ms-per-thread shutdown budget, so a plain `join` suffices —
    /// std's `JoinHandle` has no timeout-join primitive to enforce the
    /// budget directly.
    pub fn shutdown(self: &Arc<Self>) {
        self.quit.store(true, Ordering::SeqCst);
        self.receipt_condvar_notify();

        if let Some(join) = self.subscription_loop.lock().expect("subscription_loop mutex poisoned").take() {
            let _ = join.join();
        }

        let hpt_keys: Vec<HptKey> = self.hpt_mutex.lock().expect("hpt_mutex poisoned").timers.keys().copied().collect();
        for key in hpt_keys {
            self.stop_hpt(key);
        }

        let requested = self.sc_mutex.lock().expect("sc_mutex poisoned").all_requested();
        for sc in requested {
            let msg = TerminateServiceConnection(ServiceConnectionCommand {
                message_code: sc.message_code,
                presence_vector_filter: sc.presence_vector,
                instance_id: sc.instance_id,
            });
            if let Err(err) = self.send(sc.provider, &msg, false) {
                warn!(?err, provider = ?sc.provider, "failed to notify provider of service connection termination on shutdown");
            }
        }

        let subscribed = self.events_mutex.lock().expect("events_mutex poisoned").all_subscribed();
        for event in subscribed {
            let msg = CancelEvent {
                event_id: event.event_id,
                message_code: event.message_code,
                request_id: 0,
            };
            if let Err(err) = self.send(event.provider, &msg, false) {
                warn!(?err, provider = ?event.provider, "failed to notify provider of event cancellation on shutdown");
            }
        }
    }
}
