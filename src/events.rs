//! Event Manager (C5): produced and subscribed event state, and the
//! Create/Update/Cancel protocols from spec §4.5.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use jaus_messages::messages::event::{BoundaryExpr, EventRequestBody, EventType};
use jaus_wire::Address;

use crate::error::CoreError;

pub type EventId = u8;

/// Identifies one produced event: event IDs are only unique within a
/// single message code (spec I2), so the composite is the real key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProducedEventKey {
    pub message_code: u16,
    pub event_id: EventId,
}

/// The parameters that determine whether two Create/Update requests
/// describe "the same event" for dedupe purposes (spec §4.5: "if an
/// event with the same key already exists"). Boundary limit values are
/// deliberately excluded — two boundary events differing only in their
/// threshold are treated as the same subscription, matching how a
/// provider would naturally coalesce repeated requests from several
/// subscribers watching the same field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EventIdentity {
    message_code: u16,
    event_type: EventType,
    query_filter: Option<Vec<u8>>,
}

impl EventIdentity {
    fn of(request: &EventRequestBody) -> EventIdentity {
        EventIdentity {
            message_code: request.message_code,
            event_type: request.event_type,
            query_filter: request.query_filter.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProducedEvent {
    pub event_id: EventId,
    pub message_code: u16,
    pub event_type: EventType,
    pub query_filter: Option<Vec<u8>>,
    pub rate_hz: Option<f64>,
    pub boundary: Option<BoundaryExpr>,
    pub subscribers: HashSet<Address>,
    pub sequence_number: u16,
    pub last_generated: Instant,
    pub hpt_installed: bool,
}

impl ProducedEvent {
    fn identity(&self) -> EventIdentity {
        EventIdentity {
            message_code: self.message_code,
            event_type: self.event_type,
            query_filter: self.query_filter.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscribedEventKey {
    pub provider: Address,
    pub message_code: u16,
    pub event_id: EventId,
}

#[derive(Debug, Clone)]
pub struct SubscribedEvent {
    pub provider: Address,
    pub message_code: u16,
    pub event_id: EventId,
    pub event_type: EventType,
    pub confirmed_rate_hz: Option<f64>,
    pub last_sequence_number: Option<u16>,
    pub last_update: Instant,
    /// Carried from the original request; the subscription loop
    /// re-requests with this flag when the provider goes stale.
    pub re_establish: bool,
}

/// Outcome of a Create or Update Event Request, for the caller to turn
/// into a Confirm Event Request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventAdmission {
    pub event_id: EventId,
    pub is_new: bool,
}

pub struct EventManager {
    produced: HashMap<ProducedEventKey, ProducedEvent>,
    subscribed: HashMap<SubscribedEventKey, SubscribedEvent>,
    /// Events whose provider vanished while `re_establish` was set;
    /// retried on the provider's next appearance (spec §4.8).
    lost_events: Vec<SubscribedEvent>,
    next_request_id: u8,
}

impl EventManager {
    pub fn new() -> EventManager {
        EventManager {
            produced: HashMap::new(),
            subscribed: HashMap::new(),
            lost_events: Vec::new(),
            next_request_id: 0,
        }
    }

    /// Global request-ID generator, used to correlate Create/Update/Cancel
    /// Event Request with their Confirm/Reject response.
    pub fn next_request_id(&mut self) -> u8 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    fn allocate_event_id(&self, message_code: u16) -> Result<EventId, CoreError> {
        let used: HashSet<EventId> = self
            .produced
            .keys()
            .filter(|k| k.message_code == message_code)
            .map(|k| k.event_id)
            .collect();
        (0..=u8::MAX).find(|id| !used.contains(id)).ok_or(CoreError::InstanceIdExhausted)
    }

    /// Create Event Request protocol step 3 (spec §4.5), given the
    /// provider has already decided to admit the request (the
    /// `process_event_request` callback runs outside this call, in the
    /// engine, before the lock is taken).
    pub fn admit_create(
        &mut self,
        requester: Address,
        request: &EventRequestBody,
        now: Instant,
    ) -> Result<EventAdmission, CoreError> {
        let identity = EventIdentity::of(request);
        if let Some(existing) = self.produced.values_mut().find(|e| e.identity() == identity) {
            existing.subscribers.insert(requester);
            return Ok(EventAdmission {
                event_id: existing.event_id,
                is_new: false,
            });
        }
        let event_id = self.allocate_event_id(request.message_code)?;
        let mut subscribers = HashSet::new();
        subscribers.insert(requester);
        self.produced.insert(
            ProducedEventKey {
                message_code: request.message_code,
                event_id,
            },
            ProducedEvent {
                event_id,
                message_code: request.message_code,
                event_type: request.event_type,
                query_filter: request.query_filter.clone(),
                rate_hz: request.requested_rate_hz,
                boundary: request.boundary,
                subscribers,
                sequence_number: 0,
                last_generated: now,
                hpt_installed: false,
            },
        );
        Ok(EventAdmission { event_id, is_new: true })
    }

    /// Update Event protocol (spec §4.5): mutate in place if the
    /// requester is the event's only subscriber, otherwise fork a copy
    /// under a fresh event ID so other subscribers keep the original.
    pub fn admit_update(
        &mut self,
        requester: Address,
        request: &EventRequestBody,
        now: Instant,
    ) -> Result<EventAdmission, CoreError> {
        let identity = EventIdentity::of(request);
        let existing_key = self
            .produced
            .iter()
            .find(|(_, e)| e.identity() == identity)
            .map(|(k, _)| *k);

        let Some(key) = existing_key else {
            return self.admit_create(requester, request, now);
        };

        let only_this_subscriber = {
            let existing = &self.produced[&key];
            existing.subscribers.is_empty() || existing.subscribers == HashSet::from([requester])
        };

        if only_this_subscriber {
            let existing = self.produced.get_mut(&key).unwrap();
            existing.rate_hz = request.requested_rate_hz;
            existing.boundary = request.boundary;
            existing.subscribers.insert(requester);
            return Ok(EventAdmission {
                event_id: existing.event_id,
                is_new: false,
            });
        }

        self.produced.get_mut(&key).unwrap().subscribers.remove(&requester);
        let event_id = self.allocate_event_id(request.message_code)?;
        let mut subscribers = HashSet::new();
        subscribers.insert(requester);
        self.produced.insert(
            ProducedEventKey {
                message_code: request.message_code,
                event_id,
            },
            ProducedEvent {
                event_id,
                message_code: request.message_code,
                event_type: request.event_type,
                query_filter: request.query_filter.clone(),
                rate_hz: request.requested_rate_hz,
                boundary: request.boundary,
                subscribers,
                sequence_number: 0,
                last_generated: now,
                hpt_installed: false,
            },
        );
        Ok(EventAdmission { event_id, is_new: true })
    }

    /// Cancel Event protocol. A no-op on a nonexistent key (spec P2).
    /// Returns `true` if the event was deleted as a result (so the
    /// caller knows to stop any HPT timer for it).
    pub fn cancel(&mut self, requester: Address, message_code: u16, event_id: EventId) -> bool {
        let key = ProducedEventKey { message_code, event_id };
        let Some(event) = self.produced.get_mut(&key) else {
            return false;
        };
        event.subscribers.remove(&requester);
        if event.subscribers.is_empty() {
            self.produced.remove(&key);
            return true;
        }
        false
    }

    pub fn produced_event(&self, message_code: u16, event_id: EventId) -> Option<&ProducedEvent> {
        self.produced.get(&ProducedEventKey { message_code, event_id })
    }

    pub fn produced_event_mut(&mut self, message_code: u16, event_id: EventId) -> Option<&mut ProducedEvent> {
        self.produced.get_mut(&ProducedEventKey { message_code, event_id })
    }

    pub fn produced_events_mut(&mut self) -> impl Iterator<Item = &mut ProducedEvent> {
        self.produced.values_mut()
    }

    /// Remove a produced event outright, for every subscriber at once —
    /// used for FirstChange events, which are one-shot regardless of how
    /// many components asked to be told about the first change.
    pub fn remove_produced(&mut self, message_code: u16, event_id: EventId) {
        self.produced.remove(&ProducedEventKey { message_code, event_id });
    }

    pub fn mark_hpt_installed(&mut self, message_code: u16, event_id: EventId, installed: bool) {
        if let Some(event) = self.produced.get_mut(&ProducedEventKey { message_code, event_id }) {
            event.hpt_installed = installed;
        }
    }

    /// Events whose `1000/rate` has elapsed since they last generated,
    /// restricted to rates below `hpt_threshold_hz` (HPT-driven events
    /// are generated by their own timer callback, not this pass).
    pub fn due_periodic(&mut self, now: Instant, hpt_threshold_hz: f64) -> Vec<ProducedEventKey> {
        let mut due = Vec::new();
        for event in self.produced.values_mut() {
            if !matches!(event.event_type, EventType::Periodic | EventType::PeriodicWithoutReplacement) {
                continue;
            }
            let Some(rate) = event.rate_hz else { continue };
            if rate >= hpt_threshold_hz {
                continue;
            }
            let interval = std::time::Duration::from_secs_f64(1.0 / rate);
            if now.duration_since(event.last_generated) >= interval {
                event.last_generated = now;
                event.sequence_number = event.sequence_number.wrapping_add(1);
                due.push(ProducedEventKey {
                    message_code: event.message_code,
                    event_id: event.event_id,
                });
            }
        }
        due
    }

    /// Record a confirmed subscribed event after a Confirm Event Request
    /// with an `ok` response code.
    pub fn record_subscribed(&mut self, event: SubscribedEvent) {
        self.subscribed.insert(
            SubscribedEventKey {
                provider: event.provider,
                message_code: event.message_code,
                event_id: event.event_id,
            },
            event,
        );
    }

    pub fn subscribed_event_mut(
        &mut self,
        provider: Address,
        message_code: u16,
        event_id: EventId,
    ) -> Option<&mut SubscribedEvent> {
        self.subscribed.get_mut(&SubscribedEventKey {
            provider,
            message_code,
            event_id,
        })
    }

    /// Remove every produced/subscribed event whose provider is `lost`
    /// (self for produced is never "lost" this way; this only prunes
    /// subscribed events when discovery reports a remote provider gone —
    /// spec §4.8). Events with `re_establish` set are parked rather than
    /// dropped.
    pub fn prune_provider(&mut self, lost: Address) {
        let mut to_remove = Vec::new();
        for (key, event) in &self.subscribed {
            if key.provider == lost {
                to_remove.push(*key);
                if event.re_establish {
                    self.lost_events.push(event.clone());
                }
            }
        }
        for key in to_remove {
            self.subscribed.remove(&key);
        }
    }

    pub fn all_subscribed(&self) -> Vec<SubscribedEvent> {
        self.subscribed.values().cloned().collect()
    }

    /// Subscribed events stale per the subscription-loop liveness rule,
    /// mirroring `ServiceConnectionTable::stale_requested`: a confirmed
    /// rate, at least one update ever received, and `now - last_update`
    /// past `500ms + 1000/rate`.
    pub fn stale_subscribed(&self, now: Instant) -> Vec<SubscribedEventKey> {
        self.subscribed
            .iter()
            .filter(|(_, event)| {
                event.last_sequence_number.is_some() && {
                    let Some(rate) = event.confirmed_rate_hz else { return false };
                    let threshold = std::time::Duration::from_millis(500) + std::time::Duration::from_secs_f64(1.0 / rate.max(0.001));
                    now.duration_since(event.last_update) > threshold
                }
            })
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn lost_events_for(&self, provider: Address) -> Vec<SubscribedEvent> {
        self.lost_events.iter().filter(|e| e.provider == provider).cloned().collect()
    }

    pub fn clear_lost_events_for(&mut self, provider: Address) {
        self.lost_events.retain(|e| e.provider != provider);
    }

    /// Distinct providers with entries parked on `lost_events` under
    /// `subsystem_id`, used to retry once the subsystem reappears.
    pub fn lost_providers(&self, subsystem_id: u8) -> Vec<Address> {
        self.lost_events
            .iter()
            .map(|e| e.provider)
            .filter(|p| p.subsystem == subsystem_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        EventManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(message_code: u16, event_type: EventType, rate: Option<f64>) -> EventRequestBody {
        EventRequestBody {
            message_code,
            event_type,
            requested_rate_hz: rate,
            query_filter: None,
            boundary: None,
            request_id: 0,
        }
    }

    #[test]
    fn create_allocates_distinct_ids_per_message_code() {
        let mut mgr = EventManager::new();
        let a = mgr
            .admit_create(Address::new(1, 1, 1, 1), &request(0x4008, EventType::Periodic, Some(10.0)), Instant::now())
            .unwrap();
        let b = mgr
            .admit_create(Address::new(1, 1, 1, 2), &request(0x4008, EventType::EveryChange, None), Instant::now())
            .unwrap();
        assert_ne!(a.event_id, b.event_id);
        assert!(a.is_new && b.is_new);
    }

    #[test]
    fn duplicate_create_reuses_event_and_adds_subscriber() {
        let mut mgr = EventManager::new();
        let req = request(0x4008, EventType::Periodic, Some(10.0));
        let first = mgr.admit_create(Address::new(1, 1, 1, 1), &req, Instant::now()).unwrap();
        let second = mgr.admit_create(Address::new(1, 1, 1, 2), &req, Instant::now()).unwrap();
        assert_eq!(first.event_id, second.event_id);
        assert!(!second.is_new);
        let event = mgr.produced_event(0x4008, first.event_id).unwrap();
        assert_eq!(event.subscribers.len(), 2);
    }

    #[test]
    fn update_with_sole_subscriber_mutates_in_place() {
        let mut mgr = EventManager::new();
        let who = Address::new(1, 1, 1, 1);
        let created = mgr
            .admit_create(who, &request(0x4008, EventType::Periodic, Some(10.0)), Instant::now())
            .unwrap();
        let updated = mgr
            .admit_update(who, &request(0x4008, EventType::Periodic, Some(20.0)), Instant::now())
            .unwrap();
        assert_eq!(created.event_id, updated.event_id);
        assert_eq!(mgr.produced_event(0x4008, updated.event_id).unwrap().rate_hz, Some(20.0));
    }

    #[test]
    fn update_with_other_subscribers_forks_a_copy() {
        let mut mgr = EventManager::new();
        let a = Address::new(1, 1, 1, 1);
        let b = Address::new(1, 1, 1, 2);
        let req = request(0x4008, EventType::Periodic, Some(10.0));
        let created = mgr.admit_create(a, &req, Instant::now()).unwrap();
        mgr.admit_create(b, &req, Instant::now()).unwrap();
        let updated = mgr.admit_update(a, &request(0x4008, EventType::Periodic, Some(50.0)), Instant::now()).unwrap();
        assert_ne!(created.event_id, updated.event_id);
        assert_eq!(mgr.produced_event(0x4008, created.event_id).unwrap().subscribers.len(), 1);
        assert_eq!(mgr.produced_event(0x4008, updated.event_id).unwrap().rate_hz, Some(50.0));
    }

    #[test]
    fn cancel_on_unknown_key_is_a_no_op() {
        let mut mgr = EventManager::new();
        assert!(!mgr.cancel(Address::new(1, 1, 1, 1), 0x4008, 99));
    }

    #[test]
    fn cancel_deletes_once_last_subscriber_leaves() {
        let mut mgr = EventManager::new();
        let who = Address::new(1, 1, 1, 1);
        let created = mgr
            .admit_create(who, &request(0x4008, EventType::EveryChange, None), Instant::now())
            .unwrap();
        assert!(mgr.cancel(who, 0x4008, created.event_id));
        assert!(mgr.produced_event(0x4008, created.event_id).is_none());
    }
}
