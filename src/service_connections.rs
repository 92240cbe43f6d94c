//! Service-Connection Table (C6): provided and requested periodic
//! streams, instance-ID allocation, the status machine, and command-SC
//! commander arbitration (spec §4.6).

use std::collections::HashMap;
use std::time::Instant;

use jaus_wire::Address;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScStatus {
    Active,
    Terminated,
    Suspended,
    NotUpdating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScKey {
    pub message_code: u16,
    pub presence_vector: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commander {
    pub address: Address,
    pub authority: u8,
    pub active: bool,
}

/// Ordered set of commanders for a command-type SC. The current
/// commander is the highest-authority active commander meeting the
/// provider's minimum authority (spec §4.6); ties break by address so
/// the choice is deterministic.
#[derive(Debug, Clone, Default)]
pub struct CommanderSet {
    commanders: Vec<Commander>,
}

impl CommanderSet {
    pub fn upsert(&mut self, address: Address, authority: u8) {
        if let Some(existing) = self.commanders.iter_mut().find(|c| c.address == address) {
            existing.authority = authority;
            existing.active = true;
        } else {
            self.commanders.push(Commander {
                address,
                authority,
                active: true,
            });
        }
    }

    pub fn deactivate(&mut self, address: Address) {
        if let Some(existing) = self.commanders.iter_mut().find(|c| c.address == address) {
            existing.active = false;
        }
    }

    pub fn current(&self, provider_authority: u8) -> Option<Address> {
        self.commanders
            .iter()
            .filter(|c| c.active && c.authority >= provider_authority)
            .max_by_key(|c| (c.authority, c.address))
            .map(|c| c.address)
    }
}

/// An SC this component provides. Multiple requestors can share one
/// instance ID for the same `(message_code, presence_vector)`; the
/// effective rate is the maximum of their individually-confirmed rates
/// (spec S2's "the shared SC dominates").
#[derive(Debug, Clone)]
pub struct ProvidedServiceConnection {
    pub instance_id: u8,
    pub message_code: u16,
    pub presence_vector: u16,
    pub rate_hz: f64,
    pub last_update: Instant,
    pub sequence_number: u16,
    pub primary_status: ScStatus,
    /// Carried for compatibility; never read by engine logic (spec §9
    /// Open Questions).
    pub secondary_status: u8,
    pub requestors: HashMap<Address, f64>,
    pub commanders: Option<CommanderSet>,
    pub hpt_installed: bool,
}

/// An SC this component has requested from a remote provider.
#[derive(Debug, Clone)]
pub struct RequestedServiceConnection {
    pub provider: Address,
    pub message_code: u16,
    pub presence_vector: u16,
    pub instance_id: u8,
    pub rate_hz: f64,
    pub last_update: Instant,
    pub sequence_number: u16,
    pub primary_status: ScStatus,
    pub re_establish: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestedScKey {
    pub provider: Address,
    pub message_code: u16,
    pub presence_vector: u16,
}

/// Outcome of admitting a Create Service Connection request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScAdmission {
    pub instance_id: u8,
    pub confirmed_rate_hz: f64,
    pub is_new: bool,
}

pub struct ServiceConnectionTable {
    provided: HashMap<ScKey, ProvidedServiceConnection>,
    requested: HashMap<RequestedScKey, RequestedServiceConnection>,
    /// Requested SCs parked here when their provider's subsystem
    /// disappears with `re_establish` set (spec §4.8); retried on the
    /// subsystem's next appearance. Mirrors `EventManager::lost_events`.
    lost_requested: Vec<RequestedServiceConnection>,
}

impl ServiceConnectionTable {
    pub fn new() -> ServiceConnectionTable {
        ServiceConnectionTable {
            provided: HashMap::new(),
            requested: HashMap::new(),
            lost_requested: Vec::new(),
        }
    }

    fn allocate_instance_id(&self, message_code: u16) -> Result<u8, CoreError> {
        let used: std::collections::HashSet<u8> = self
            .provided
            .values()
            .filter(|sc| sc.message_code == message_code)
            .map(|sc| sc.instance_id)
            .collect();
        (0..=u8::MAX).find(|id| !used.contains(id)).ok_or(CoreError::InstanceIdExhausted)
    }

    /// Create Service Connection protocol, provider side (spec §4.6).
    /// Command-type SCs (`message_code < 0x2000`) get a commander set
    /// seeded with `requestor`; inform SCs don't track commanders.
    pub fn admit_create(
        &mut self,
        requestor: Address,
        message_code: u16,
        presence_vector: u16,
        confirmed_rate_hz: f64,
        requestor_authority: u8,
        now: Instant,
    ) -> Result<ScAdmission, CoreError> {
        let key = ScKey { message_code, presence_vector };
        if let Some(existing) = self.provided.get_mut(&key) {
            existing.requestors.insert(requestor, confirmed_rate_hz);
            existing.rate_hz = existing.requestors.values().copied().fold(0.0, f64::max);
            if let Some(commanders) = existing.commanders.as_mut() {
                commanders.upsert(requestor, requestor_authority);
            }
            return Ok(ScAdmission {
                instance_id: existing.instance_id,
                confirmed_rate_hz: existing.rate_hz,
                is_new: false,
            });
        }

        let instance_id = self.allocate_instance_id(message_code)?;
        let mut requestors = HashMap::new();
        requestors.insert(requestor, confirmed_rate_hz);
        let commanders = if message_code < 0x2000 {
            let mut set = CommanderSet::default();
            set.upsert(requestor, requestor_authority);
            Some(set)
        } else {
            None
        };
        self.provided.insert(
            key,
            ProvidedServiceConnection {
                instance_id,
                message_code,
                presence_vector,
                rate_hz: confirmed_rate_hz,
                last_update: now,
                sequence_number: 0,
                primary_status: ScStatus::Active,
                secondary_status: 0,
                requestors,
                commanders,
                hpt_installed: false,
            },
        );
        Ok(ScAdmission {
            instance_id,
            confirmed_rate_hz,
            is_new: true,
        })
    }

    pub fn suspend(&mut self, message_code: u16, presence_vector: u16) {
        if let Some(sc) = self.provided.get_mut(&ScKey { message_code, presence_vector }) {
            sc.primary_status = ScStatus::Suspended;
            sc.hpt_installed = false;
        }
    }

    pub fn activate(&mut self, message_code: u16, presence_vector: u16) {
        if let Some(sc) = self.provided.get_mut(&ScKey { message_code, presence_vector }) {
            sc.primary_status = ScStatus::Active;
        }
    }

    /// Terminate, provider side only: drop `requestor`, removing the SC
    /// entirely once no requestor remains. Returns `true` if it was
    /// removed (the caller should stop any HPT timer).
    pub fn terminate_as_provider(&mut self, requestor: Address, message_code: u16, presence_vector: u16) -> bool {
        let key = ScKey { message_code, presence_vector };
        let Some(sc) = self.provided.get_mut(&key) else {
            return false;
        };
        sc.requestors.remove(&requestor);
        if let Some(commanders) = sc.commanders.as_mut() {
            commanders.deactivate(requestor);
        }
        if sc.requestors.is_empty() {
            self.provided.remove(&key);
            return true;
        }
        sc.rate_hz = sc.requestors.values().copied().fold(0.0, f64::max);
        false
    }

    pub fn provided(&self, message_code: u16, presence_vector: u16) -> Option<&ProvidedServiceConnection> {
        self.provided.get(&ScKey { message_code, presence_vector })
    }

    pub fn provided_entry_mut(&mut self, message_code: u16, presence_vector: u16) -> Option<&mut ProvidedServiceConnection> {
        self.provided.get_mut(&ScKey { message_code, presence_vector })
    }

    pub fn provided_mut(&mut self) -> impl Iterator<Item = &mut ProvidedServiceConnection> {
        self.provided.values_mut()
    }

    /// Provided SCs below `hpt_threshold_hz` whose update interval has
    /// elapsed (the subscription loop's non-HPT polling pass, spec
    /// §4.7).
    pub fn due_periodic(&mut self, now: Instant, hpt_threshold_hz: f64) -> Vec<ScKey> {
        let mut due = Vec::new();
        for sc in self.provided.values_mut() {
            if sc.primary_status != ScStatus::Active || sc.rate_hz >= hpt_threshold_hz || sc.rate_hz <= 0.0 {
                continue;
            }
            let interval = std::time::Duration::from_secs_f64(1.0 / sc.rate_hz);
            if now.duration_since(sc.last_update) >= interval {
                sc.last_update = now;
                sc.sequence_number = sc.sequence_number.wrapping_add(1);
                due.push(ScKey {
                    message_code: sc.message_code,
                    presence_vector: sc.presence_vector,
                });
            }
        }
        due
    }

    pub fn record_requested(&mut self, sc: RequestedServiceConnection) {
        self.requested.insert(
            RequestedScKey {
                provider: sc.provider,
                message_code: sc.message_code,
                presence_vector: sc.presence_vector,
            },
            sc,
        );
    }

    pub fn requested_mut(
        &mut self,
        provider: Address,
        message_code: u16,
        presence_vector: u16,
    ) -> Option<&mut RequestedServiceConnection> {
        self.requested.get_mut(&RequestedScKey {
            provider,
            message_code,
            presence_vector,
        })
    }

    pub fn remove_requested(&mut self, provider: Address, message_code: u16, presence_vector: u16) {
        self.requested.remove(&RequestedScKey {
            provider,
            message_code,
            presence_vector,
        });
    }

    pub fn requested_for_provider(&self, provider: Address) -> Vec<RequestedServiceConnection> {
        self.requested.values().filter(|sc| sc.provider == provider).cloned().collect()
    }

    pub fn all_requested(&self) -> Vec<RequestedServiceConnection> {
        self.requested.values().cloned().collect()
    }

    /// Remove every requested SC from `provider`, its subsystem having
    /// vanished (spec §4.8). Entries with `re_establish` set are parked
    /// on `lost_requested` rather than dropped.
    pub fn prune_provider(&mut self, provider: Address) {
        for sc in self.requested_for_provider(provider) {
            self.remove_requested(sc.provider, sc.message_code, sc.presence_vector);
            if sc.re_establish {
                self.lost_requested.push(sc);
            }
        }
    }

    pub fn lost_requested_for(&self, provider: Address) -> Vec<RequestedServiceConnection> {
        self.lost_requested.iter().filter(|sc| sc.provider == provider).cloned().collect()
    }

    pub fn clear_lost_requested_for(&mut self, provider: Address) {
        self.lost_requested.retain(|sc| sc.provider != provider);
    }

    /// Distinct providers with entries parked on `lost_requested` under
    /// `subsystem_id`, used to retry once the subsystem reappears.
    pub fn lost_providers(&self, subsystem_id: u8) -> Vec<Address> {
        self.lost_requested
            .iter()
            .map(|sc| sc.provider)
            .filter(|p| p.subsystem == subsystem_id)
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect()
    }

    /// Requested SCs stale per the subscription-loop liveness rule: `now
    /// - last_update > 500ms + 1000/rate` and at least one update has
    /// ever arrived (`sequence_number > 1`).
    pub fn stale_requested(&self, now: Instant) -> Vec<RequestedScKey> {
        self.requested
            .iter()
            .filter(|(_, sc)| {
                sc.sequence_number > 1 && {
                    let threshold = std::time::Duration::from_millis(500)
                        + std::time::Duration::from_secs_f64(1.0 / sc.rate_hz.max(0.001));
                    now.duration_since(sc.last_update) > threshold
                }
            })
            .map(|(k, _)| *k)
            .collect()
    }
}

impl Default for ServiceConnectionTable {
    fn default() -> Self {
        ServiceConnectionTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_create_reuses_instance_id_and_raises_rate() {
        let mut table = ServiceConnectionTable::new();
        let a = Address::new(1, 1, 40, 1);
        let c = Address::new(1, 1, 41, 1);
        let first = table.admit_create(a, 0x4008, 0, 10.0, 6, Instant::now()).unwrap();
        let second = table.admit_create(c, 0x4008, 0, 50.0, 6, Instant::now()).unwrap();
        assert_eq!(first.instance_id, second.instance_id);
        assert_eq!(second.confirmed_rate_hz, 50.0);
        assert_eq!(table.provided(0x4008, 0).unwrap().rate_hz, 50.0);
    }

    #[test]
    fn terminate_removes_entry_once_last_requestor_leaves() {
        let mut table = ServiceConnectionTable::new();
        let a = Address::new(1, 1, 40, 1);
        table.admit_create(a, 0x4008, 0, 10.0, 6, Instant::now()).unwrap();
        assert!(table.terminate_as_provider(a, 0x4008, 0));
        assert!(table.provided(0x4008, 0).is_none());
    }

    #[test]
    fn commander_arbitration_prefers_highest_authority() {
        let mut commanders = CommanderSet::default();
        let low = Address::new(1, 1, 1, 1);
        let high = Address::new(1, 1, 1, 2);
        commanders.upsert(low, 3);
        commanders.upsert(high, 9);
        assert_eq!(commanders.current(0), Some(high));
        commanders.deactivate(high);
        assert_eq!(commanders.current(0), Some(low));
    }

    #[test]
    fn instance_ids_distinct_per_message_code_across_presence_vectors() {
        let mut table = ServiceConnectionTable::new();
        let a = Address::new(1, 1, 40, 1);
        let first = table.admit_create(a, 0x4008, 0x01, 10.0, 6, Instant::now()).unwrap();
        let second = table.admit_create(a, 0x4008, 0x02, 10.0, 6, Instant::now()).unwrap();
        assert_ne!(first.instance_id, second.instance_id);
    }
}
