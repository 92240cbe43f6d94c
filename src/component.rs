//! Component identity, tunables, and observability counters.
//!
//! No CLI, no config file — every parameter is a constructor argument the
//! embedder supplies (spec §6). `ComponentConfig` is a builder; `demos/`
//! shows a standalone binary loading the same fields from TOML for
//! convenience, which is a demo concern, not a core one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use jaus_wire::Address;

/// Rate, in Hz, at or above which a subscription gets a dedicated HPT
/// timer instead of being serviced by the subscription loop's polling
/// pass (spec §4.5, §4.7).
pub const DEFAULT_HPT_THRESHOLD_HZ: f64 = 30.0;

/// Interval between subscription-loop liveness passes (spec §4.7).
pub const DEFAULT_DISCOVERY_TTL: std::time::Duration = std::time::Duration::from_millis(2500);

/// Construction-time configuration for a component. Required fields have
/// no default and must be supplied to `new`; everything else has a
/// `with_*` builder method.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    pub address: Address,
    pub authority: u8,
    /// Address of the local Node Manager. Commands from this sender skip
    /// the authority check (spec §4.4); discovery's standing event
    /// subscriptions also target this address.
    pub node_manager: Address,
    pub hpt_threshold_hz: f64,
    pub discovery_ttl: std::time::Duration,
    pub discovery_enabled: bool,
    pub discovery_subsystem_filter: Option<HashSet<u8>>,
}

impl ComponentConfig {
    pub fn new(address: Address, authority: u8, node_manager: Address) -> ComponentConfig {
        ComponentConfig {
            address,
            authority,
            node_manager,
            hpt_threshold_hz: DEFAULT_HPT_THRESHOLD_HZ,
            discovery_ttl: DEFAULT_DISCOVERY_TTL,
            discovery_enabled: false,
            discovery_subsystem_filter: None,
        }
    }

    pub fn with_hpt_threshold_hz(mut self, hz: f64) -> Self {
        self.hpt_threshold_hz = hz;
        self
    }

    pub fn with_discovery_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.discovery_ttl = ttl;
        self
    }

    pub fn with_discovery_enabled(mut self, enabled: bool) -> Self {
        self.discovery_enabled = enabled;
        self
    }

    /// Restrict discovery to this allow-list of subsystem IDs.
    /// `None` means discover everything reachable.
    pub fn with_subsystem_filter(mut self, filter: HashSet<u8>) -> Self {
        self.discovery_subsystem_filter = Some(filter);
        self
    }
}

/// Read-only observability counters, the ambient counterpart to
/// `tracing` spans — plain atomics rather than an HTTP metrics
/// endpoint, since exposition isn't part of this crate's surface.
#[derive(Debug, Default)]
pub struct Counters {
    pub header_decode_errors: AtomicU64,
    pub unknown_command_codes: AtomicU64,
    pub transport_full: AtomicU64,
    pub timeouts: AtomicU64,
}

impl Counters {
    pub fn new() -> Counters {
        Counters::default()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            header_decode_errors: self.header_decode_errors.load(Ordering::Relaxed),
            unknown_command_codes: self.unknown_command_codes.load(Ordering::Relaxed),
            transport_full: self.transport_full.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountersSnapshot {
    pub header_decode_errors: u64,
    pub unknown_command_codes: u64,
    pub transport_full: u64,
    pub timeouts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_overrides() {
        let cfg = ComponentConfig::new(Address::new(1, 1, 40, 1), 5, Address::new(1, 1, 1, 1))
            .with_hpt_threshold_hz(50.0)
            .with_discovery_enabled(true)
            .with_subsystem_filter([1, 2].into_iter().collect());
        assert_eq!(cfg.hpt_threshold_hz, 50.0);
        assert!(cfg.discovery_enabled);
        assert_eq!(cfg.discovery_subsystem_filter.unwrap().len(), 2);
    }

    #[test]
    fn counters_snapshot_reflects_increments() {
        let counters = Counters::new();
        counters.header_decode_errors.fetch_add(3, Ordering::Relaxed);
        assert_eq!(counters.snapshot().header_decode_errors, 3);
    }
}
