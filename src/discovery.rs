//! Discovery Engine (C8): subsystem list and per-subsystem configuration,
//! maintained via standing EveryChange events with the local Node
//! Manager (spec §4.8).

use std::collections::{HashMap, HashSet};

use jaus_wire::Address;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlobalPose {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub yaw: Option<f64>,
}

/// A subsystem's aggregated known state, owned by the discovery engine.
#[derive(Debug, Clone, Default)]
pub struct Platform {
    pub subsystem_id: u8,
    pub identification: Option<String>,
    pub configuration: Vec<(u8, u8, u8)>,
    pub services: Vec<u16>,
    pub global_pose: Option<GlobalPose>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Connect,
    Update,
    Disconnect,
}

/// What changed after folding a new Report Subsystem List in, for the
/// caller to act on outside the discovery lock (querying identification,
/// creating the per-subsystem configuration event, firing callbacks).
#[derive(Debug, Clone, Default)]
pub struct SubsystemListDiff {
    pub added: Vec<u8>,
    pub removed: Vec<u8>,
}

pub struct DiscoveryEngine {
    subsystems: HashMap<u8, Platform>,
    subsystem_list: HashSet<Address>,
    subsystem_filter: Option<HashSet<u8>>,
}

impl DiscoveryEngine {
    pub fn new(subsystem_filter: Option<HashSet<u8>>) -> DiscoveryEngine {
        DiscoveryEngine {
            subsystems: HashMap::new(),
            subsystem_list: HashSet::new(),
            subsystem_filter,
        }
    }

    fn allowed(&self, subsystem_id: u8) -> bool {
        self.subsystem_filter.as_ref().is_none_or(|allow| allow.contains(&subsystem_id))
    }

    /// Diff a freshly delivered Report Subsystem List against the
    /// current known set, applying the allow-list and adding empty
    /// platform entries for newcomers.
    pub fn apply_subsystem_list(&mut self, reported: &[u8]) -> SubsystemListDiff {
        let reported: HashSet<u8> = reported.iter().copied().filter(|id| self.allowed(*id)).collect();
        let known: HashSet<u8> = self.subsystems.keys().copied().collect();

        let added: Vec<u8> = reported.difference(&known).copied().collect();
        let removed: Vec<u8> = known.difference(&reported).copied().collect();

        for id in &added {
            self.subsystems.insert(
                *id,
                Platform {
                    subsystem_id: *id,
                    ..Platform::default()
                },
            );
        }
        for id in &removed {
            self.subsystems.remove(id);
        }

        SubsystemListDiff { added, removed }
    }

    pub fn platform(&self, subsystem_id: u8) -> Option<&Platform> {
        self.subsystems.get(&subsystem_id)
    }

    pub fn update_configuration(&mut self, subsystem_id: u8, entries: Vec<(u8, u8, u8)>) -> bool {
        let Some(platform) = self.subsystems.get_mut(&subsystem_id) else {
            return false;
        };
        if platform.configuration == entries {
            return false;
        }
        platform.configuration = entries;
        true
    }

    pub fn update_identification(&mut self, subsystem_id: u8, identification: String) -> bool {
        let Some(platform) = self.subsystems.get_mut(&subsystem_id) else {
            return false;
        };
        if platform.identification.as_deref() == Some(identification.as_str()) {
            return false;
        }
        platform.identification = Some(identification);
        true
    }

    pub fn update_services(&mut self, subsystem_id: u8, services: Vec<u16>) -> bool {
        let Some(platform) = self.subsystems.get_mut(&subsystem_id) else {
            return false;
        };
        if platform.services == services {
            return false;
        }
        platform.services = services;
        true
    }

    pub fn update_global_pose(&mut self, subsystem_id: u8, pose: GlobalPose) -> bool {
        let Some(platform) = self.subsystems.get_mut(&subsystem_id) else {
            return false;
        };
        if platform.global_pose == Some(pose) {
            return false;
        }
        platform.global_pose = Some(pose);
        true
    }

    pub fn known_subsystem_ids(&self) -> Vec<u8> {
        self.subsystems.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsystem_list_diff_detects_additions_and_removals() {
        let mut engine = DiscoveryEngine::new(None);
        let diff = engine.apply_subsystem_list(&[1, 2]);
        assert_eq!(diff.added, vec![1, 2]);
        assert!(diff.removed.is_empty());

        let diff = engine.apply_subsystem_list(&[2, 3]);
        assert_eq!(diff.added, vec![3]);
        assert_eq!(diff.removed, vec![1]);
    }

    #[test]
    fn allow_list_filters_unlisted_subsystems() {
        let mut engine = DiscoveryEngine::new(Some([1].into_iter().collect()));
        let diff = engine.apply_subsystem_list(&[1, 2, 3]);
        assert_eq!(diff.added, vec![1]);
        assert!(engine.platform(2).is_none());
    }

    #[test]
    fn configuration_update_is_idempotent() {
        let mut engine = DiscoveryEngine::new(None);
        engine.apply_subsystem_list(&[1]);
        assert!(engine.update_configuration(1, vec![(1, 38, 1)]));
        assert!(!engine.update_configuration(1, vec![(1, 38, 1)]));
    }
}
