//! Device registry and history propagation
//!
//! A [`DeviceMap`] is one discovery generation. Each poll builds a fresh one
//! from the latest enumeration and the previous generation; the old map is
//! never updated in place, so a device that left the bus is simply absent
//! from the next generation.

use common::DeviceIdentity;
use std::collections::BTreeMap;
use tracing::debug;

/// Last known outcome of our interaction with one identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeviceHistory {
    #[default]
    NoAction,
    SwitchRequested,
    SwitchFailed,
    OpenFailed,
}

/// Identity → history, ordered by identity (lowest bus, then address, first)
pub type DeviceMap = BTreeMap<DeviceIdentity, DeviceHistory>;

/// Result of merging a fresh enumeration into the previous generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub devices: DeviceMap,
    /// Lowest accessory-mode identity with history `NoAction`
    pub accessory_candidate: Option<DeviceIdentity>,
    /// Lowest non-accessory identity with history `NoAction`
    pub switch_candidate: Option<DeviceIdentity>,
}

/// Carry an identity's history into the next generation
///
/// | accessory mode | old            | new            |
/// |----------------|----------------|----------------|
/// | yes            | OpenFailed     | OpenFailed     |
/// | yes            | anything else  | NoAction       |
/// | no             | SwitchRequested| SwitchFailed   |
/// | no             | anything else  | unchanged      |
pub fn propagate_history(identity: &DeviceIdentity, old: DeviceHistory) -> DeviceHistory {
    if identity.is_accessory_mode() {
        match old {
            DeviceHistory::OpenFailed => DeviceHistory::OpenFailed,
            _ => DeviceHistory::NoAction,
        }
    } else {
        match old {
            DeviceHistory::SwitchRequested => {
                debug!("Not yet switched, treating as failed: {}", identity);
                DeviceHistory::SwitchFailed
            }
            other => other,
        }
    }
}

/// Build the next generation from `fresh` (every entry `NoAction`) and `old`
pub fn merge(fresh: &DeviceMap, old: &DeviceMap) -> Generation {
    let mut generation = Generation::default();

    for (identity, blank) in fresh {
        let history = match old.get(identity) {
            Some(previous) => propagate_history(identity, *previous),
            None => *blank,
        };
        generation.devices.insert(*identity, history);

        if history != DeviceHistory::NoAction {
            continue;
        }
        let slot = if identity.is_accessory_mode() {
            &mut generation.accessory_candidate
        } else {
            &mut generation.switch_candidate
        };
        slot.get_or_insert(*identity);
    }

    generation
}
