//! Discovery loop
//!
//! Polls the bus until an accessory stack opens. Each iteration:
//!
//! 1. merge the latest enumeration into the previous generation
//! 2. try to open the accessory candidate, marking it `OpenFailed` on failure
//! 3. ask the switch candidate to switch, marking `SwitchRequested` and
//!    sleeping through the re-enumeration grace period, or `SwitchFailed`
//!    and retrying at once
//! 4. with nothing eligible, sleep for the poll interval
//!
//! A failed enumeration leaves the history untouched and waits one poll
//! interval. There is no timeout and no retry limit; the only exit is an
//! open stack.

use crate::aoa::host::DeviceHost;
use crate::aoa::registry::{DeviceHistory, DeviceMap, Generation, merge};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryTiming {
    /// Sleep when no device is eligible
    pub poll_interval: Duration,
    /// Sleep after a successful switch request
    pub switch_grace: Duration,
}

impl Default for DiscoveryTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            switch_grace: Duration::from_secs(1),
        }
    }
}

/// What one iteration decided
#[derive(Debug)]
pub enum Step<S> {
    /// A stack opened; the loop is done
    Opened(S),
    /// Sleep this long before the next iteration
    Sleep(Duration),
    /// Start the next iteration immediately
    Continue,
}

pub struct DiscoveryLoop<H: DeviceHost> {
    host: H,
    generation: DeviceMap,
    timing: DiscoveryTiming,
}

impl<H: DeviceHost> DiscoveryLoop<H> {
    pub fn new(host: H, timing: DiscoveryTiming) -> Self {
        Self {
            host,
            generation: DeviceMap::new(),
            timing,
        }
    }

    /// Device history as of the last iteration
    pub fn generation(&self) -> &DeviceMap {
        &self.generation
    }

    /// Run one iteration
    pub fn step(&mut self) -> Step<H::Stack> {
        let fresh = match self.host.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                // History survives a failed poll; merging an empty bus would erase it
                warn!("Enumeration failed, keeping device history: {}", e);
                return Step::Sleep(self.timing.poll_interval);
            }
        };

        let Generation {
            mut devices,
            accessory_candidate,
            switch_candidate,
        } = merge(&fresh, &self.generation);

        if let Some(identity) = accessory_candidate {
            debug!("Opening accessory stack: {}", identity);
            match self.host.open_stack(&identity) {
                Ok(stack) => {
                    info!("Accessory ready: {}", identity);
                    self.generation = devices;
                    return Step::Opened(stack);
                }
                Err(e) => {
                    warn!("Open failed, not retrying {}: {}", identity, e);
                    devices.insert(identity, DeviceHistory::OpenFailed);
                }
            }
        }

        let step = match switch_candidate {
            Some(identity) => {
                debug!("Requesting accessory mode: {}", identity);
                match self.host.request_switch(&identity) {
                    Ok(()) => {
                        info!("Switch requested: {}", identity);
                        devices.insert(identity, DeviceHistory::SwitchRequested);
                        Step::Sleep(self.timing.switch_grace)
                    }
                    Err(e) => {
                        warn!("Switch failed: {}: {}", identity, e);
                        devices.insert(identity, DeviceHistory::SwitchFailed);
                        Step::Continue
                    }
                }
            }
            None => {
                debug!("No eligible device among {}", devices.len());
                Step::Sleep(self.timing.poll_interval)
            }
        };

        self.generation = devices;
        step
    }

    /// Iterate until a stack opens
    pub fn run(mut self) -> H::Stack {
        info!("Waiting for an accessory device");
        loop {
            match self.step() {
                Step::Opened(stack) => return stack,
                Step::Sleep(duration) => thread::sleep(duration),
                Step::Continue => {}
            }
        }
    }
}
