//! libusb-backed device host
//!
//! The discovery loop only needs three things from the bus: enumerate it,
//! open an accessory stack on an identity, and ask an identity to switch.
//! [`DeviceHost`] is that seam; [`UsbHost`] is the real thing.

use crate::aoa::registry::{DeviceHistory, DeviceMap};
use crate::aoa::stack::{AccessoryStack, StackSettings};
use crate::aoa::switcher::switch_to_accessory_mode;
use common::{DeviceIdentity, Error, Result};
use rusb::{Context, Device, UsbContext};
use tracing::{debug, warn};

pub trait DeviceHost {
    type Stack;

    /// Every device currently visible, all with history `NoAction`
    fn enumerate(&self) -> Result<DeviceMap>;

    /// Acquire the full accessory stack of `identity`
    fn open_stack(&self, identity: &DeviceIdentity) -> Result<Self::Stack>;

    /// Run the accessory handshake against `identity`
    fn request_switch(&self, identity: &DeviceIdentity) -> Result<()>;
}

/// Find the one device on `context` whose identity matches
pub fn find_unique<T: UsbContext>(context: &T, identity: &DeviceIdentity) -> Result<Device<T>> {
    let devices = context.devices()?;
    let mut matches = devices
        .iter()
        .filter(|device| matches!(DeviceIdentity::of_device(device), Ok(found) if found == *identity));

    let device = matches
        .next()
        .ok_or_else(|| Error::discovery(format!("no device found: {}", identity)))?;
    if matches.next().is_some() {
        return Err(Error::discovery(format!(
            "more than one device found: {}",
            identity
        )));
    }
    Ok(device)
}

#[derive(Debug, Clone, Default)]
pub struct UsbHost {
    settings: StackSettings,
}

impl UsbHost {
    pub fn new(settings: StackSettings) -> Self {
        Self { settings }
    }
}

impl DeviceHost for UsbHost {
    type Stack = AccessoryStack;

    fn enumerate(&self) -> Result<DeviceMap> {
        let context = Context::new()?;
        let devices = context.devices()?;

        let mut map = DeviceMap::new();
        for device in devices.iter() {
            match DeviceIdentity::of_device(&device) {
                Ok(identity) => {
                    map.insert(identity, DeviceHistory::NoAction);
                }
                Err(e) => warn!(
                    "Skipping device at bus {:03} addr {:03}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }
        debug!("Enumerated {} devices", map.len());
        Ok(map)
    }

    fn open_stack(&self, identity: &DeviceIdentity) -> Result<AccessoryStack> {
        AccessoryStack::open(identity, &self.settings)
    }

    fn request_switch(&self, identity: &DeviceIdentity) -> Result<()> {
        // Context, device and handle live only for this handshake
        let context = Context::new()?;
        let device = find_unique(&context, identity)?;
        let handle = device.open()?;
        switch_to_accessory_mode(&handle)
    }
}
