//! USB device identities
//!
//! A device is tracked across polling cycles by its (bus, address, vendor,
//! product) tuple. Re-enumeration after an accessory switch produces a new
//! identity, which is exactly what the discovery loop relies on.

use std::fmt;

/// Google's vendor ID, presented by every device in accessory mode
pub const AOA_VENDOR_ID: u16 = 0x18D1;

/// Accessory (0x2D00) and accessory + ADB (0x2D01) product IDs
pub const AOA_PRODUCT_IDS: [u16; 2] = [0x2D00, 0x2D01];

/// Identity of one visible USB device
///
/// Ordering is by bus, then address, then vendor and product. The discovery
/// loop picks candidates in this order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceIdentity {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub fn new(bus: u8, address: u8, vendor_id: u16, product_id: u16) -> Self {
        Self {
            bus,
            address,
            vendor_id,
            product_id,
        }
    }

    /// Read the identity of an enumerated rusb device
    pub fn of_device<T: rusb::UsbContext>(device: &rusb::Device<T>) -> rusb::Result<Self> {
        let descriptor = device.device_descriptor()?;
        Ok(Self::new(
            device.bus_number(),
            device.address(),
            descriptor.vendor_id(),
            descriptor.product_id(),
        ))
    }

    /// True iff the device already presents the AOA vendor/product identity
    pub fn is_accessory_mode(&self) -> bool {
        self.vendor_id == AOA_VENDOR_ID && AOA_PRODUCT_IDS.contains(&self.product_id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bus {:03} addr {:03} {:04x}:{:04x}",
            self.bus, self.address, self.vendor_id, self.product_id
        )
    }
}
