//! AOA mode switch handshake
//!
//! The host asks for the device's AOA protocol version, sends six
//! identification strings, then tells it to restart as an accessory. On
//! success the device drops off the bus and re-enumerates with the AOA
//! vendor/product pair about a second later.

use common::{Error, Result};
use rusb::{Direction, Recipient, RequestType, UsbContext};
use std::time::Duration;
use tracing::{debug, info};

/// Vendor request: read the AOA protocol version (IN, 2 bytes)
pub const AOA_GET_PROTOCOL: u8 = 51;
/// Vendor request: send one identification string (OUT)
pub const AOA_SEND_STRING: u8 = 52;
/// Vendor request: restart in accessory mode (OUT, no payload)
pub const AOA_START_ACCESSORY: u8 = 53;

pub const ACCESSORY_MANUFACTURER: &str = "Softcom";
pub const ACCESSORY_MODEL: &str = "Moonshot";
pub const ACCESSORY_DESCRIPTION: &str = "4-4-2 Fingerprint Scanner";
pub const ACCESSORY_VERSION: &str = "1";
pub const ACCESSORY_URI: &str = "https://softcom.ng";
pub const ACCESSORY_SERIAL: &str = "0123456789";

/// Identification strings in string-index order 0..=5
pub const IDENTIFICATION: [&str; 6] = [
    ACCESSORY_MANUFACTURER,
    ACCESSORY_MODEL,
    ACCESSORY_DESCRIPTION,
    ACCESSORY_VERSION,
    ACCESSORY_URI,
    ACCESSORY_SERIAL,
];

const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Vendor control transfers addressed to the device
pub trait ControlChannel {
    fn vendor_in(&self, request: u8, value: u16, index: u16, buf: &mut [u8]) -> rusb::Result<usize>;
    fn vendor_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> rusb::Result<usize>;
}

impl<T: UsbContext> ControlChannel for rusb::DeviceHandle<T> {
    fn vendor_in(&self, request: u8, value: u16, index: u16, buf: &mut [u8]) -> rusb::Result<usize> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        self.read_control(request_type, request, value, index, buf, CONTROL_TIMEOUT)
    }

    fn vendor_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> rusb::Result<usize> {
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.write_control(request_type, request, value, index, data, CONTROL_TIMEOUT)
    }
}

/// Run the full handshake on an open device
///
/// Any failed transfer aborts with [`Error::Transfer`]; a version other than
/// 1 or 2 aborts with [`Error::Protocol`] before anything is sent.
pub fn switch_to_accessory_mode<C: ControlChannel + ?Sized>(device: &C) -> Result<()> {
    let mut buf = [0u8; 2];
    let read = device.vendor_in(AOA_GET_PROTOCOL, 0, 0, &mut buf)?;
    let version = u16::from_le_bytes(buf);
    if read != buf.len() || !(1..=2).contains(&version) {
        return Err(Error::Protocol(version));
    }
    debug!("Device speaks AOA protocol version {}", version);

    for (index, value) in IDENTIFICATION.iter().enumerate() {
        let payload = nul_terminated(value);
        device.vendor_out(AOA_SEND_STRING, 0, index as u16, &payload)?;
    }

    device.vendor_out(AOA_START_ACCESSORY, 0, 0, &[])?;
    info!("Accessory mode start sent");
    Ok(())
}

fn nul_terminated(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len() + 1);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(0);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Transfer {
        In { request: u8, index: u16 },
        Out { request: u8, index: u16, data: Vec<u8> },
    }

    /// Scripted device: answers the version query and fails the Nth OUT transfer
    struct FakeDevice {
        version: [u8; 2],
        fail_out_at: Option<usize>,
        log: RefCell<Vec<Transfer>>,
    }

    impl FakeDevice {
        fn speaking(version: u16) -> Self {
            Self {
                version: version.to_le_bytes(),
                fail_out_at: None,
                log: RefCell::new(Vec::new()),
            }
        }

        fn outs(&self) -> usize {
            self.log
                .borrow()
                .iter()
                .filter(|t| matches!(t, Transfer::Out { .. }))
                .count()
        }
    }

    impl ControlChannel for FakeDevice {
        fn vendor_in(&self, request: u8, _value: u16, index: u16, buf: &mut [u8]) -> rusb::Result<usize> {
            self.log.borrow_mut().push(Transfer::In { request, index });
            buf[..2].copy_from_slice(&self.version);
            Ok(2)
        }

        fn vendor_out(&self, request: u8, _value: u16, index: u16, data: &[u8]) -> rusb::Result<usize> {
            if self.fail_out_at == Some(self.outs()) {
                return Err(rusb::Error::Pipe);
            }
            self.log.borrow_mut().push(Transfer::Out {
                request,
                index,
                data: data.to_vec(),
            });
            Ok(data.len())
        }
    }

    #[test]
    fn test_full_handshake_sequence() {
        let device = FakeDevice::speaking(2);
        switch_to_accessory_mode(&device).unwrap();

        let log = device.log.borrow();
        assert_eq!(log.len(), 8);
        assert_eq!(log[0], Transfer::In { request: 51, index: 0 });
        for (i, expected) in IDENTIFICATION.iter().enumerate() {
            match &log[i + 1] {
                Transfer::Out { request, index, data } => {
                    assert_eq!(*request, 52);
                    assert_eq!(*index as usize, i);
                    assert_eq!(data.last(), Some(&0));
                    assert_eq!(&data[..data.len() - 1], expected.as_bytes());
                }
                other => panic!("unexpected transfer {:?}", other),
            }
        }
        assert_eq!(
            log[7],
            Transfer::Out {
                request: 53,
                index: 0,
                data: vec![]
            }
        );
    }

    #[test]
    fn test_version_one_is_accepted() {
        assert!(switch_to_accessory_mode(&FakeDevice::speaking(1)).is_ok());
    }

    #[test]
    fn test_unsupported_version_sends_nothing() {
        for version in [0u16, 3, 0x0100] {
            let device = FakeDevice::speaking(version);
            match switch_to_accessory_mode(&device) {
                Err(Error::Protocol(v)) => assert_eq!(v, version),
                other => panic!("expected protocol error, got {:?}", other),
            }
            assert_eq!(device.outs(), 0);
        }
    }

    #[test]
    fn test_transfer_failure_aborts_sequence() {
        let mut device = FakeDevice::speaking(2);
        device.fail_out_at = Some(3);

        match switch_to_accessory_mode(&device) {
            Err(Error::Transfer(rusb::Error::Pipe)) => {}
            other => panic!("expected transfer error, got {:?}", other),
        }
        // Nothing after the failed string, in particular no start request
        assert_eq!(device.outs(), 3);
    }

    #[test]
    fn test_identification_order() {
        assert_eq!(IDENTIFICATION[0], "Softcom");
        assert_eq!(IDENTIFICATION[3], "1");
        assert_eq!(IDENTIFICATION[5], "0123456789");
    }
}
