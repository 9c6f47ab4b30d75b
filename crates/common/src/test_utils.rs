//! Test utilities for the accessory bridge
//!
//! Provides identity builders and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{accessory_identity, plain_identity};
//!
//! assert!(accessory_identity(1, 4).is_accessory_mode());
//! assert!(!plain_identity(1, 5).is_accessory_mode());
//! ```

use crate::usb_types::{AOA_PRODUCT_IDS, AOA_VENDOR_ID, DeviceIdentity};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Vendor/product of the ordinary (not yet switched) phone used in tests
pub const PLAIN_VENDOR_ID: u16 = 0x04E8;
pub const PLAIN_PRODUCT_ID: u16 = 0x6860;

/// Identity of a device already in accessory mode
pub fn accessory_identity(bus: u8, address: u8) -> DeviceIdentity {
    DeviceIdentity::new(bus, address, AOA_VENDOR_ID, AOA_PRODUCT_IDS[0])
}

/// Identity of a device that still needs switching
pub fn plain_identity(bus: u8, address: u8) -> DeviceIdentity {
    DeviceIdentity::new(bus, address, PLAIN_VENDOR_ID, PLAIN_PRODUCT_ID)
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_builders() {
        let acc = accessory_identity(2, 7);
        assert_eq!((acc.bus, acc.address), (2, 7));
        assert!(acc.is_accessory_mode());

        let plain = plain_identity(2, 8);
        assert_eq!(plain.vendor_id, PLAIN_VENDOR_ID);
        assert!(!plain.is_accessory_mode());
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_secs(10)),
        )
        .await;
        assert!(result.is_err());
    }
}
