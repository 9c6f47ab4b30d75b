//! Common utilities for the accessory bridge
//!
//! This crate provides the pieces shared by every part of the bridge: the
//! error taxonomy, USB device identities, logging setup, and the channel set
//! that connects the supervisor to its workers.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb_types;

pub use channel::{
    CaptureRequest, CaptureResult, FrameOutcome, ImageAssemblyRequest, ImageAssemblyResult,
    Notifier, SupervisorChannels, Termination, WorkerChannels, WorkerId, WorkerNotice,
    create_session_channels,
};
pub use error::{Error, Result, TeardownErrors, TeardownFailure};
pub use logging::setup_logging;
pub use usb_types::{AOA_PRODUCT_IDS, AOA_VENDOR_ID, DeviceIdentity};
