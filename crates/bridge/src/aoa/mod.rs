//! Android Open Accessory subsystem
//!
//! Finds a device, talks it into accessory mode, and opens the bulk endpoint
//! pair the session runs on:
//! - `registry`: one discovery generation and how history carries across polls
//! - `switcher`: the vendor control-transfer handshake
//! - `stack`: the context → device → config → interface → endpoints → stream chain
//! - `host`: the libusb-backed implementation of all of the above
//! - `discovery`: the retry loop driving it until a stack opens
//!
//! Everything here is blocking and runs before any worker starts.

pub mod discovery;
pub mod host;
pub mod registry;
pub mod stack;
pub mod switcher;

pub use discovery::{DiscoveryLoop, DiscoveryTiming, Step};
pub use host::{DeviceHost, UsbHost};
pub use registry::{DeviceHistory, DeviceMap, Generation, merge, propagate_history};
pub use stack::{AccessoryLink, AccessoryStack, Release, StackDevice, StackSettings};
pub use switcher::{ControlChannel, switch_to_accessory_mode};
