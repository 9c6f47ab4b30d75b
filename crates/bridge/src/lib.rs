//! Android Open Accessory bridge
//!
//! Finds an Android device on USB, switches it into accessory mode, and then
//! serves it: inbound JSON commands drive an external fingerprint capture
//! executable, and its output comes back to the device as framed JSON reports.

pub mod aoa;
pub mod config;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod workers;

pub use config::BridgeConfig;
pub use session::run_session;
pub use supervisor::{DeathPolicy, SessionSummary, Supervisor};
