//! aoa-bridge
//!
//! Waits for an Android device, switches it into accessory mode and bridges
//! its commands to the fingerprint capture executable.

use anyhow::{Context, Result};
use bridge::aoa::{DeviceHost, DiscoveryLoop, UsbHost};
use bridge::config::BridgeConfig;
use bridge::run_session;
use clap::Parser;
use common::setup_logging;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "aoa-bridge")]
#[command(
    author,
    version,
    about = "AOA bridge - Drive a fingerprint scanner from an Android accessory"
)]
#[command(long_about = "
Bridges an Android device in accessory mode to a local fingerprint capture
executable. The device sends JSON commands over USB; capture previews and the
final images go back as length-prefixed JSON reports.

EXAMPLES:
    # Wait for a device and serve it
    aoa-bridge

    # Run with custom config
    aoa-bridge --config /path/to/bridge.toml

    # List USB devices and exit
    aoa-bridge --list-devices

    # Run with debug logging
    aoa-bridge --log-level debug

CONFIGURATION:
    The bridge looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/aoa-bridge/bridge.toml
    3. /etc/aoa-bridge/bridge.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = BridgeConfig::default();
        let path = BridgeConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        BridgeConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        BridgeConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("aoa-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let host = UsbHost::new(config.transport.stack_settings());

    if args.list_devices {
        return list_devices_mode(&host);
    }

    let timing = config.discovery.timing();
    let stack = tokio::task::spawn_blocking(move || DiscoveryLoop::new(host, timing).run())
        .await
        .context("Discovery loop panicked")?;
    info!("Accessory {} connected", stack.identity());

    let summary = run_session(stack, &config)
        .await
        .context("Session failed to start")?;

    for notice in &summary.exits {
        info!("Worker {} exited: {:?}", notice.worker, notice.termination);
    }
    if summary.frames_in_flight > 0 {
        warn!(
            "{} reports unconfirmed at shutdown",
            summary.frames_in_flight
        );
    }
    if let Err(e) = summary.teardown {
        error!("Teardown incomplete: {}", e);
        return Err(e).context("Failed to release accessory");
    }

    info!("Session complete");
    Ok(())
}

/// List USB devices and exit
fn list_devices_mode(host: &UsbHost) -> Result<()> {
    let devices = host.enumerate().context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for identity in devices.keys() {
        let mode = if identity.is_accessory_mode() {
            "accessory mode"
        } else {
            "not in accessory mode"
        };
        println!("  {} - {}", identity, mode);
    }
    Ok(())
}
