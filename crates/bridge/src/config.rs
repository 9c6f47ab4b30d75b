//! Bridge configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aoa::DiscoveryTiming;
use crate::aoa::stack::StackSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub channels: ChannelSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Discovery loop pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Sleep between polls when no device is eligible
    #[serde(default = "DiscoverySettings::default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Grace period after a switch request for the device to re-enumerate
    #[serde(default = "DiscoverySettings::default_switch_grace")]
    pub switch_grace_ms: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval(),
            switch_grace_ms: Self::default_switch_grace(),
        }
    }
}

impl DiscoverySettings {
    fn default_poll_interval() -> u64 {
        2000
    }

    fn default_switch_grace() -> u64 {
        1000
    }

    pub fn timing(&self) -> DiscoveryTiming {
        DiscoveryTiming {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            switch_grace: Duration::from_millis(self.switch_grace_ms),
        }
    }
}

/// Bulk transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Timeout of each bulk IN poll; bounds how long a closed stream goes unnoticed
    #[serde(default = "TransportSettings::default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default = "TransportSettings::default_write_timeout")]
    pub write_timeout_ms: u64,
    /// Largest outbound JSON body; larger reports are dropped. None = unbounded
    #[serde(default)]
    pub max_frame_bytes: Option<usize>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: Self::default_read_timeout(),
            write_timeout_ms: Self::default_write_timeout(),
            max_frame_bytes: None,
        }
    }
}

impl TransportSettings {
    fn default_read_timeout() -> u64 {
        500
    }

    fn default_write_timeout() -> u64 {
        5000
    }

    pub fn stack_settings(&self) -> StackSettings {
        StackSettings {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Capture executable; `~` and environment variables are expanded
    pub executable: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            executable: "MSFP".to_string(),
        }
    }
}

impl CaptureSettings {
    /// Executable path with `~` and `$VAR` expanded
    ///
    /// Falls back to the raw string when a variable is undefined.
    pub fn executable(&self) -> String {
        shellexpand::full(&self.executable)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| self.executable.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Capacity of each channel feeding work into a worker
    pub command_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            command_capacity: 9,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/aoa-bridge/bridge.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate TOML content
    pub fn parse(content: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("aoa-bridge").join("bridge.toml")
        } else {
            PathBuf::from(".config/aoa-bridge/bridge.toml")
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if self.discovery.poll_interval_ms == 0 {
            return Err(anyhow!("discovery.poll_interval_ms must be greater than 0"));
        }

        if self.transport.read_timeout_ms == 0 || self.transport.write_timeout_ms == 0 {
            return Err(anyhow!("transport timeouts must be greater than 0"));
        }

        if self.transport.max_frame_bytes == Some(0) {
            return Err(anyhow!("transport.max_frame_bytes must be greater than 0 when set"));
        }

        if self.capture.executable.trim().is_empty() {
            return Err(anyhow!("capture.executable must not be empty"));
        }

        if self.channels.command_capacity == 0 {
            return Err(anyhow!("channels.command_capacity must be at least 1"));
        }

        Ok(())
    }
}
