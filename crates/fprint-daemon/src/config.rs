//! Daemon configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use fprint_usb::KNOWN_SENSOR_VENDORS;
use fprint_usb::device::parse_vendor_id;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// IPC settings
    #[serde(default)]
    pub ipc: IpcConfig,
    /// USB discovery settings
    #[serde(default)]
    pub usb: UsbConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Keep running when no device is in use
    #[serde(default)]
    pub no_timeout: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { log_level: default_log_level(), no_timeout: false }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// IPC settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IpcConfig {
    /// Socket path (optional, uses the runtime dir if not set)
    pub socket_path: Option<PathBuf>,
}

/// USB discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbConfig {
    /// Vendor ids of fingerprint sensors, as hex strings
    #[serde(default = "default_vendor_ids")]
    pub vendor_ids: Vec<String>,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self { vendor_ids: default_vendor_ids() }
    }
}

impl UsbConfig {
    /// Parsed vendor ids.
    pub fn vendor_ids(&self) -> Result<Vec<u16>> {
        self.vendor_ids
            .iter()
            .map(|s| parse_vendor_id(s).with_context(|| format!("Invalid [usb] vendor_ids entry {s:?}")))
            .collect()
    }
}

fn default_vendor_ids() -> Vec<String> {
    KNOWN_SENSOR_VENDORS.iter().map(|(vid, _)| format!("{vid:04x}")).collect()
}

/// Load configuration from `path`, or from the user config dir when `None`.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => config_path()?,
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {config_path:?}"))?;
        parse_config(&content).with_context(|| format!("Failed to parse config file: {config_path:?}"))
    } else {
        info!(?config_path, "Config file not found, using defaults");
        Ok(Config::default())
    }
}

/// Parse a TOML configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    config.usb.vendor_ids()?;
    Ok(config)
}

/// Get the configuration file path.
fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("net", "reactivated", "fprint")
        .context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}
