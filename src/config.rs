//! Service configuration
//!
//! Read from a JSON file (default [`DEFAULT_CONFIG_PATH`]). Every field has a
//! default, so a missing file or a partial file is fine. A file that exists but
//! cannot be parsed or fails validation is an error.

use crate::core::error::{Error, Result};
use crate::core::gateway::IP_FORWARD_PATH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/comitup-iptmgr.json";

/// Upper bound for the per-command timeout (one minute)
const MAX_COMMAND_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Packet-filter binary, bare name or absolute path
    #[serde(default = "default_iptables_command")]
    pub iptables_command: String,
    /// Per-command timeout in milliseconds (clamped to 1..=60000)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Allow router mode when two wireless devices are present
    #[serde(default)]
    pub enable_appliance_mode: bool,
    /// Pin the access-point device instead of picking the first wireless one
    #[serde(default)]
    pub ap_device: Option<String>,
    /// Pin the link device
    #[serde(default)]
    pub link_device: Option<String>,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    #[serde(default = "default_route_table")]
    pub route_table: PathBuf,
    #[serde(default = "default_ip_forward_path")]
    pub ip_forward_path: PathBuf,
    /// JSON-lines audit log in the state directory (opt-in)
    #[serde(default)]
    pub enable_audit_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            iptables_command: default_iptables_command(),
            command_timeout_ms: default_command_timeout_ms(),
            enable_appliance_mode: false,
            ap_device: None,
            link_device: None,
            sysfs_root: default_sysfs_root(),
            route_table: default_route_table(),
            ip_forward_path: default_ip_forward_path(),
            enable_audit_log: false,
        }
    }
}

fn default_iptables_command() -> String {
    "iptables".to_string()
}

fn default_command_timeout_ms() -> u64 {
    5_000
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_route_table() -> PathBuf {
    PathBuf::from("/proc/net/route")
}

fn default_ip_forward_path() -> PathBuf {
    PathBuf::from(IP_FORWARD_PATH)
}

impl Config {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.clamp(1, MAX_COMMAND_TIMEOUT_MS))
    }

    /// Rejects values that would be unsafe on a command line.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        crate::validators::validate_command(&self.iptables_command)
            .map_err(|e| Error::Config(format!("iptables_command: {e}")))?;

        for (field, value) in [("ap_device", &self.ap_device), ("link_device", &self.link_device)] {
            if let Some(name) = value {
                crate::validators::validate_interface(name)
                    .map_err(|e| Error::Config(format!("{field}: {e}")))?;
            }
        }

        Ok(())
    }
}

/// Loads the configuration, or returns defaults if the file does not exist.
///
/// # Errors
///
/// Returns `Error::Io` if the file exists but cannot be read, and
/// `Error::Config` if it cannot be parsed or fails validation.
pub async fn load_config(path: &Path) -> Result<Config> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Err(e) => return Err(e.into()),
    };

    let config: Config = serde_json::from_str(&json)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}
