//! Supervisor configuration.
//!
//! Loaded once at startup from an optional TOML file. Every field has a
//! default, so an absent file yields the stock behaviour. The record is
//! never mutated after load.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Modem driver backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Drive the modem through the raw QMI control device with `qmicli`.
    Qmicli,
    /// Drive the modem through the `qmi-network` helper script.
    QmiNetwork,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Qmicli => "qmicli",
            Backend::QmiNetwork => "qmi-network",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable supervisor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Access point name used for network registration.
    pub apn: String,
    /// QMI control device of the modem.
    pub qmi_device: String,
    /// Logical network interface carrying the data path.
    pub interface: String,
    /// Fixed external address used for the reachability probe.
    pub probe_addr: String,
    /// Hard wall-clock deadline for every external command, in seconds.
    pub command_timeout_s: u64,
    /// Grace period after process start before modem initialization, in
    /// seconds.
    pub startup_delay_s: u32,
    /// Consecutive failed probes that force a session restart.
    pub failure_threshold: u32,
    /// Settling pause between sequential driver steps, in milliseconds.
    pub settle_pause_ms: u64,
    /// Last-run marker file; its absence at startup signals a fresh machine
    /// boot.
    pub boot_marker: PathBuf,
    /// Driver backend.
    pub backend: Backend,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            apn: "internet".into(),
            qmi_device: "/dev/cdc-wdm0".into(),
            interface: "wwan0".into(),
            probe_addr: "8.8.8.8".into(),
            command_timeout_s: 5,
            startup_delay_s: 60,
            failure_threshold: 5,
            settle_pause_ms: 1000,
            boot_marker: PathBuf::from("/tmp/wwand.boot"),
            backend: Backend::Qmicli,
        }
    }
}

impl SupervisorConfig {
    /// Load the configuration, falling back to defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(SupervisorConfig::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_s)
    }

    pub fn settle_pause(&self) -> Duration {
        Duration::from_millis(self.settle_pause_ms)
    }
}
