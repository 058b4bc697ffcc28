//! Controller settings
//!
//! Tunables for the controller itself, not for the engine. All fields have
//! defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! restart_throttle_ms = 300
//! watchdog_interval_ms = 1000
//! worker_threads = 2
//!
//! [diagnostics]
//! file_enabled = true
//! # file = "/var/log/boxlink/early_start.log"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Minimum spacing between two restarts
    #[serde(default = "default_restart_throttle_ms")]
    pub restart_throttle_ms: u64,

    /// Heartbeat period while a start is in progress
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Worker threads of the controller's runtime
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default)]
    pub diagnostics: DiagnosticsSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSettings {
    /// Append native lines to a file when no log receiver is registered
    #[serde(default = "default_true")]
    pub file_enabled: bool,

    /// Override for the diagnostics file location
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_restart_throttle_ms() -> u64 {
    300
}

fn default_watchdog_interval_ms() -> u64 {
    1000
}

fn default_worker_threads() -> usize {
    2
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            restart_throttle_ms: default_restart_throttle_ms(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            worker_threads: default_worker_threads(),
            diagnostics: DiagnosticsSettings::default(),
        }
    }
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            file_enabled: true,
            file: None,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::Settings("worker_threads must be at least 1".into()));
        }
        if self.watchdog_interval_ms < 10 {
            return Err(Error::Settings(format!(
                "watchdog_interval_ms {} is too small (minimum 10)",
                self.watchdog_interval_ms
            )));
        }
        Ok(())
    }

    pub fn restart_throttle(&self) -> Duration {
        Duration::from_millis(self.restart_throttle_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    /// Sample settings file with every field spelled out
    pub fn sample() -> String {
        r#"# Boxlink controller settings

# Minimum spacing between engine restarts (reload / replace), in milliseconds
restart_throttle_ms = 300

# Heartbeat period while an engine is starting, in milliseconds
watchdog_interval_ms = 1000

# Worker threads used to drive the engine
worker_threads = 2

[diagnostics]
# Append native diagnostics to a file when no log receiver is registered
file_enabled = true

# Defaults to <Documents>/boxlink/early_start.log
# file = "/tmp/boxlink-early-start.log"
"#
        .to_string()
    }
}
