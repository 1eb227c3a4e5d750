//! Dome configuration using Figment.
//!
//! Configuration is layered:
//! 1. Built-in defaults
//! 2. A TOML file (`config/dome.toml` unless another path is given)
//! 3. Environment variables prefixed with `DOME_` (`__` separates sections)
//!
//! # Example
//! ```no_run
//! use dome_driver::config::DomeConfig;
//!
//! // DOME_PORT__NAME=/dev/ttyUSB1 overrides [port].name from the file
//! let config = DomeConfig::load()?;
//! config.validate()?;
//! println!("Dome on {}", config.port.name);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use dome_core::error::{DomeError, DomeResult};
use dome_core::serial::PortConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/dome.toml";

/// Top-level dome configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomeConfig {
    /// Serial port settings
    #[serde(default)]
    pub port: PortSettings,
    /// Exchange timing
    #[serde(default)]
    pub timing: TimingConfig,
    /// Logging settings, applied by the application that owns the subscriber
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port settings. The baud rate is fixed by the firmware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSettings {
    /// Serial port path (e.g., "/dev/ttyACM0", "COM3")
    #[serde(default = "default_port_name")]
    pub name: String,
}

/// Timeouts and drain windows for one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How long to wait for a terminated reply
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Window for discarding unsolicited bytes before every command
    #[serde(default = "default_drain_window")]
    pub drain_window_ms: u64,
    /// Window for discarding leftover bytes after the line was reset
    #[serde(default = "default_resync_window")]
    pub resync_window_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Full exchange tracing; overrides `level` with `trace`
    #[serde(default)]
    pub trace: bool,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_port_name() -> String {
    if cfg!(windows) {
        "COM1".to_string()
    } else {
        "/dev/ttyACM0".to_string()
    }
}

fn default_read_timeout() -> u64 {
    2000
}

fn default_drain_window() -> u64 {
    10
}

fn default_resync_window() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            name: default_port_name(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout(),
            drain_window_ms: default_drain_window(),
            resync_window_ms: default_resync_window(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            trace: false,
            format: default_log_format(),
        }
    }
}

impl DomeConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(DomeConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DOME_").split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> DomeResult<()> {
        if self.port.name.trim().is_empty() {
            return Err(DomeError::Configuration(
                "port.name must not be empty".into(),
            ));
        }

        if self.timing.read_timeout_ms == 0 {
            return Err(DomeError::Configuration(
                "timing.read_timeout_ms must be positive".into(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(DomeError::Configuration(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(DomeError::Configuration(format!(
                "Invalid logging.format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }

    /// Port configuration handed to the transport on connect.
    pub fn port_config(&self) -> PortConfig {
        PortConfig::new(self.port.name.clone())
    }

    /// Effective log level, taking `logging.trace` into account.
    pub fn effective_log_level(&self) -> &str {
        if self.logging.trace {
            "trace"
        } else {
            &self.logging.level
        }
    }
}

impl TimingConfig {
    /// Reply timeout as a `Duration`.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Pre-command drain window as a `Duration`.
    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_window_ms)
    }

    /// Post-reset drain window as a `Duration`.
    pub fn resync_window(&self) -> Duration {
        Duration::from_millis(self.resync_window_ms)
    }
}
