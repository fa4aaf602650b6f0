//! Controller configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then environment
//! variables prefixed with `ALBAEM_` (for example `ALBAEM_DEVICE_ADDRESS`).
//!
//! ```toml
//! device_address = "tcp://elem01r42-020-bl29.cells.es:5025"
//! settle_delay_ms = 100
//! start_timeout_ms = 5000
//! extraction = "aggregate"
//! ```

use crate::measurement::ExtractionStrategy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "ALBAEM_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] Box<figment::Error>),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// `host:port`, `tcp://host:port`, `serial:/dev/ttyUSB0` or a bare device path.
    pub device_address: String,
    /// Only used for serial addresses.
    pub baud_rate: u32,
    /// End-of-reply marker of the attribute server.
    pub terminator: String,
    /// Deadline for a single request/response exchange.
    pub io_timeout_ms: u64,
    /// Probe attempts before the device is declared unreachable.
    pub connect_attempts: u32,
    pub retry_delay_ms: u64,
    /// Pause after a configuration write before the device accepts the next one.
    pub settle_delay_ms: u64,
    /// Upper bound on the wait for the device to report acquiring after a start.
    pub start_timeout_ms: u64,
    /// Pause between state polls while starting. Zero polls back to back.
    pub poll_interval_ms: u64,
    pub extraction: ExtractionStrategy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device_address: "localhost:5025".to_string(),
            baud_rate: 115_200,
            terminator: "\n".to_string(),
            io_timeout_ms: 1000,
            connect_attempts: 3,
            retry_delay_ms: 2000,
            settle_delay_ms: 100,
            start_timeout_ms: 5000,
            poll_interval_ms: 0,
            extraction: ExtractionStrategy::default(),
        }
    }
}

impl ControllerConfig {
    /// Load the layered configuration. Without a file only defaults and environment apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            log::debug!("Loading controller config from {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_address.trim().is_empty() {
            return Err(ConfigError::Invalid("device_address is empty".to_string()));
        }
        if self.terminator.is_empty() {
            return Err(ConfigError::Invalid("terminator is empty".to_string()));
        }
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::Invalid("io_timeout_ms must be > 0".to_string()));
        }
        if self.start_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "start_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
