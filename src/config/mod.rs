//! Configuration module for sensorgraph
//!
//! This module holds the engine's tunables and the capability description of
//! the connected board.
//!
//! # Files
//!
//! An [`EngineConfig`] can be loaded from TOML (`*.toml`) or JSON (`*.json`).
//! Every field has a default, so a config file only needs the values it
//! overrides:
//!
//! ```toml
//! response_timeout_ms = 500
//!
//! [device]
//! firmware = { major = 1, minor = 2, patch = 5 }
//! processor_revision = 1
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sensorgraph::config::EngineConfig;
//!
//! let config = EngineConfig::load("board.toml")?;
//! assert!(config.response_timeout().as_millis() > 0);
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Error, Result};
use crate::protocol::TICK_TIME_STEP_MS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default timeout for a single device round-trip in milliseconds
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 250;

/// Default capacity of the transport → engine event channel
pub const DEFAULT_LINK_QUEUE_CAPACITY: usize = 4096;

/// Default number of progress updates requested per log download
pub const DEFAULT_PROGRESS_UPDATES: u32 = 100;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-request timeout for create/read round-trips
    pub response_timeout_ms: u64,

    /// Capacity of the bounded channel carrying transport events
    pub link_queue_capacity: usize,

    /// Duration of one logging tick in milliseconds
    pub tick_duration_ms: f64,

    /// Progress notifications requested during a log download (0 = none)
    pub progress_updates: u32,

    /// Capabilities of the connected board
    pub device: DeviceInfo,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            link_queue_capacity: DEFAULT_LINK_QUEUE_CAPACITY,
            tick_duration_ms: TICK_TIME_STEP_MS,
            progress_updates: DEFAULT_PROGRESS_UPDATES,
            device: DeviceInfo::default(),
        }
    }
}

impl EngineConfig {
    /// Create a default config for the given board
    pub fn for_device(device: DeviceInfo) -> Self {
        Self {
            device,
            ..Self::default()
        }
    }

    /// Builder-style timeout override
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))
    }

    /// Parse a JSON document
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))
    }

    /// Load a config file, picking the format from the extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = if is_json(path) {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        config.validate()?;
        tracing::debug!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    /// Save the config, picking the format from the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(Error::Config("response_timeout_ms must be positive".into()));
        }
        if self.link_queue_capacity == 0 {
            return Err(Error::Config("link_queue_capacity must be positive".into()));
        }
        if !(self.tick_duration_ms > 0.0) {
            return Err(Error::Config("tick_duration_ms must be positive".into()));
        }
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
