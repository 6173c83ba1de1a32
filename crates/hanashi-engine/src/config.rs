//! Engine configuration.
//!
//! Loaded from RON. Every field has a default, so a partial file (or an
//! empty `()`) is valid:
//!
//! ```ron
//! (
//!     bus_capacity: 4096,
//!     timeline: (grouping_window_secs: 300, pin_limit: Some(50)),
//! )
//! ```

use std::time::Duration;

use hanashi_timeline::{ConfigError, TimelineConfig};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Applied to every conversation.
    pub timeline: TimelineConfig,
    /// Capacity of the broadcast channel behind subscriptions.
    pub bus_capacity: usize,
    /// Period of the background sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeline: TimelineConfig::default(),
            bus_capacity: 1024,
            sweep_interval_secs: 1,
        }
    }
}

impl EngineConfig {
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeline.validate()?;
        if self.bus_capacity == 0 {
            return Err(ConfigError::Invalid("bus_capacity must be > 0".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
