//! Timeline configuration.
//!
//! Loaded from RON; every field has a default so a config file only needs
//! the values it changes:
//!
//! ```ron
//! (
//!     grouping_window_secs: 120,
//!     utc_offset_minutes: 540,
//!     thread_count_policy: ExcludeTombstoned,
//! )
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How thread reply counters treat deleted replies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadCountPolicy {
    /// Counts only ever grow.
    #[default]
    Monotonic,
    /// A reply stops counting once it is deleted.
    ExcludeTombstoned,
}

/// Per-conversation timeline tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Max gap between consecutive messages of one display group.
    pub grouping_window_secs: u64,
    /// Character budget for reply previews, ellipsis included.
    pub preview_chars: usize,
    /// Max events buffered while waiting for their `Create`.
    pub pending_capacity: usize,
    /// How long a buffered event waits for its `Create`.
    pub pending_timeout_secs: u64,
    /// How long a local mutation may stay unconfirmed.
    pub provisional_timeout_secs: u64,
    /// Fixed offset defining the local calendar day for date boundaries.
    pub utc_offset_minutes: i32,
    pub thread_count_policy: ThreadCountPolicy,
    /// Max pinned messages per conversation, unlimited if `None`.
    pub pin_limit: Option<usize>,
    /// Max message body size in bytes.
    pub max_content_bytes: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            grouping_window_secs: 300,
            preview_chars: 120,
            pending_capacity: 256,
            pending_timeout_secs: 30,
            provisional_timeout_secs: 15,
            utc_offset_minutes: 0,
            thread_count_policy: ThreadCountPolicy::Monotonic,
            pin_limit: None,
            max_content_bytes: 64 * 1024,
        }
    }
}

impl TimelineConfig {
    /// Parse from RON text and validate.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no timeline can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preview_chars < 2 {
            return Err(ConfigError::Invalid(
                "preview_chars must leave room for the ellipsis".into(),
            ));
        }
        if self.pending_capacity == 0 {
            return Err(ConfigError::Invalid("pending_capacity must be > 0".into()));
        }
        // chrono::FixedOffset accepts strictly less than one day.
        if self.utc_offset_minutes.unsigned_abs() >= 24 * 60 {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        if self.max_content_bytes == 0 {
            return Err(ConfigError::Invalid("max_content_bytes must be > 0".into()));
        }
        Ok(())
    }

    pub fn grouping_window_ms(&self) -> u64 {
        self.grouping_window_secs.saturating_mul(1000)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }

    pub fn provisional_timeout(&self) -> Duration {
        Duration::from_secs(self.provisional_timeout_secs)
    }
}

/// Error loading a config.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("invalid config: {0}")]
    Invalid(String),
}
