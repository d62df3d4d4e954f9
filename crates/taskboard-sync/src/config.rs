//! Sync configuration
//!
//! Loaded from TOML; every key is optional and falls back to its default.
//!
//! ```toml
//! field_debounce_ms = 200
//! rich_text_debounce_ms = 500
//! saved_flag_ms = 1500
//! notice_capacity = 64
//! refetch_on_conflict = true
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use taskboard_model::EntityKind;

/// Timings and policies of the sync layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period for short fields (titles, description, icon)
    pub field_debounce_ms: u64,
    /// Quiet period for rich-text task fields
    pub rich_text_debounce_ms: u64,
    /// How long the "saved" indicator stays on
    pub saved_flag_ms: u64,
    /// Buffered notices per subscriber
    pub notice_capacity: usize,
    /// Re-fetch affected collections after a conflicting order write
    pub refetch_on_conflict: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            field_debounce_ms: 200,
            rich_text_debounce_ms: 500,
            saved_flag_ms: 1500,
            notice_capacity: 64,
            refetch_on_conflict: true,
        }
    }
}

impl SyncConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_field_debounce(mut self, delay: Duration) -> Self {
        self.field_debounce_ms = millis(delay);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_rich_text_debounce(mut self, delay: Duration) -> Self {
        self.rich_text_debounce_ms = millis(delay);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_saved_flag(mut self, duration: Duration) -> Self {
        self.saved_flag_ms = millis(duration);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_notice_capacity(mut self, capacity: usize) -> Self {
        self.notice_capacity = capacity;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_refetch_on_conflict(mut self, enabled: bool) -> Self {
        self.refetch_on_conflict = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub fn field_debounce(&self) -> Duration {
        Duration::from_millis(self.field_debounce_ms)
    }

    #[inline]
    #[must_use]
    pub fn rich_text_debounce(&self) -> Duration {
        Duration::from_millis(self.rich_text_debounce_ms)
    }

    #[inline]
    #[must_use]
    pub fn saved_flag(&self) -> Duration {
        Duration::from_millis(self.saved_flag_ms)
    }

    /// Coalescing delay for edits of an entity kind
    ///
    /// Task fields are edited in the rich-text modal and wait longer.
    #[must_use]
    pub fn delay_for(&self, kind: EntityKind) -> Duration {
        match kind {
            EntityKind::Task => self.rich_text_debounce(),
            EntityKind::Board | EntityKind::Section => self.field_debounce(),
        }
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// - `ConfigError::Parse` on malformed TOML
    /// - `ConfigError::Invalid` if `notice_capacity` is zero
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check values are usable
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if `notice_capacity` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notice_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notice_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
