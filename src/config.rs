use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AutoSaveError;
use crate::{
    DEFAULT_DEBOUNCE, DEFAULT_STORAGE_KEY, DEFAULT_UNDO_WINDOW, MAX_QUEUED_CHANGES, SAVED_DISPLAY,
};

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Options recognised by [`AutoSave`](crate::AutoSave).
///
/// Field names follow the camelCase keys used by the web client so a config
/// blob can be shared between the two.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct AutoSaveConfig {
    pub debounce_ms: u64,
    pub undo_window_ms: u64,
    pub storage_key: String,
    pub enabled: bool,
    /// How long `saved` is shown before decaying to `idle`.
    pub saved_display_ms: u64,
    pub max_queued: usize,
    /// Connectivity at spawn, before the first `set_online` signal arrives.
    pub start_online: bool,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: millis(DEFAULT_DEBOUNCE),
            undo_window_ms: millis(DEFAULT_UNDO_WINDOW),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            enabled: true,
            saved_display_ms: millis(SAVED_DISPLAY),
            max_queued: MAX_QUEUED_CHANGES,
            start_online: true,
        }
    }
}

impl AutoSaveConfig {
    #[must_use]
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = millis(debounce);
        self
    }

    #[must_use]
    pub fn with_undo_window(mut self, window: Duration) -> Self {
        self.undo_window_ms = millis(window);
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_online(mut self, online: bool) -> Self {
        self.start_online = online;
        self
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn undo_window(&self) -> Duration {
        Duration::from_millis(self.undo_window_ms)
    }

    #[must_use]
    pub fn saved_display(&self) -> Duration {
        Duration::from_millis(self.saved_display_ms)
    }

    pub fn from_json_str(json: &str) -> Result<Self, AutoSaveError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AutoSaveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AutoSaveError> {
        if self.debounce_ms == 0 {
            return Err(AutoSaveError::Config("debounceMs must be > 0".into()));
        }
        if self.undo_window_ms == 0 {
            return Err(AutoSaveError::Config("undoWindowMs must be > 0".into()));
        }
        if self.max_queued == 0 {
            return Err(AutoSaveError::Config("maxQueued must be > 0".into()));
        }
        if self.storage_key.trim().is_empty() {
            return Err(AutoSaveError::Config("storageKey cannot be empty".into()));
        }
        Ok(())
    }
}
