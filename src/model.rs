use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

use crate::error::SaveError;
use crate::UnixTimeMs;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
    Offline,
    Syncing,
}

impl SaveStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Error => "error",
            Self::Offline => "offline",
            Self::Syncing => "syncing",
        }
    }

    /// Text for a save indicator.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Auto-save enabled",
            Self::Saving => "Saving...",
            Self::Saved => "Saved",
            Self::Error => "Save failed",
            Self::Offline => "Offline",
            Self::Syncing => "Syncing...",
        }
    }

    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Saving | Self::Syncing)
    }
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a presentation layer needs to render save feedback.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveState {
    pub status: SaveStatus,
    pub last_saved: Option<UnixTimeMs>,
    pub error: Option<SaveError>,
    pub can_undo: bool,
    pub undo_countdown: u64,
    pub is_offline: bool,
    pub pending_changes: usize,
}

impl SaveState {
    /// Whether a retry control makes sense right now.
    #[must_use]
    pub fn offers_retry(&self) -> bool {
        match self.status {
            SaveStatus::Error => true,
            SaveStatus::Offline => self.pending_changes > 0 && !self.is_offline,
            _ => false,
        }
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(SaveError::user_facing_message)
    }
}

/// Predecessor of the latest confirmed save, revertible until `expires_at`.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoSnapshot<T> {
    pub value: T,
    pub expires_at: Instant,
}

impl<T> UndoSnapshot<T> {
    pub fn new(value: T, expires_at: Instant) -> Self {
        Self { value, expires_at }
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}
