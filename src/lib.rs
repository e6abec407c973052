// lib.rs - auto-save coordinator core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

//! Debounced auto-save for a single continuously edited document.
//!
//! [`AutoSave`] watches a value, saves it through an injected [`Saver`] once
//! edits pause, queues changes in a durable [`KeyValueStore`] while the
//! network is gone, and keeps the previous value around for a short undo
//! window after every confirmed save. Everything it knows is exposed as a
//! [`SaveState`] for a presentation layer to render.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod offline_queue;
pub mod saver;
pub mod store;
pub mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

pub use config::AutoSaveConfig;
pub use coordinator::AutoSave;
pub use error::{AutoSaveError, ErrorKind, SaveError, StoreError};
pub use model::{SaveState, SaveStatus, UndoSnapshot};
pub use offline_queue::{OfflineQueue, PendingChange};
pub use saver::{from_fn, FnSaver, Saver};
pub use store::{FileStore, KeyValueStore, MemoryStore, StorageKey};
#[cfg(not(target_arch = "wasm32"))]
pub use store::SqliteStore;
pub use sync::{OfflineSync, SyncError};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(800);
pub const DEFAULT_UNDO_WINDOW: Duration = Duration::from_millis(10_000);
pub const SAVED_DISPLAY: Duration = Duration::from_millis(2_000);
pub const UNDO_TICK: Duration = Duration::from_secs(1);
pub const DEFAULT_STORAGE_KEY: &str = "default";
pub const OFFLINE_STORAGE_PREFIX: &str = "12wy_offline_";
pub const MAX_QUEUED_CHANGES: usize = 5;
pub const MAX_SYNC_QUEUE_ENTRIES: usize = 10;

/// Anything the coordinator can track: cloned into saves, compared against
/// the baseline, and serialized into the offline queue.
pub trait Document: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Document for T where T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Unix timestamp in milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(0),
        )
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn elapsed_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Default for UnixTimeMs {
    fn default() -> Self {
        Self::now()
    }
}

/// Whole seconds shown by an undo countdown for a window, rounded up.
#[must_use]
pub fn countdown_seconds(window: Duration) -> u64 {
    let millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
    millis.div_ceil(1000)
}
