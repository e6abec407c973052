use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{KeyValueStore, StorageKey};
use crate::{Document, UnixTimeMs};

/// A change recorded while the network was unavailable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingChange<T> {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub timestamp: UnixTimeMs,
    pub data: T,
}

impl<T> PendingChange<T> {
    pub fn new(data: T, timestamp: UnixTimeMs) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            data,
        }
    }
}

/// Capped, insertion-ordered list of pending changes persisted as a JSON
/// array under one storage key. Only the newest entries are kept.
pub struct OfflineQueue<T> {
    store: Arc<dyn KeyValueStore>,
    key: StorageKey,
    capacity: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for OfflineQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("key", &self.key)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T: Document> OfflineQueue<T> {
    pub fn new(store: Arc<dyn KeyValueStore>, key: StorageKey, capacity: usize) -> Self {
        Self {
            store,
            key,
            capacity: capacity.max(1),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn load(&self) -> Result<Vec<PendingChange<T>>, StoreError> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).map_err(|e| StoreError::Corrupted {
            key: self.key.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.load().map(|entries| entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.len().map(|n| n == 0)
    }

    /// Appends a change and trims to capacity. Returns the new length.
    ///
    /// A queue that no longer parses is replaced rather than blocking new
    /// changes from being recorded.
    #[instrument(skip_all, fields(key = %self.key))]
    pub fn push(&self, data: T, now: UnixTimeMs) -> Result<usize, StoreError> {
        let mut entries = match self.load() {
            Ok(entries) => entries,
            Err(StoreError::Corrupted { reason, .. }) => {
                warn!("discarding unreadable offline queue: {reason}");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        entries.push(PendingChange::new(data, now));
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(..excess);
        }

        let raw = serde_json::to_string(&entries)?;
        self.store.set(&self.key, &raw)?;
        debug!(len = entries.len(), "queued offline change");
        Ok(entries.len())
    }

    /// The most recent change, the only one ever replayed.
    pub fn latest(&self) -> Result<Option<PendingChange<T>>, StoreError> {
        Ok(self.load()?.pop())
    }

    /// Drops `id` and everything queued before it, keeping later entries.
    /// Returns the remaining length. An unknown `id` leaves the queue as is.
    #[instrument(skip_all, fields(key = %self.key, change_id = %id))]
    pub fn remove_through(&self, id: Uuid) -> Result<usize, StoreError> {
        let mut entries = self.load()?;
        let Some(pos) = entries.iter().position(|e| e.id == id) else {
            debug!("change already gone from queue");
            return Ok(entries.len());
        };

        entries.drain(..=pos);
        if entries.is_empty() {
            self.store.remove(&self.key)?;
        } else {
            let raw = serde_json::to_string(&entries)?;
            self.store.set(&self.key, &raw)?;
        }
        Ok(entries.len())
    }

    #[instrument(skip_all, fields(key = %self.key))]
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(&self.key)
    }
}
