//! Manual offline queue with flush-on-reconnect.
//!
//! A lighter alternative to [`crate::AutoSave`] for callers that decide
//! themselves when a change must wait for the network: no debounce, no undo,
//! and no status machine beyond "syncing".

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{SaveError, StoreError};
use crate::offline_queue::OfflineQueue;
use crate::saver::Saver;
use crate::store::{KeyValueStore, StorageKey};
use crate::{Document, UnixTimeMs, MAX_SYNC_QUEUE_ENTRIES};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("offline queue storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("sync failed: {0}")]
    Save(#[from] SaveError),
}

/// Clears the in-progress flag however the sync ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct OfflineSync<T, S> {
    saver: Arc<S>,
    queue: OfflineQueue<T>,
    enabled: AtomicBool,
    offline: AtomicBool,
    syncing: AtomicBool,
    queued: AtomicUsize,
}

impl<T, S> OfflineSync<T, S>
where
    T: Document,
    S: Saver<T>,
{
    /// Opens the queue stored under `storage_key`, starting online unless
    /// [`with_online`](Self::with_online) says otherwise.
    pub fn new(
        saver: Arc<S>,
        store: Arc<dyn KeyValueStore>,
        storage_key: &str,
    ) -> Result<Self, StoreError> {
        let key = StorageKey::offline_queue(storage_key)?;
        let queue = OfflineQueue::new(store, key, MAX_SYNC_QUEUE_ENTRIES);
        let queued = queue.len().unwrap_or_else(|e| {
            warn!("failed to load offline queue: {e}");
            0
        });

        Ok(Self {
            saver,
            queue,
            enabled: AtomicBool::new(true),
            offline: AtomicBool::new(false),
            syncing: AtomicBool::new(false),
            queued: AtomicUsize::new(queued),
        })
    }

    #[must_use]
    pub fn with_enabled(self, enabled: bool) -> Self {
        self.enabled.store(enabled, Ordering::Release);
        self
    }

    /// Seeds connectivity before the first `set_online` signal.
    #[must_use]
    pub fn with_online(self, online: bool) -> Self {
        self.offline.store(!online, Ordering::Release);
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Appends a change, keeping the ten most recent. Returns the queue length.
    pub fn queue_change(&self, data: T) -> Result<usize, SyncError> {
        let len = self.queue.push(data, UnixTimeMs::now())?;
        self.queued.store(len, Ordering::Release);
        Ok(len)
    }

    /// Saves the most recent queued change and drops it along with every
    /// older entry. Changes queued while the save runs are kept.
    ///
    /// Does nothing when disabled, when the queue is empty, or while another
    /// sync is running. On failure the queue is left intact.
    #[instrument(skip_all, fields(key = %self.queue.key()))]
    pub async fn sync_now(&self) -> Result<(), SyncError> {
        if !self.enabled.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.syncing.swap(true, Ordering::AcqRel) {
            debug!("sync already in progress");
            return Ok(());
        }
        let _guard = SyncGuard(&self.syncing);

        let Some(latest) = self.queue.latest()? else {
            return Ok(());
        };

        let synced_id = latest.id;
        info!(change_id = %synced_id, "syncing offline changes");
        if let Err(e) = self.saver.save(latest.data).await {
            error!("failed to sync offline changes: {e}");
            return Err(e.into());
        }

        // changes queued while the save ran stay for the next sync
        let remaining = self.queue.remove_through(synced_id)?;
        self.queued.store(remaining, Ordering::Release);
        info!(remaining, "offline changes synced");
        Ok(())
    }

    /// Records connectivity. Coming back online with queued changes syncs
    /// them straight away.
    pub async fn set_online(&self, online: bool) -> Result<(), SyncError> {
        let was_offline = self.offline.swap(!online, Ordering::AcqRel);
        if online && was_offline {
            info!("connection restored");
        }

        if online && self.enabled.load(Ordering::Acquire) && self.queued_changes() > 0 {
            self.sync_now().await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn queued_changes(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }
}
