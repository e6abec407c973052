//! Durable key-value storage for the offline queue.
//!
//! The coordinator only needs string values under string keys, the same
//! contract as browser local storage. Backends are synchronous; queue
//! mutations happen between awaits and never block on the network.

mod file;
mod key;
mod memory;
#[cfg(not(target_arch = "wasm32"))]
mod sqlite;

pub use self::file::FileStore;
pub use self::key::{StorageKey, MAX_KEY_LENGTH};
pub use self::memory::MemoryStore;
#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteStore;

use crate::error::StoreError;

pub const MAX_VALUE_SIZE: usize = 5 * 1024 * 1024;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &StorageKey) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &StorageKey, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &StorageKey) -> Result<(), StoreError>;
}

pub(crate) fn check_value_size(value: &str) -> Result<(), StoreError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(StoreError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}
