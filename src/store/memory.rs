use std::collections::HashMap;
use std::sync::RwLock;

use super::{check_value_size, KeyValueStore, StorageKey};
use crate::error::StoreError;

/// In-process store. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &StorageKey) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::LockFailed)?;
        Ok(entries.get(key.as_str()).cloned())
    }

    fn set(&self, key: &StorageKey, value: &str) -> Result<(), StoreError> {
        check_value_size(value)?;
        let mut entries = self.entries.write().map_err(|_| StoreError::LockFailed)?;
        entries.insert(key.as_str().to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &StorageKey) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockFailed)?;
        entries.remove(key.as_str());
        Ok(())
    }
}
