use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreError;
use crate::OFFLINE_STORAGE_PREFIX;

pub const MAX_KEY_LENGTH: usize = 512;

/// Validated storage key. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(key: impl Into<String>) -> Result<Self, StoreError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// Key holding the offline queue for one logical document.
    pub fn offline_queue(name: &str) -> Result<Self, StoreError> {
        Self::new(format!("{OFFLINE_STORAGE_PREFIX}{name}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> Result<(), StoreError> {
        let invalid = |reason: &str| StoreError::InvalidKey {
            key: key.chars().take(50).collect(),
            reason: reason.to_string(),
        };

        if key.is_empty() {
            return Err(invalid("key cannot be empty"));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(invalid(&format!(
                "key exceeds maximum length of {MAX_KEY_LENGTH} bytes"
            )));
        }
        if key.trim().is_empty() {
            return Err(invalid("key cannot be only whitespace"));
        }
        if key.contains('\0') {
            return Err(invalid("key cannot contain null bytes"));
        }
        if key.contains("..") {
            return Err(invalid("key cannot contain path traversal sequences"));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(invalid("key cannot start with path separator"));
        }
        if key.chars().any(|c| c.is_control() && c != '\t') {
            return Err(invalid("key contains invalid control characters"));
        }
        Ok(())
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
