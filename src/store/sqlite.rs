use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, instrument};

use super::{check_value_size, KeyValueStore, StorageKey};
use crate::error::StoreError;
use crate::UnixTimeMs;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS kv_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// SQLite-backed store for native shells.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self::with_connection(conn)?;
        info!("sqlite store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &StorageKey) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockFailed)?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &StorageKey, value: &str) -> Result<(), StoreError> {
        check_value_size(value)?;
        let now = i64::try_from(UnixTimeMs::now().as_millis()).unwrap_or(i64::MAX);
        let conn = self.conn.lock().map_err(|_| StoreError::LockFailed)?;
        conn.execute(
            r"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            ",
            params![key.as_str(), value, now],
        )?;
        Ok(())
    }

    fn remove(&self, key: &StorageKey) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockFailed)?;
        conn.execute(
            "DELETE FROM kv_entries WHERE key = ?1",
            params![key.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn upsert_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = StorageKey::new("tactics").unwrap();

        store.set(&key, "one").unwrap();
        store.set(&key, "two").unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("two"));

        store.remove(&key).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autosave.db");
        let key = StorageKey::offline_queue("vision").unwrap();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set(&key, "[]").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("[]"));
    }
}
