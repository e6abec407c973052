use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use super::{check_value_size, KeyValueStore, StorageKey, MAX_VALUE_SIZE};
use crate::error::StoreError;

const CURRENT_SCHEMA_VERSION: u32 = 1;
const STORE_MAGIC: &[u8; 4] = b"AVKV";
// envelope overhead on top of the largest accepted value
const MAX_FILE_BYTES: usize = MAX_VALUE_SIZE + 4096;
// most filesystems cap a name at 255 bytes
const MAX_HEX_NAME: usize = 240;

#[derive(Serialize, Deserialize, Debug)]
struct StoreEnvelope {
    magic: [u8; 4],
    schema_version: u32,
    checksum: [u8; 32],
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
}

/// One checksummed file per key inside a directory.
///
/// File names are the hex-encoded key (or its blake3 digest for long keys)
/// so any valid [`StorageKey`] maps to a flat, portable name. Writes go to a
/// temp file which is synced and then renamed over the target.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        let encoded = hex::encode(key.as_str());
        if encoded.len() <= MAX_HEX_NAME {
            return self.dir.join(format!("{encoded}.kv"));
        }
        let digest = blake3::hash(key.as_str().as_bytes());
        self.dir.join(format!("h-{}.kv", digest.to_hex()))
    }

    fn encode(value: &str) -> Result<Vec<u8>, StoreError> {
        let payload = value.as_bytes().to_vec();
        let checksum = blake3::hash(&payload);

        let envelope = StoreEnvelope {
            magic: *STORE_MAGIC,
            schema_version: CURRENT_SCHEMA_VERSION,
            checksum: *checksum.as_bytes(),
            payload,
        };

        let mut bytes = Vec::new();
        ciborium::into_writer(&envelope, &mut bytes)?;
        Ok(bytes)
    }

    fn decode(key: &StorageKey, bytes: &[u8]) -> Result<String, StoreError> {
        if bytes.is_empty() {
            return Err(StoreError::Corrupted {
                key: key.to_string(),
                reason: "empty file".into(),
            });
        }
        if bytes.len() > MAX_FILE_BYTES {
            return Err(StoreError::ValueTooLarge {
                size: bytes.len(),
                max: MAX_FILE_BYTES,
            });
        }

        let envelope: StoreEnvelope = ciborium::from_reader(bytes)?;

        if envelope.magic != *STORE_MAGIC {
            return Err(StoreError::Corrupted {
                key: key.to_string(),
                reason: "invalid magic bytes".into(),
            });
        }

        if envelope.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::FutureSchema {
                found: envelope.schema_version,
                max: CURRENT_SCHEMA_VERSION,
            });
        }

        let actual = blake3::hash(&envelope.payload);
        if actual.as_bytes() != &envelope.checksum {
            return Err(StoreError::IntegrityCheckFailed {
                expected: hex::encode(envelope.checksum),
                actual: hex::encode(actual.as_bytes()),
            });
        }

        String::from_utf8(envelope.payload).map_err(|e| StoreError::Corrupted {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

impl KeyValueStore for FileStore {
    #[instrument(skip_all, fields(key = %key))]
    fn get(&self, key: &StorageKey) -> Result<Option<String>, StoreError> {
        let bytes = match std::fs::read(self.path_for(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::decode(key, &bytes).map(Some)
    }

    #[instrument(skip_all, fields(key = %key, len = value.len()))]
    fn set(&self, key: &StorageKey, value: &str) -> Result<(), StoreError> {
        check_value_size(value)?;
        let bytes = Self::encode(value)?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");

        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        std::fs::rename(&tmp_path, &path)?;

        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!("wrote {} bytes", bytes.len());
        Ok(())
    }

    #[instrument(skip_all, fields(key = %key))]
    fn remove(&self, key: &StorageKey) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
