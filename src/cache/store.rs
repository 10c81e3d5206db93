//! Key-value storage backends for the chunk cache.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CacheError;

/// Minimal persistent key-value store holding JSON strings.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value. A missing key is `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Insert or replace a value.
    async fn put(&self, key: &str, value: String) -> Result<(), CacheError>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// List all keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}

/// In-process store, lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Longest hex-encoded key used directly as a file name. Leaves room for
/// the extension and the temporary-file suffix under the 255-byte limit.
const MAX_HEX_NAME: usize = 180;

/// File-name prefix of entries stored under the hash of their key.
const HASHED_PREFIX: &str = "h-";

/// Envelope for entries whose key cannot be recovered from the file name.
#[derive(Serialize, Deserialize)]
struct HashedEntry {
    key: String,
    value: String,
}

/// Directory-backed store with one JSON file per key.
///
/// Short keys are hex encoded into the file name, so any key is a valid name
/// and `keys` can recover it. Longer keys are stored as `h-<sha256>.json`
/// with the key kept inside the file. Writes go to a temporary file first
/// and are renamed into place.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Opened file store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for `key`, and whether the entry is stored hashed.
    fn path_for(&self, key: &str) -> (PathBuf, bool) {
        let encoded = hex::encode(key);
        if encoded.len() <= MAX_HEX_NAME {
            (self.dir.join(format!("{}.json", encoded)), false)
        } else {
            let digest = hex::encode(Sha256::digest(key.as_bytes()));
            (
                self.dir.join(format!("{}{}.json", HASHED_PREFIX, digest)),
                true,
            )
        }
    }

    async fn read_hashed(path: &Path) -> Result<Option<HashedEntry>, CacheError> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let (path, hashed) = self.path_for(key);
        if hashed {
            // A digest collision would surface as a different stored key.
            return Ok(Self::read_hashed(&path)
                .await?
                .filter(|entry| entry.key == key)
                .map(|entry| entry.value));
        }

        match tokio::fs::read_to_string(path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: String) -> Result<(), CacheError> {
        let (path, hashed) = self.path_for(key);
        let contents = if hashed {
            serde_json::to_string(&HashedEntry {
                key: key.to_string(),
                value,
            })?
        } else {
            value
        };

        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.path_for(key).0).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };

            let key = if stem.starts_with(HASHED_PREFIX) {
                match Self::read_hashed(&entry.path()).await {
                    Ok(Some(stored)) => stored.key,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(file = %entry.path().display(), error = %e, "Skipping unreadable entry");
                        continue;
                    }
                }
            } else {
                let Ok(bytes) = hex::decode(stem) else {
                    continue;
                };
                let Ok(key) = String::from_utf8(bytes) else {
                    continue;
                };
                key
            };

            if key.starts_with(prefix) {
                keys.push(key);
            }
        }

        Ok(keys)
    }
}
