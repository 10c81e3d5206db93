//! Per-chunk result cache keyed by (content identity, chunk index).

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::store::KeyValueStore;
use crate::error::CacheError;
use crate::types::{CachedChunk, ChunkSetMetadata, ContentIdentity};

const CHUNK_PREFIX: &str = "chunk:";
const META_PREFIX: &str = "chunkmeta:";
/// Whole-page results written before pages were chunked.
const LEGACY_PREFIX: &str = "enhanced:";
const MIGRATION_MARKER: &str = "migration:chunked-v1";

fn chunk_key(identity: &ContentIdentity, index: usize) -> String {
    format!("{}{}:{}", CHUNK_PREFIX, identity, index)
}

fn meta_key(identity: &ContentIdentity) -> String {
    format!("{}{}", META_PREFIX, identity)
}

/// Cache of enhanced chunks with one metadata record per identity.
///
/// Writes propagate storage errors. Reads log them and report a miss, so a
/// storage outage only forces recomputation.
pub struct ChunkCache {
    store: Arc<dyn KeyValueStore>,
    /// Serializes writes to the same (identity, index) record
    record_locks: KeyLocks,
    /// Serializes read-modify-write of one identity's metadata
    meta_locks: KeyLocks,
    /// Number of legacy entries purged, once the sweep has run
    migration: OnceCell<usize>,
}

impl ChunkCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            record_locks: KeyLocks::default(),
            meta_locks: KeyLocks::default(),
            migration: OnceCell::new(),
        }
    }

    /// The underlying store, for callers persisting their own state.
    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    /// Insert or replace the record for `(identity, index)`.
    ///
    /// The identity's metadata always gains `index`; a supplied
    /// `total_chunks` replaces the stored one, and indices that fall outside
    /// the new range are removed along with their records.
    pub async fn put(
        &self,
        identity: &ContentIdentity,
        index: usize,
        mut record: CachedChunk,
    ) -> Result<(), CacheError> {
        self.ensure_migrated().await;

        record.content_identity = identity.clone();
        record.chunk_index = index;

        let key = chunk_key(identity, index);
        {
            let _guard = self.record_locks.lock(&key).await;
            self.store.put(&key, serde_json::to_string(&record)?).await?;
        }

        let stale = {
            let _guard = self.meta_locks.lock(identity.as_str()).await;

            let mut meta = self
                .load_metadata(identity)
                .await?
                .unwrap_or_else(|| ChunkSetMetadata::new(identity));

            let stale = match record.total_chunks {
                Some(total) => meta.set_total(total),
                None => Vec::new(),
            };
            meta.insert(index);
            if record.model_info.is_some() {
                meta.model_info = record.model_info.clone();
            }
            self.save_metadata(&meta).await?;
            stale
        };

        for stale_index in stale {
            self.store.delete(&chunk_key(identity, stale_index)).await?;
        }

        debug!(identity = %identity, index, "Cached chunk");
        Ok(())
    }

    /// Fetch one record. Storage or decoding failures count as a miss.
    pub async fn get(&self, identity: &ContentIdentity, index: usize) -> Option<CachedChunk> {
        self.ensure_migrated().await;

        match self.store.get(&chunk_key(identity, index)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(identity = %identity, index, error = %e, "Discarding undecodable cache record");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(identity = %identity, index, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// All records listed in the identity's metadata, in index order.
    ///
    /// Listed indices whose record is gone are skipped; they need
    /// regeneration, not special handling.
    pub async fn get_all(&self, identity: &ContentIdentity) -> Vec<CachedChunk> {
        let Some(meta) = self.metadata(identity).await else {
            return Vec::new();
        };

        let mut records = Vec::with_capacity(meta.indices.len());
        for &index in &meta.indices {
            match self.get(identity, index).await {
                Some(record) => records.push(record),
                None => debug!(identity = %identity, index, "Listed chunk missing from cache"),
            }
        }
        records
    }

    /// Remove one record and drop its index. `total_chunks` is unchanged.
    ///
    /// Returns whether the index was listed.
    pub async fn delete(&self, identity: &ContentIdentity, index: usize) -> Result<bool, CacheError> {
        self.ensure_migrated().await;

        let key = chunk_key(identity, index);
        {
            let _guard = self.record_locks.lock(&key).await;
            self.store.delete(&key).await?;
        }

        let _guard = self.meta_locks.lock(identity.as_str()).await;

        let Some(mut meta) = self.load_metadata(identity).await? else {
            return Ok(false);
        };
        let removed = meta.remove(index);
        if removed {
            self.save_metadata(&meta).await?;
        }

        debug!(identity = %identity, index, removed, "Deleted cached chunk");
        Ok(removed)
    }

    /// Remove every record of an identity, then its metadata.
    ///
    /// Returns the number of records removed.
    pub async fn delete_all(&self, identity: &ContentIdentity) -> Result<usize, CacheError> {
        self.ensure_migrated().await;

        let _guard = self.meta_locks.lock(identity.as_str()).await;

        let Some(meta) = self.load_metadata(identity).await? else {
            return Ok(0);
        };

        let deletions = meta
            .indices
            .iter()
            .map(|&index| {
                let key = chunk_key(identity, index);
                async move { self.store.delete(&key).await }
            })
            .collect::<Vec<_>>();
        for result in join_all(deletions).await {
            result?;
        }

        self.store.delete(&meta_key(identity)).await?;

        info!(identity = %identity, removed = meta.indices.len(), "Cleared cached chunks");
        Ok(meta.indices.len())
    }

    /// The identity's metadata record, if any. Read failures count as absent.
    pub async fn metadata(&self, identity: &ContentIdentity) -> Option<ChunkSetMetadata> {
        self.ensure_migrated().await;

        match self.load_metadata(identity).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Metadata read failed, treating as absent");
                None
            }
        }
    }

    /// Whether any chunk is cached for this identity.
    pub async fn has_chunks(&self, identity: &ContentIdentity) -> bool {
        self.chunk_count(identity).await > 0
    }

    /// Number of cached chunks listed for this identity.
    pub async fn chunk_count(&self, identity: &ContentIdentity) -> usize {
        self.metadata(identity)
            .await
            .map_or(0, |meta| meta.indices.len())
    }

    /// Run the legacy sweep now if it has not run yet. Returns the number of
    /// legacy entries it purged.
    pub async fn migrate(&self) -> Result<usize, CacheError> {
        self.migration
            .get_or_try_init(|| self.purge_legacy_entries())
            .await
            .copied()
    }

    async fn ensure_migrated(&self) {
        if self.migration.initialized() {
            return;
        }
        if let Err(e) = self.migrate().await {
            warn!(error = %e, "Legacy cache sweep failed, will retry on next use");
        }
    }

    async fn purge_legacy_entries(&self) -> Result<usize, CacheError> {
        if self.store.get(MIGRATION_MARKER).await?.is_some() {
            return Ok(0);
        }

        let legacy = self.store.keys(LEGACY_PREFIX).await?;
        for key in &legacy {
            self.store.delete(key).await?;
        }

        let marker = serde_json::json!({
            "migrated_at": Utc::now(),
            "purged": legacy.len(),
        });
        self.store.put(MIGRATION_MARKER, marker.to_string()).await?;

        if !legacy.is_empty() {
            info!(purged = legacy.len(), "Purged legacy whole-page cache entries");
        }
        Ok(legacy.len())
    }

    async fn load_metadata(
        &self,
        identity: &ContentIdentity,
    ) -> Result<Option<ChunkSetMetadata>, CacheError> {
        match self.store.get(&meta_key(identity)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save_metadata(&self, meta: &ChunkSetMetadata) -> Result<(), CacheError> {
        self.store
            .put(&meta_key(&meta.content_identity), serde_json::to_string(meta)?)
            .await
    }
}

/// Async mutexes keyed by string. An entry lives only while some task
/// holds or waits for its lock.
#[derive(Default)]
struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: &self.locks,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct KeyGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release first so the map holds the only reference when unused.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
