//! Chunk type definitions.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ContentIdentity;
use crate::splitter::TextChunk;

/// Processing state of a chunk as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Split but not yet sent
    Pending,
    /// Request in flight
    Processing,
    /// Enhanced during this run
    Completed,
    /// Enhancement failed during this run
    Error,
    /// Served from the cache without an API call
    Cached,
}

/// Which model and credential produced an enhanced chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model: String,
    pub credential_ordinal: usize,
}

/// A chunk of source text and, once processed, its enhanced counterpart.
///
/// Chunks are addressed by `(content_identity, index)`; indices are 0-based
/// and contiguous within one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identity of the document this chunk belongs to
    pub content_identity: ContentIdentity,

    /// Order of this chunk within its document (0-indexed)
    pub index: usize,

    /// The source text handed to the completion API
    pub original_text: String,

    /// Number of words in `original_text`
    pub word_count: usize,

    /// The enhanced text, once available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_text: Option<String>,

    /// Current processing state
    pub status: ChunkStatus,

    /// Model and credential used, once enhanced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,

    /// When the enhanced text was written to the cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl Chunk {
    /// Create a pending chunk from splitter output.
    pub fn pending(identity: &ContentIdentity, split: TextChunk) -> Self {
        Self {
            content_identity: identity.clone(),
            index: split.index,
            original_text: split.text,
            word_count: split.word_count,
            enhanced_text: None,
            status: ChunkStatus::Pending,
            model_info: None,
            cached_at: None,
        }
    }

    /// Rebuild a chunk from its cache record.
    pub fn from_cached(record: CachedChunk) -> Self {
        Self {
            content_identity: record.content_identity,
            index: record.chunk_index,
            original_text: record.original_text,
            word_count: record.word_count,
            enhanced_text: Some(record.enhanced_text),
            status: ChunkStatus::Cached,
            model_info: record.model_info,
            cached_at: Some(record.cached_at),
        }
    }

    /// Whether an enhanced text is available.
    pub fn is_enhanced(&self) -> bool {
        self.enhanced_text.is_some()
    }
}

/// The persisted form of one enhanced chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedChunk {
    pub content_identity: ContentIdentity,
    pub chunk_index: usize,
    pub original_text: String,
    pub enhanced_text: String,
    pub word_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,

    /// Chunk count of the split this record belongs to, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,

    pub cached_at: DateTime<Utc>,
}

impl CachedChunk {
    /// Build a record for a freshly enhanced chunk.
    pub fn new(chunk: &Chunk, enhanced_text: String, total_chunks: usize) -> Self {
        Self {
            content_identity: chunk.content_identity.clone(),
            chunk_index: chunk.index,
            original_text: chunk.original_text.clone(),
            enhanced_text,
            word_count: chunk.word_count,
            model_info: chunk.model_info.clone(),
            total_chunks: Some(total_chunks),
            cached_at: Utc::now(),
        }
    }

    pub fn with_model_info(mut self, info: ModelInfo) -> Self {
        self.model_info = Some(info);
        self
    }
}

/// Which chunks exist for one content identity.
///
/// `indices` is the only source of truth for existence; it always stays
/// within `[0, total_chunks)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSetMetadata {
    pub content_identity: ContentIdentity,
    pub total_chunks: usize,
    pub indices: BTreeSet<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,

    pub last_updated: DateTime<Utc>,
}

impl ChunkSetMetadata {
    pub fn new(identity: &ContentIdentity) -> Self {
        Self {
            content_identity: identity.clone(),
            total_chunks: 0,
            indices: BTreeSet::new(),
            model_info: None,
            last_updated: Utc::now(),
        }
    }

    /// Record that `index` exists, growing `total_chunks` if needed.
    pub fn insert(&mut self, index: usize) {
        self.indices.insert(index);
        if index >= self.total_chunks {
            self.total_chunks = index + 1;
        }
        self.last_updated = Utc::now();
    }

    /// Set the chunk count, returning indices that fell out of range.
    pub fn set_total(&mut self, total_chunks: usize) -> Vec<usize> {
        self.total_chunks = total_chunks;
        let stale = self.indices.split_off(&total_chunks);
        self.last_updated = Utc::now();
        stale.into_iter().collect()
    }

    pub fn remove(&mut self, index: usize) -> bool {
        let removed = self.indices.remove(&index);
        if removed {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Whether every index of `[0, total_chunks)` is present.
    pub fn is_complete(&self) -> bool {
        self.total_chunks > 0 && self.indices.len() == self.total_chunks
    }

    /// Indices in `[0, total_chunks)` that have no record.
    pub fn missing(&self) -> Vec<usize> {
        (0..self.total_chunks)
            .filter(|i| !self.indices.contains(i))
            .collect()
    }
}
