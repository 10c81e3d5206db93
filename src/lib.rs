//! Enhancer Service Library
//!
//! Splits long web-page text into balanced chunks, sends each chunk to a
//! generative text API with credential rotation and retry, caches every
//! enhanced chunk so it is never sent twice, and streams results back in
//! order.

pub mod api;
pub mod cache;
pub mod client;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod splitter;
pub mod summary;
pub mod types;

pub use cache::{ChunkCache, FileStore, KeyValueStore, MemoryStore};
pub use client::{CredentialPool, Dispatcher, GeminiClient, RetryPolicy, RotationStrategy};
pub use error::{ApiError, CacheError, DispatchError, PipelineError};
pub use pipeline::{CancelToken, Orchestrator, PipelineEvent, RunOutcome, RunReport, RunState};
pub use splitter::{ContentSplitter, TextChunk};
pub use summary::{groups_for, SummaryGroup};
pub use types::{CachedChunk, Chunk, ContentIdentity, EnhancerConfig, ProcessOptions};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::*;
    pub use crate::client::*;
    pub use crate::error::*;
    pub use crate::pipeline::*;
    pub use crate::splitter::{ContentSplitter, TextChunk};
    pub use crate::summary::*;
    pub use crate::types::*;
}

/// Default chunk size in words
pub const DEFAULT_TARGET_WORDS: usize = 3200;

/// Smallest accepted chunk size in words
pub const MIN_TARGET_WORDS: usize = 50;

/// Word-run length used when a flat paragraph has to be cut
pub const FLAT_RUN_WORDS: usize = 25;

/// Default number of chunks per summary group
pub const DEFAULT_SUMMARY_GROUP_SIZE: usize = 10;

/// Smallest accepted summary group size
pub const MIN_SUMMARY_GROUP_SIZE: usize = 1;

/// Requests per credential before a transient failure moves on
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
