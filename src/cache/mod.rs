//! Persistent per-chunk cache.

mod chunk_cache;
mod store;

pub use chunk_cache::ChunkCache;
pub use store::{FileStore, KeyValueStore, MemoryStore};
