//! Core types for the enhancement pipeline.

mod chunk;
mod config;
mod source;

pub use chunk::{CachedChunk, Chunk, ChunkSetMetadata, ChunkStatus, ModelInfo};
pub use config::{
    EnhancerConfig, ProcessOptions, ProcessOverrides, DEFAULT_INSTRUCTIONS,
    DEFAULT_SUMMARY_INSTRUCTIONS,
};
pub use source::{
    ContentIdentity, EnhanceJobStatus, EnhanceJobStatusResponse, StartEnhanceJobRequest,
    StartEnhanceJobResponse,
};
