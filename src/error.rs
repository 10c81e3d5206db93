//! Error types for the enhancement pipeline.
//!
//! Each layer owns its error enum. Read-side cache failures never surface
//! here: they are logged and degraded to a miss inside the cache.

use thiserror::Error;

/// Failure writing to or deleting from the chunk cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store failed (disk, permissions, ...).
    #[error("cache storage error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a single request to the completion API with one credential.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The provider throttled this credential (429-class).
    #[error("rate limited (status {status}): {message}")]
    RateLimited { status: u16, message: String },

    /// Network failure, timeout or 5xx-class response. Worth retrying.
    #[error("transient API error: {0}")]
    Transient(String),

    /// Non-retryable request failure (4xx-class other than throttling).
    #[error("fatal API error (status {status}): {message}")]
    Fatal { status: u16, message: String },
}

impl ApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

/// Failure dispatching one chunk through the credential pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Every credential in the pool was throttled for this chunk.
    #[error("all {attempts} credentials are rate limited")]
    AllCredentialsExhausted { attempts: usize },

    /// Retries were used up without a success.
    #[error("transient failure after retries: {0}")]
    Transient(String),

    /// The provider rejected the request outright.
    #[error("fatal failure (status {status}): {message}")]
    Fatal { status: u16, message: String },

    /// The pool holds no credentials.
    #[error("credential pool is empty")]
    NoCredentials,
}

impl DispatchError {
    /// Whether this failure ends the whole run rather than just the chunk.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchError::AllCredentialsExhausted { .. } | DispatchError::NoCredentials
        )
    }
}

/// Run-level and operation-level pipeline failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The run stopped because every credential was throttled. The listed
    /// indices were not processed and can be resumed later.
    #[error("all credentials exhausted; {} chunk(s) left unprocessed", unprocessed.len())]
    AllCredentialsExhausted { unprocessed: Vec<usize> },

    /// No cached record exists for the requested chunk.
    #[error("chunk {index} of {identity} is not cached")]
    ChunkNotFound { identity: String, index: usize },

    /// The caller cancelled the run between chunks.
    #[error("run cancelled; {} chunk(s) left unprocessed", unprocessed.len())]
    Cancelled { unprocessed: Vec<usize> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_dispatch_errors() {
        assert!(DispatchError::AllCredentialsExhausted { attempts: 2 }.is_terminal());
        assert!(DispatchError::NoCredentials.is_terminal());
        assert!(!DispatchError::Transient("timeout".into()).is_terminal());
        assert!(!DispatchError::Fatal { status: 400, message: "bad".into() }.is_terminal());
    }

    #[test]
    fn test_exhausted_message_lists_count() {
        let err = PipelineError::AllCredentialsExhausted { unprocessed: vec![3, 4, 5] };
        assert_eq!(
            err.to_string(),
            "all credentials exhausted; 3 chunk(s) left unprocessed"
        );
    }
}
