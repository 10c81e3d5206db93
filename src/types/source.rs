//! Source identity and request/response definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::config::ProcessOverrides;
use crate::pipeline::{PipelineEvent, RunState};

/// Stable key identifying "the text from this source".
///
/// Identities derived from the same canonical URL are equal, which is what
/// lets a revisit reuse cached chunks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentIdentity(String);

impl ContentIdentity {
    /// Wrap an identity that was already derived by the caller.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive an identity from a page URL.
    ///
    /// Scheme and host are lowercased, the fragment and any trailing slash
    /// are dropped, then the result is hashed with SHA-256.
    pub fn from_url(url: &str) -> Self {
        let normalized = normalize_url(url);
        let digest = Sha256::digest(normalized.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);

    let (scheme, rest) = match without_fragment.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => (String::new(), without_fragment),
    };

    let host_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let (host, path) = rest.split_at(host_end);
    let path = path.trim_end_matches('/');

    if scheme.is_empty() {
        format!("{}{}", host.to_ascii_lowercase(), path)
    } else {
        format!("{}://{}{}", scheme, host.to_ascii_lowercase(), path)
    }
}

/// Request to start an enhancement job.
///
/// Either `identity` or `url` must be present; `identity` wins when both are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartEnhanceJobRequest {
    /// Pre-derived content identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    /// Canonical page URL to derive the identity from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Page title, used in logs only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Extracted text, already stripped of scraper chrome
    pub text: String,

    /// Per-request overrides of the configured options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ProcessOverrides>,
}

impl StartEnhanceJobRequest {
    /// Resolve the content identity for this request.
    pub fn content_identity(&self) -> Option<ContentIdentity> {
        if let Some(identity) = self.identity.as_deref().filter(|s| !s.trim().is_empty()) {
            return Some(ContentIdentity::new(identity.trim()));
        }
        self.url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(ContentIdentity::from_url)
    }
}

/// Response when starting an enhancement job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartEnhanceJobResponse {
    /// ID of the created job
    pub job_id: Uuid,

    /// Whether the job was accepted
    pub accepted: bool,

    /// Identity the job runs under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<ContentIdentity>,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status of an enhancement job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhanceJobStatus {
    /// Job is queued but not started
    Pending,
    /// Job is currently running
    Running,
    /// Every chunk is enhanced
    Completed,
    /// Finished, but some chunks failed
    CompletedWithErrors,
    /// Run aborted (credentials exhausted or cancelled)
    Failed,
}

/// Response with job status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhanceJobStatusResponse {
    pub job_id: Uuid,
    pub identity: ContentIdentity,
    pub status: EnhanceJobStatus,
    pub run_state: RunState,
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub failed_indices: Vec<usize>,

    /// Events emitted so far, in delivery order
    pub events: Vec<PipelineEvent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_url_same_identity() {
        let a = ContentIdentity::from_url("https://Example.com/novel/ch-1/");
        let b = ContentIdentity::from_url("https://example.com/novel/ch-1#comments");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_distinct_urls_distinct_identities() {
        let a = ContentIdentity::from_url("https://example.com/novel/ch-1");
        let b = ContentIdentity::from_url("https://example.com/novel/ch-2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_path_case_is_preserved() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Book/Ch1?page=2"),
            "https://example.com/Book/Ch1?page=2"
        );
    }

    #[test]
    fn test_request_identity_precedence() {
        let request = StartEnhanceJobRequest {
            identity: Some("explicit".into()),
            url: Some("https://example.com/a".into()),
            title: None,
            text: String::new(),
            options: None,
        };
        assert_eq!(request.content_identity(), Some(ContentIdentity::new("explicit")));

        let request = StartEnhanceJobRequest {
            identity: Some("  ".into()),
            url: None,
            title: None,
            text: String::new(),
            options: None,
        };
        assert_eq!(request.content_identity(), None);
    }
}
