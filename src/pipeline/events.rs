//! Run states, progress events and run reports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::CredentialPool;
use crate::error::PipelineError;
use crate::types::{Chunk, ContentIdentity};

/// Lifecycle of one `process` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Splitting,
    Processing,
    Aggregating,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

/// Events delivered to the caller while a run progresses.
///
/// `ChunkReady` arrives in ascending index order. Every run ends with exactly
/// one of `Completed`, `CompletedWithErrors` or `RunAborted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ChunkReady {
        index: usize,
        chunk: Chunk,
        from_cache: bool,
    },
    ChunkFailed {
        index: usize,
        error: String,
    },
    Progress {
        processed: usize,
        total: usize,
    },
    Completed {
        total: usize,
    },
    CompletedWithErrors {
        failed_indices: Vec<usize>,
    },
    RunAborted {
        unprocessed: Vec<usize>,
        reason: String,
    },
}

impl PipelineEvent {
    /// Whether this event closes the run.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PipelineEvent::Completed { .. }
                | PipelineEvent::CompletedWithErrors { .. }
                | PipelineEvent::RunAborted { .. }
        )
    }
}

/// Cooperative cancellation flag, checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub identity: ContentIdentity,
    pub state: RunState,
    pub total_chunks: usize,
    /// Chunks handled, successfully or not
    pub processed: usize,
    pub from_cache: usize,
    pub enhanced: usize,
    pub failed_indices: Vec<usize>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new(identity: &ContentIdentity) -> Self {
        Self {
            identity: identity.clone(),
            state: RunState::Idle,
            total_chunks: 0,
            processed: 0,
            from_cache: 0,
            enhanced: 0,
            failed_indices: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn finish(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }
}

/// Result of a run plus the credential pool with its updated cursor.
///
/// The report is filled in even when the run fails.
#[derive(Debug)]
pub struct RunOutcome {
    pub pool: CredentialPool,
    pub report: RunReport,
    pub result: Result<(), PipelineError>,
}

impl RunOutcome {
    pub fn into_result(self) -> Result<RunReport, PipelineError> {
        self.result.map(|()| self.report)
    }
}
