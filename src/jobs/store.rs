//! Job store for tracking enhancement job status.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::pipeline::{CancelToken, PipelineEvent, RunReport, RunState};
use crate::types::{ContentIdentity, EnhanceJobStatus, EnhanceJobStatusResponse};

/// In-memory job store for tracking enhancement jobs.
pub struct JobStore {
    jobs: HashMap<Uuid, JobRecord>,
}

/// Internal record for tracking a job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub identity: ContentIdentity,
    pub status: EnhanceJobStatus,
    pub run_state: RunState,
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub failed_indices: Vec<usize>,
    pub events: Vec<PipelineEvent>,
    pub error: Option<String>,
    pub cancel: CancelToken,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: Uuid, identity: ContentIdentity, cancel: CancelToken) -> Self {
        Self {
            job_id,
            identity,
            status: EnhanceJobStatus::Pending,
            run_state: RunState::Idle,
            total_chunks: 0,
            processed_chunks: 0,
            failed_indices: Vec::new(),
            events: Vec::new(),
            error: None,
            cancel,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn start(&mut self) {
        self.status = EnhanceJobStatus::Running;
        self.run_state = RunState::Processing;
        self.started_at = Some(Utc::now());
    }

    /// Fold one pipeline event into the record.
    pub fn record_event(&mut self, event: PipelineEvent) {
        match &event {
            PipelineEvent::Progress { processed, total } => {
                self.processed_chunks = *processed;
                self.total_chunks = *total;
            }
            PipelineEvent::ChunkFailed { index, error } => {
                self.failed_indices.push(*index);
                self.error = Some(error.clone());
            }
            _ => {}
        }
        self.events.push(event);
    }

    /// Close the job from the run's report.
    pub fn finish(&mut self, report: &RunReport, error: Option<String>) {
        self.run_state = report.state;
        self.total_chunks = report.total_chunks;
        self.processed_chunks = report.processed;
        self.failed_indices = report.failed_indices.clone();
        self.status = match (&error, report.failed_indices.is_empty()) {
            (Some(_), _) => EnhanceJobStatus::Failed,
            (None, true) => EnhanceJobStatus::Completed,
            (None, false) => EnhanceJobStatus::CompletedWithErrors,
        };
        if error.is_some() {
            self.error = error;
        }
        self.completed_at = Some(Utc::now());
    }

    /// Mark the job as failed without a report.
    pub fn fail(&mut self, error: String) {
        self.status = EnhanceJobStatus::Failed;
        self.run_state = RunState::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            EnhanceJobStatus::Completed
                | EnhanceJobStatus::CompletedWithErrors
                | EnhanceJobStatus::Failed
        )
    }

    pub fn to_response(&self) -> EnhanceJobStatusResponse {
        EnhanceJobStatusResponse {
            job_id: self.job_id,
            identity: self.identity.clone(),
            status: self.status,
            run_state: self.run_state,
            total_chunks: self.total_chunks,
            processed_chunks: self.processed_chunks,
            failed_indices: self.failed_indices.clone(),
            events: self.events.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }

    /// Create a new job and return its ID.
    pub fn create_job(&mut self, identity: ContentIdentity, cancel: CancelToken) -> Uuid {
        let job_id = Uuid::new_v4();
        self.jobs
            .insert(job_id, JobRecord::new(job_id, identity, cancel));
        job_id
    }

    pub fn get_job(&self, job_id: Uuid) -> Option<&JobRecord> {
        self.jobs.get(&job_id)
    }

    pub fn start_job(&mut self, job_id: Uuid) -> bool {
        self.with_job(job_id, JobRecord::start)
    }

    pub fn record_event(&mut self, job_id: Uuid, event: PipelineEvent) -> bool {
        self.with_job(job_id, |job| job.record_event(event))
    }

    pub fn finish_job(&mut self, job_id: Uuid, report: &RunReport, error: Option<String>) -> bool {
        self.with_job(job_id, |job| job.finish(report, error))
    }

    pub fn fail_job(&mut self, job_id: Uuid, error: String) -> bool {
        self.with_job(job_id, |job| job.fail(error))
    }

    /// Ask a running job to stop after its current chunk.
    pub fn cancel_job(&mut self, job_id: Uuid) -> bool {
        match self.jobs.get(&job_id) {
            Some(job) if !job.is_finished() => {
                job.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn get_job_status(&self, job_id: Uuid) -> Option<EnhanceJobStatusResponse> {
        self.jobs.get(&job_id).map(|j| j.to_response())
    }

    /// Clean up finished jobs older than one hour.
    pub fn cleanup_old_jobs(&mut self) {
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        self.jobs
            .retain(|_, job| !job.is_finished() || job.completed_at.map_or(true, |t| t > cutoff));
    }

    pub fn get_job_counts(&self) -> HashMap<EnhanceJobStatus, usize> {
        let mut counts = HashMap::new();
        for job in self.jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }

    fn with_job(&mut self, job_id: Uuid, f: impl FnOnce(&mut JobRecord)) -> bool {
        match self.jobs.get_mut(&job_id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
