//! Job processor driving enhancement runs in the background.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use super::pool::SharedPool;
use super::store::JobStore;
use crate::pipeline::{CancelToken, Orchestrator};
use crate::types::{ContentIdentity, ProcessOptions};

/// Processor that handles enhancement jobs asynchronously.
pub struct JobProcessor {
    orchestrator: Arc<Orchestrator>,
    pool: Arc<SharedPool>,
}

impl JobProcessor {
    pub fn new(orchestrator: Arc<Orchestrator>, pool: Arc<SharedPool>) -> Self {
        Self { orchestrator, pool }
    }

    /// Run one enhancement job to completion, mirroring its events into
    /// `job_store`.
    pub async fn process_job(
        &self,
        job_id: Uuid,
        identity: ContentIdentity,
        text: String,
        options: ProcessOptions,
        cancel: CancelToken,
        job_store: Arc<RwLock<JobStore>>,
    ) {
        info!(job_id = %job_id, identity = %identity, "Starting enhancement job");

        job_store.write().await.start_job(job_id);

        let pool = self.pool.snapshot().await;
        let (mut events, handle) =
            self.orchestrator
                .spawn_process(identity, text, options, pool, cancel);

        while let Some(event) = events.recv().await {
            job_store.write().await.record_event(job_id, event);
        }

        match handle.await {
            Ok(outcome) => {
                self.pool.commit(&outcome.pool).await;
                let error = outcome.result.err().map(|e| e.to_string());

                info!(
                    job_id = %job_id,
                    total = outcome.report.total_chunks,
                    from_cache = outcome.report.from_cache,
                    enhanced = outcome.report.enhanced,
                    failed = outcome.report.failed_indices.len(),
                    "Enhancement job finished"
                );
                job_store
                    .write()
                    .await
                    .finish_job(job_id, &outcome.report, error);
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Enhancement task panicked");
                job_store.write().await.fail_job(job_id, e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ChunkCache, KeyValueStore, MemoryStore};
    use crate::client::testing::{instant_retries, rate_limited, ScriptedBackend};
    use crate::client::{CredentialPool, Dispatcher, RotationStrategy};
    use crate::pipeline::PipelineEvent;
    use crate::types::EnhanceJobStatus;

    async fn processor(backend: Arc<ScriptedBackend>) -> (JobProcessor, Arc<SharedPool>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache = Arc::new(ChunkCache::new(store.clone()));
        let dispatcher = Dispatcher::new(backend, instant_retries());
        let orchestrator = Arc::new(Orchestrator::new(cache, dispatcher));
        let pool = Arc::new(
            SharedPool::load(
                CredentialPool::new(["k0", "k1"], RotationStrategy::RoundRobin),
                store,
            )
            .await,
        );
        (JobProcessor::new(orchestrator, pool.clone()), pool)
    }

    fn text() -> String {
        (0..5)
            .map(|p| format!("Paragraph {} has a handful of words in it.", p))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn options() -> ProcessOptions {
        ProcessOptions {
            target_words: 50,
            ..ProcessOptions::default()
        }
    }

    #[tokio::test]
    async fn test_job_completes_and_commits_cursor() {
        let backend = Arc::new(ScriptedBackend::new());
        let (processor, pool) = processor(backend.clone()).await;
        let jobs = Arc::new(RwLock::new(JobStore::new()));
        let identity = ContentIdentity::new("doc");
        let cancel = CancelToken::new();
        let job_id = jobs.write().await.create_job(identity.clone(), cancel.clone());

        processor
            .process_job(job_id, identity, text(), options(), cancel, jobs.clone())
            .await;

        let status = jobs.read().await.get_job_status(job_id).unwrap();
        assert_eq!(status.status, EnhanceJobStatus::Completed);
        assert_eq!(status.total_chunks, 1);
        assert!(matches!(status.events.last(), Some(PipelineEvent::Completed { total: 1 })));
        assert_eq!(pool.snapshot().await.cursor(), Some(0));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_job_is_failed() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.fail_always(0, rate_limited());
        backend.fail_always(1, rate_limited());
        let (processor, _) = processor(backend).await;
        let jobs = Arc::new(RwLock::new(JobStore::new()));
        let identity = ContentIdentity::new("doc");
        let cancel = CancelToken::new();
        let job_id = jobs.write().await.create_job(identity.clone(), cancel.clone());

        processor
            .process_job(job_id, identity, text(), options(), cancel, jobs.clone())
            .await;

        let status = jobs.read().await.get_job_status(job_id).unwrap();
        assert_eq!(status.status, EnhanceJobStatus::Failed);
        assert!(status.error.unwrap().contains("exhausted"));
    }
}
