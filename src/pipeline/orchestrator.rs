//! Drives one document through split, cache lookup, dispatch and caching.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::events::{CancelToken, PipelineEvent, RunOutcome, RunReport, RunState};
use crate::cache::ChunkCache;
use crate::client::{CompletionRequest, CredentialPool, Dispatcher, RotationRun};
use crate::error::{DispatchError, PipelineError};
use crate::splitter::ContentSplitter;
use crate::summary::{records_in_group, GroupSummary, SummaryGroup};
use crate::types::{
    CachedChunk, Chunk, ChunkStatus, ContentIdentity, ModelInfo, ProcessOptions,
    DEFAULT_SUMMARY_INSTRUCTIONS,
};

/// Capacity of the event channel created by [`Orchestrator::spawn_process`].
pub const EVENT_BUFFER: usize = 64;

/// Composes splitter, cache and dispatcher into enhancement runs.
pub struct Orchestrator {
    splitter: ContentSplitter,
    cache: Arc<ChunkCache>,
    dispatcher: Dispatcher,
    summary_instructions: String,
}

impl Orchestrator {
    pub fn new(cache: Arc<ChunkCache>, dispatcher: Dispatcher) -> Self {
        Self {
            splitter: ContentSplitter::new(),
            cache,
            dispatcher,
            summary_instructions: DEFAULT_SUMMARY_INSTRUCTIONS.to_string(),
        }
    }

    pub fn with_summary_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.summary_instructions = instructions.into();
        self
    }

    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    /// Enhance `text` chunk by chunk, reusing cached results.
    ///
    /// Chunks are handled in ascending index order. Cache hits are delivered
    /// without an API call; misses are dispatched, cached and delivered. A
    /// chunk that fails is reported and skipped. The run stops early only
    /// when every credential is throttled, when `cancel` fires, or when the
    /// event receiver goes away; results already cached stay cached.
    pub async fn process(
        &self,
        identity: &ContentIdentity,
        text: &str,
        options: &ProcessOptions,
        mut pool: CredentialPool,
        events: &mpsc::Sender<PipelineEvent>,
        cancel: &CancelToken,
    ) -> RunOutcome {
        let mut report = RunReport::new(identity);
        let result = self
            .run(identity, text, options, &mut pool, events, cancel, &mut report)
            .await;

        match &result {
            Ok(()) => {
                report.finish(RunState::Done);
                info!(
                    identity = %identity,
                    total = report.total_chunks,
                    from_cache = report.from_cache,
                    enhanced = report.enhanced,
                    failed = report.failed_indices.len(),
                    "Run finished"
                );
            }
            Err(e) => {
                report.finish(RunState::Failed);
                warn!(
                    identity = %identity,
                    processed = report.processed,
                    total = report.total_chunks,
                    error = %e,
                    "Run stopped early"
                );
            }
        }

        RunOutcome {
            pool,
            report,
            result,
        }
    }

    /// Run [`process`](Self::process) on a background task.
    ///
    /// The caller must drain the returned receiver; the run blocks once
    /// [`EVENT_BUFFER`] events are pending.
    pub fn spawn_process(
        self: &Arc<Self>,
        identity: ContentIdentity,
        text: String,
        options: ProcessOptions,
        pool: CredentialPool,
        cancel: CancelToken,
    ) -> (mpsc::Receiver<PipelineEvent>, JoinHandle<RunOutcome>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = Arc::clone(self);

        let handle = tokio::spawn(async move {
            this.process(&identity, &text, &options, pool, &tx, &cancel)
                .await
        });

        (rx, handle)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        identity: &ContentIdentity,
        text: &str,
        options: &ProcessOptions,
        pool: &mut CredentialPool,
        events: &mpsc::Sender<PipelineEvent>,
        cancel: &CancelToken,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        report.state = RunState::Splitting;
        let splits = self.splitter.split(text, options.target_words);
        let total = splits.len();
        report.total_chunks = total;
        debug!(identity = %identity, total, state = ?report.state, "Content split");

        if total == 0 {
            report.state = RunState::Aggregating;
            let _ = events.send(PipelineEvent::Completed { total: 0 }).await;
            return Ok(());
        }

        report.state = RunState::Processing;
        // Cleared when cached records belong to a different split.
        let mut read_cache = true;
        if let Some(meta) = self.cache.metadata(identity).await {
            if meta.total_chunks != total {
                info!(
                    identity = %identity,
                    cached_total = meta.total_chunks,
                    total,
                    "Chunk count changed, discarding cached chunks"
                );
                if let Err(e) = self.cache.delete_all(identity).await {
                    // New writes carry the new total and prune what is left.
                    warn!(
                        identity = %identity,
                        error = %e,
                        "Failed to discard stale chunks, recomputing all"
                    );
                    read_cache = false;
                }
            } else if meta.is_complete() {
                debug!(identity = %identity, total, "All chunks cached");
            }
        }

        let mut rotation = pool.start_run();

        for (position, split) in splits.into_iter().enumerate() {
            if cancel.is_cancelled() || events.is_closed() {
                let unprocessed: Vec<usize> = (position..total).collect();
                abort(events, &unprocessed, "cancelled").await;
                return Err(PipelineError::Cancelled { unprocessed });
            }

            let index = split.index;
            let chunk = Chunk::pending(identity, split);

            let cached = if read_cache {
                self.cache.get(identity, index).await
            } else {
                None
            };
            match cached {
                Some(record) => {
                    report.from_cache += 1;
                    let _ = events
                        .send(PipelineEvent::ChunkReady {
                            index,
                            chunk: Chunk::from_cached(record),
                            from_cache: true,
                        })
                        .await;
                }
                None => {
                    match self
                        .enhance(identity, chunk, total, options, pool, &mut rotation)
                        .await
                    {
                        Ok(chunk) => {
                            report.enhanced += 1;
                            let _ = events
                                .send(PipelineEvent::ChunkReady {
                                    index,
                                    chunk,
                                    from_cache: false,
                                })
                                .await;
                        }
                        Err(e) if e.is_terminal() => {
                            let unprocessed: Vec<usize> = (position..total).collect();
                            abort(events, &unprocessed, &e.to_string()).await;
                            return Err(match e {
                                DispatchError::AllCredentialsExhausted { .. } => {
                                    PipelineError::AllCredentialsExhausted { unprocessed }
                                }
                                other => PipelineError::Dispatch(other),
                            });
                        }
                        Err(e) => {
                            warn!(identity = %identity, index, error = %e, "Chunk failed, continuing");
                            report.failed_indices.push(index);
                            let _ = events
                                .send(PipelineEvent::ChunkFailed {
                                    index,
                                    error: e.to_string(),
                                })
                                .await;
                        }
                    }
                }
            }

            report.processed += 1;
            let _ = events
                .send(PipelineEvent::Progress {
                    processed: report.processed,
                    total,
                })
                .await;
        }

        report.state = RunState::Aggregating;
        let last = if report.failed_indices.is_empty() {
            PipelineEvent::Completed { total }
        } else {
            PipelineEvent::CompletedWithErrors {
                failed_indices: report.failed_indices.clone(),
            }
        };
        let _ = events.send(last).await;

        Ok(())
    }

    /// Dispatch one chunk and cache the result.
    ///
    /// A failed cache write is logged; the enhanced chunk is still returned.
    async fn enhance(
        &self,
        identity: &ContentIdentity,
        mut chunk: Chunk,
        total: usize,
        options: &ProcessOptions,
        pool: &mut CredentialPool,
        rotation: &mut RotationRun,
    ) -> Result<Chunk, DispatchError> {
        chunk.status = ChunkStatus::Processing;

        let request = CompletionRequest {
            text: &chunk.original_text,
            instructions: &options.instructions,
            model: &options.model,
        };
        let dispatched = self.dispatcher.dispatch(pool, rotation, request).await?;

        let model_info = ModelInfo {
            model: options.model.clone(),
            credential_ordinal: dispatched.credential_ordinal,
        };
        let record = CachedChunk::new(&chunk, dispatched.text.clone(), total)
            .with_model_info(model_info.clone());
        let cached_at = record.cached_at;

        match self.cache.put(identity, chunk.index, record).await {
            Ok(()) => chunk.cached_at = Some(cached_at),
            Err(e) => error!(
                identity = %identity,
                index = chunk.index,
                error = %e,
                "Failed to cache enhanced chunk"
            ),
        }

        chunk.enhanced_text = Some(dispatched.text);
        chunk.model_info = Some(model_info);
        chunk.status = ChunkStatus::Completed;
        Ok(chunk)
    }

    /// Re-enhance one cached chunk from its stored original text.
    ///
    /// The document is not re-split and other chunks are untouched.
    pub async fn reprocess_chunk(
        &self,
        identity: &ContentIdentity,
        index: usize,
        options: &ProcessOptions,
        pool: &mut CredentialPool,
    ) -> Result<Chunk, PipelineError> {
        let record = self
            .cache
            .get(identity, index)
            .await
            .ok_or_else(|| PipelineError::ChunkNotFound {
                identity: identity.to_string(),
                index,
            })?;
        let total = self
            .cache
            .metadata(identity)
            .await
            .map(|meta| meta.total_chunks)
            .or(record.total_chunks);

        let mut rotation = pool.start_run();
        let request = CompletionRequest {
            text: &record.original_text,
            instructions: &options.instructions,
            model: &options.model,
        };
        let dispatched = self.dispatcher.dispatch(pool, &mut rotation, request).await?;

        let updated = CachedChunk {
            enhanced_text: dispatched.text,
            model_info: Some(ModelInfo {
                model: options.model.clone(),
                credential_ordinal: dispatched.credential_ordinal,
            }),
            total_chunks: total,
            cached_at: Utc::now(),
            ..record
        };
        self.cache.put(identity, index, updated.clone()).await?;
        info!(identity = %identity, index, "Chunk reprocessed");

        let mut chunk = Chunk::from_cached(updated);
        chunk.status = ChunkStatus::Completed;
        Ok(chunk)
    }

    /// Summarize the cached chunks of one group.
    ///
    /// The summary is returned to the caller and not cached.
    pub async fn summarize_group(
        &self,
        identity: &ContentIdentity,
        group: &SummaryGroup,
        options: &ProcessOptions,
        pool: &mut CredentialPool,
    ) -> Result<GroupSummary, PipelineError> {
        let records = self.cache.get_all(identity).await;
        let selected = records_in_group(&records, group);
        if selected.is_empty() {
            return Err(PipelineError::ChunkNotFound {
                identity: identity.to_string(),
                index: group.start_index,
            });
        }

        let missing_indices: Vec<usize> = group
            .chunk_indices
            .iter()
            .copied()
            .filter(|i| !selected.iter().any(|r| r.chunk_index == *i))
            .collect();
        let input = selected
            .iter()
            .map(|r| r.enhanced_text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut rotation = pool.start_run();
        let request = CompletionRequest {
            text: &input,
            instructions: &self.summary_instructions,
            model: &options.model,
        };
        let dispatched = self.dispatcher.dispatch(pool, &mut rotation, request).await?;

        debug!(
            identity = %identity,
            start = group.start_index,
            end = group.end_index,
            missing = missing_indices.len(),
            "Group summarized"
        );

        Ok(GroupSummary {
            group: group.clone(),
            summary: dispatched.text,
            missing_indices,
        })
    }
}

async fn abort(events: &mpsc::Sender<PipelineEvent>, unprocessed: &[usize], reason: &str) {
    let _ = events
        .send(PipelineEvent::RunAborted {
            unprocessed: unprocessed.to_vec(),
            reason: reason.to_string(),
        })
        .await;
}

/// Join enhanced texts in index order.
pub fn assemble(records: &[CachedChunk]) -> String {
    let mut ordered: Vec<&CachedChunk> = records.iter().collect();
    ordered.sort_by_key(|r| r.chunk_index);
    ordered
        .iter()
        .map(|r| r.enhanced_text.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}
