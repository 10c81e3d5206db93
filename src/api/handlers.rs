//! HTTP request handlers for the enhancement service.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DispatchError, PipelineError};
use crate::jobs::{JobProcessor, JobStore, SharedPool};
use crate::pipeline::{CancelToken, Orchestrator};
use crate::summary::{groups_for, GroupSummary, SummaryGroup};
use crate::types::{
    CachedChunk, Chunk, ContentIdentity, EnhancerConfig, ProcessOptions, ProcessOverrides,
    StartEnhanceJobRequest, StartEnhanceJobResponse,
};

/// Application state shared across handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub processor: Arc<JobProcessor>,
    pub pool: Arc<SharedPool>,
    pub job_store: Arc<RwLock<JobStore>>,
    pub config: EnhancerConfig,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, pool: Arc<SharedPool>, config: EnhancerConfig) -> Self {
        let processor = Arc::new(JobProcessor::new(orchestrator.clone(), pool.clone()));
        Self {
            orchestrator,
            processor,
            pool,
            job_store: Arc::new(RwLock::new(JobStore::new())),
            config,
        }
    }

    fn options(&self, overrides: Option<&ProcessOverrides>) -> ProcessOptions {
        let options = self.config.process_options();
        match overrides {
            Some(overrides) => options.with_overrides(overrides),
            None => options,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    credentials: usize,
}

/// Cached chunks of one identity.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunksResponse {
    pub identity: ContentIdentity,
    pub has_chunks: bool,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    pub missing_indices: Vec<usize>,
    pub chunks: Vec<CachedChunk>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub removed: usize,
}

#[derive(Debug, Deserialize)]
pub struct SummaryGroupsQuery {
    pub group_size: Option<usize>,
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        credentials: state.pool.snapshot().await.len(),
    })
}

/// Start an enhancement job.
pub async fn start_enhance_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartEnhanceJobRequest>,
) -> Result<Json<StartEnhanceJobResponse>, StatusCode> {
    let Some(identity) = request.content_identity() else {
        return Ok(Json(StartEnhanceJobResponse {
            job_id: Uuid::nil(),
            accepted: false,
            identity: None,
            message: Some("An identity or url is required".to_string()),
        }));
    };

    info!(
        identity = %identity,
        title = request.title.as_deref().unwrap_or(""),
        chars = request.text.len(),
        "Received enhance job request"
    );

    let options = state.options(request.options.as_ref());
    let cancel = CancelToken::new();
    let job_id = state
        .job_store
        .write()
        .await
        .create_job(identity.clone(), cancel.clone());

    let processor = state.processor.clone();
    let job_store = state.job_store.clone();
    let job_identity = identity.clone();
    tokio::spawn(async move {
        processor
            .process_job(job_id, job_identity, request.text, options, cancel, job_store)
            .await;
    });

    Ok(Json(StartEnhanceJobResponse {
        job_id,
        accepted: true,
        identity: Some(identity),
        message: None,
    }))
}

/// Get job status.
pub async fn get_job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let store = state.job_store.read().await;

    match store.get_job_status(job_id) {
        Some(status) => Ok(Json(status)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// Stop a running job after its current chunk.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> StatusCode {
    if state.job_store.write().await.cancel_job(job_id) {
        info!(job_id = %job_id, "Job cancellation requested");
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    }
}

/// List cached chunks of an identity.
pub async fn get_chunks(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
) -> Json<ChunksResponse> {
    let identity = ContentIdentity::new(identity);
    let cache = state.orchestrator.cache();

    let metadata = cache.metadata(&identity).await;
    let chunks = cache.get_all(&identity).await;
    let chunk_count = metadata.as_ref().map_or(0, |m| m.indices.len());

    Json(ChunksResponse {
        has_chunks: chunk_count > 0,
        chunk_count,
        total_chunks: metadata.as_ref().map(|m| m.total_chunks),
        missing_indices: metadata.map(|m| m.missing()).unwrap_or_default(),
        chunks,
        identity,
    })
}

/// Remove every cached chunk of an identity.
pub async fn delete_chunks(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
) -> Result<Json<DeleteResponse>, StatusCode> {
    let identity = ContentIdentity::new(identity);
    match state.orchestrator.cache().delete_all(&identity).await {
        Ok(removed) => Ok(Json(DeleteResponse { removed })),
        Err(e) => {
            warn!(identity = %identity, error = %e, "Failed to delete cached chunks");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Remove one cached chunk.
pub async fn delete_chunk(
    State(state): State<Arc<AppState>>,
    Path((identity, index)): Path<(String, usize)>,
) -> Result<Json<DeleteResponse>, StatusCode> {
    let identity = ContentIdentity::new(identity);
    match state.orchestrator.cache().delete(&identity, index).await {
        Ok(true) => Ok(Json(DeleteResponse { removed: 1 })),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!(identity = %identity, index, error = %e, "Failed to delete cached chunk");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Re-enhance one cached chunk. The body may carry option overrides.
pub async fn reprocess_chunk(
    State(state): State<Arc<AppState>>,
    Path((identity, index)): Path<(String, usize)>,
    overrides: Option<Json<ProcessOverrides>>,
) -> Result<Json<Chunk>, StatusCode> {
    let identity = ContentIdentity::new(identity);
    let options = state.options(overrides.as_ref().map(|Json(o)| o));

    let mut pool = state.pool.snapshot().await;
    let result = state
        .orchestrator
        .reprocess_chunk(&identity, index, &options, &mut pool)
        .await;
    state.pool.commit(&pool).await;

    result.map(Json).map_err(|e| {
        warn!(identity = %identity, index, error = %e, "Reprocess failed");
        status_for(&e)
    })
}

/// Summary groups over an identity's chunk range.
pub async fn summary_groups(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
    Query(query): Query<SummaryGroupsQuery>,
) -> Result<Json<Vec<SummaryGroup>>, StatusCode> {
    let identity = ContentIdentity::new(identity);
    let metadata = state
        .orchestrator
        .cache()
        .metadata(&identity)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    let group_size = query.group_size.unwrap_or(state.config.summary_group_size);
    Ok(Json(groups_for(metadata.total_chunks, group_size)))
}

/// Summarize the cached chunks of one summary group.
pub async fn summarize_group(
    State(state): State<Arc<AppState>>,
    Path((identity, group)): Path<(String, usize)>,
    Query(query): Query<SummaryGroupsQuery>,
) -> Result<Json<GroupSummary>, StatusCode> {
    let identity = ContentIdentity::new(identity);
    let metadata = state
        .orchestrator
        .cache()
        .metadata(&identity)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    let group_size = query.group_size.unwrap_or(state.config.summary_group_size);
    let group = groups_for(metadata.total_chunks, group_size)
        .into_iter()
        .nth(group)
        .ok_or(StatusCode::NOT_FOUND)?;

    let options = state.options(None);
    let mut pool = state.pool.snapshot().await;
    let result = state
        .orchestrator
        .summarize_group(&identity, &group, &options, &mut pool)
        .await;
    state.pool.commit(&pool).await;

    result.map(Json).map_err(|e| {
        warn!(identity = %identity, group = group.start_index, error = %e, "Summary failed");
        status_for(&e)
    })
}

fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::ChunkNotFound { .. } => StatusCode::NOT_FOUND,
        PipelineError::AllCredentialsExhausted { .. }
        | PipelineError::Dispatch(DispatchError::AllCredentialsExhausted { .. }) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        PipelineError::Dispatch(DispatchError::NoCredentials) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Dispatch(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Cancelled { .. } => StatusCode::CONFLICT,
        PipelineError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
