//! Enhancer Service - Main Entry Point
//!
//! Chunked content enhancement over a localhost HTTP API.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use enhancer::api::{self, AppState};
use enhancer::cache::{ChunkCache, FileStore, KeyValueStore, MemoryStore};
use enhancer::client::{CredentialPool, Dispatcher, GeminiClient};
use enhancer::jobs::SharedPool;
use enhancer::pipeline::Orchestrator;
use enhancer::types::EnhancerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "enhancer=info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = EnhancerConfig::from_env().context("Failed to load configuration")?;

    info!("Starting Enhancer Service v{}", env!("CARGO_PKG_VERSION"));
    info!(
        target_words = config.target_words,
        credentials = config.api_keys.len(),
        rotation = ?config.rotation,
        model = %config.model,
        "Configuration loaded"
    );
    if config.api_keys.is_empty() {
        warn!("No API keys configured; every chunk will fail until ENHANCER_API_KEYS is set");
    }

    // Storage
    let store: Arc<dyn KeyValueStore> = match &config.cache_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Using file-backed chunk cache");
            Arc::new(FileStore::open(dir).await.context("Failed to open cache directory")?)
        }
        None => {
            info!("Using in-memory chunk cache");
            Arc::new(MemoryStore::new())
        }
    };
    let cache = Arc::new(ChunkCache::new(store.clone()));
    let purged = cache.migrate().await?;
    if purged > 0 {
        info!(purged, "Removed legacy cache entries");
    }

    // Completion API
    let client = GeminiClient::from_config(&config).context("Failed to create HTTP client")?;
    let dispatcher = Dispatcher::new(Arc::new(client), config.retry_policy());
    let orchestrator = Arc::new(
        Orchestrator::new(cache, dispatcher)
            .with_summary_instructions(config.summary_instructions.clone()),
    );

    let pool = CredentialPool::new(config.api_keys.clone(), config.rotation);
    let pool = Arc::new(SharedPool::load(pool, store).await);

    let port = config.port;
    let state = Arc::new(AppState::new(orchestrator, pool, config));

    // Drop finished jobs periodically
    let job_store = state.job_store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            job_store.write().await.cleanup_old_jobs();
        }
    });

    // Build HTTP routes
    let app = api::router(state)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
