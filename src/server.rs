//! HTTP server wiring

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use log::{info, warn};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::commands::health::health;
use crate::commands::jobs::{download_artifact, get_job_status, submit_job};
use crate::error::Result;
use crate::jobs::JobStore;
use crate::models::Settings;
use crate::performance::detect_compute_slots;
use crate::pipeline::{JobQueue, PipelineExecutor};

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub queue: JobQueue,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Open the store, settle jobs left over from a previous process and start the workers.
    /// Must be called inside a Tokio runtime.
    pub fn start(settings: Settings) -> Result<Self> {
        let settings = Arc::new(settings);
        let store = Arc::new(JobStore::open(settings.jobs_dir())?);

        store.recover_interrupted()?;
        if let Some(retention) = settings.job_retention()? {
            let pruned = store.prune_finished(retention)?;
            if pruned > 0 {
                info!("Pruned {} job workspace(s) older than {:?}", pruned, retention);
            }
        }

        let workers = settings.workers.unwrap_or_else(detect_compute_slots);
        let executor = Arc::new(PipelineExecutor::new(store.clone(), settings.clone()));
        let queue = JobQueue::start(executor, workers, settings.queue_capacity);

        Ok(Self {
            store,
            queue,
            settings,
        })
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {:?}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.settings.max_upload_bytes).unwrap_or(usize::MAX);
    let cors = cors_layer(&state.settings.cors_origins);

    Router::new()
        .route("/health", get(health))
        .route("/api/train", post(submit_job))
        .route("/api/jobs/{job_id}", get(get_job_status))
        .route("/api/jobs/{job_id}/artifact", get(download_artifact))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Serve the API until Ctrl-C
pub async fn start_server(state: AppState) -> Result<()> {
    let addr = state.settings.bind_addr()?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
