use std::sync::Arc;

use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::api::handler;
use crate::config::AppConfig;
use crate::diagnosis::DiagnosisService;

pub struct AppState {
    pub config: AppConfig,
    pub diagnosis: DiagnosisService,
    /// Parent of every per-request token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let diagnosis = DiagnosisService::from_config(&config);
        Self::with_service(config, diagnosis)
    }

    pub fn with_service(config: AppConfig, diagnosis: DiagnosisService) -> Self {
        Self {
            config,
            diagnosis,
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/diag/sql", get(handler::bad_query_history))
        .route(
            "/api/diag/project/:project/download",
            get(handler::download_project_diagnosis),
        )
        .route(
            "/api/diag/job/:job_id/download",
            get(handler::download_job_diagnosis),
        )
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
