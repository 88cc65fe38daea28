use std::path::Path as FsPath;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::access::Caller;
use crate::api::response::Envelope;
use crate::diagnosis::{DiagnosisBundle, DiagnosisRequest};
use crate::error::{AppError, Result};
use crate::metadata::types::BadQueryHistory;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    pub project: String,
}

/// Identify the caller from the configured user header.
fn caller_from_headers(state: &AppState, headers: &HeaderMap) -> Result<Caller> {
    headers
        .get(state.config.http.user_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .map(Caller::new)
        .ok_or(AppError::Unauthenticated)
}

pub async fn bad_query_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<Envelope<BadQueryHistory>>> {
    let caller = caller_from_headers(&state, &headers)?;
    let history = state
        .diagnosis
        .bad_query_history(&caller, &query.project)
        .await?;
    Ok(Json(Envelope::ok(history)))
}

pub async fn download_project_diagnosis(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<Response> {
    let caller = caller_from_headers(&state, &headers)?;
    run_and_send(state, caller, DiagnosisRequest::project(project)).await
}

pub async fn download_job_diagnosis(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Response> {
    let caller = caller_from_headers(&state, &headers)?;
    run_and_send(state, caller, DiagnosisRequest::job(job_id)).await
}

/// Run the diagnosis on its own task so a dropped connection cancels the script
/// instead of abandoning it.
async fn run_and_send(
    state: Arc<AppState>,
    caller: Caller,
    request: DiagnosisRequest,
) -> Result<Response> {
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();

    let task_state = Arc::clone(&state);
    let bundle = tokio::spawn(async move {
        task_state
            .diagnosis
            .diagnose(&caller, &request, &cancel)
            .await
    })
    .await
    .map_err(|e| AppError::Internal(format!("Diagnosis task panicked: {e}")))??;

    send_bundle(&state, bundle).await
}

/// Stream the bundle to the client and release its workspace.
async fn send_bundle(state: &AppState, bundle: DiagnosisBundle) -> Result<Response> {
    let workspaces = state.diagnosis.workspaces();
    let path = workspaces.verify_path(&bundle.path)?;

    let file = tokio::fs::File::open(&path).await?;
    let len = file.metadata().await?.len();

    // The open handle keeps the bytes readable after the directory is unlinked; if the
    // platform refuses, the janitor collects the workspace later.
    if let Err(e) = workspaces.cleanup(&bundle.workspace).await {
        tracing::warn!(workspace = %bundle.workspace.display(), error = %e, "Workspace left for janitor");
    }

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&path)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn content_disposition(path: &FsPath) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "diagnosis.zip".to_string());
    let fallback: String = name
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(&name)
    )
}
