use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::AppError;

const CODE_SUCCESS: &str = "000";
const CODE_FAILURE: &str = "999";

/// Response body shared by every JSON endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: &'static str,
    pub data: Option<T>,
    pub msg: String,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: CODE_SUCCESS,
            data: Some(data),
            msg: String::new(),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            e if e.is_client_facing() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Server-side faults can carry paths and OS errors; keep those in the logs.
        let msg = if self.is_client_facing() {
            tracing::info!(status = %status, error = %self, "Request failed");
            self.to_string()
        } else {
            tracing::error!(error = %self, "Request failed with server error");
            "Internal server error".to_string()
        };

        let body = Envelope::<()> {
            code: CODE_FAILURE,
            data: None,
            msg,
        };
        (status, Json(body)).into_response()
    }
}
