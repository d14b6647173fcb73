//! Mapping of job failures onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use envrun::job::JobError;
use tracing::{error, warn};

/// Handler error carrying a [`JobError`].
#[derive(Debug)]
pub struct ApiError(pub JobError);

impl From<JobError> for ApiError {
    fn from(value: JobError) -> Self {
        Self(value)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self(JobError::Internal(value))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            JobError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            JobError::Install { .. } | JobError::Runner { .. } => StatusCode::BAD_REQUEST,
            JobError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.0.body();
        if status.is_server_error() {
            error!(kind = body.kind, error = %body.message, "request failed");
        } else {
            warn!(kind = body.kind, error = %body.message.trim_end(), "job rejected");
        }
        (status, Json(body)).into_response()
    }
}
