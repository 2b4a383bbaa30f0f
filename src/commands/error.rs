// HTTP mapping of job errors

use crate::error::JobError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::warn;

/// A job error plus the id of the job it belongs to, when one was created
#[derive(Debug)]
pub struct ApiError {
    pub job_id: Option<String>,
    pub error: JobError,
}

impl ApiError {
    pub fn for_job(job_id: &str, error: JobError) -> Self {
        Self {
            job_id: Some(job_id.to_string()),
            error,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.error {
            JobError::InvalidArchive(_) | JobError::NoImagesFound | JobError::Upload(_) => {
                StatusCode::BAD_REQUEST
            }
            JobError::JobNotFound(_) | JobError::ArtifactNotFound => StatusCode::NOT_FOUND,
            JobError::JobBusy(_) => StatusCode::CONFLICT,
            JobError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JobError> for ApiError {
    fn from(error: JobError) -> Self {
        Self {
            job_id: None,
            error,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed ({}): {}", status, self.error);
        }

        let mut body = serde_json::json!({
            "error": self.error.kind(),
            "message": self.error.to_string(),
        });
        if let Some(job_id) = self.job_id {
            body["job_id"] = serde_json::Value::String(job_id);
        }

        (status, axum::Json(body)).into_response()
    }
}
