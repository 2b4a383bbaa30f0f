// Job HTTP handlers: submit an archive, query status, download the artifact
use super::error::ApiError;
use crate::error::JobError;
use crate::jobs::{ingest_archive, JobStore};
use crate::models::{Job, JobStatus, JobStatusView, Settings};
use crate::pipeline::PipelineRequest;
use crate::server::AppState;
use crate::utils::ARTIFACT_FILE_NAME;
use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;

#[derive(Debug, Default, Deserialize)]
pub struct SubmitParams {
    /// Block until the pipeline reaches a terminal state
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    pub status: JobStatus,
    pub status_url: String,
    pub artifact_url: String,
}

impl JobDescriptor {
    fn new(settings: &Settings, job_id: &str, status: JobStatus) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            status_url: settings.link(&format!("/api/jobs/{}", job_id)),
            artifact_url: settings.link(&format!("/api/jobs/{}/artifact", job_id)),
        }
    }
}

/// First part with a filename (or named `file`) is the archive
async fn read_archive(mut multipart: Multipart) -> Result<Bytes, JobError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| JobError::Upload(e.to_string()))?
    {
        if field.file_name().is_some() || field.name() == Some("file") {
            debug!("Reading upload part {:?} ({:?})", field.name(), field.file_name());
            return field
                .bytes()
                .await
                .map_err(|e| JobError::Upload(e.to_string()));
        }
    }

    Err(JobError::Upload("no archive file in multipart body".to_string()))
}

/// Canonical artifact path, only for finished jobs whose file is present
fn ready_artifact(store: &JobStore, job: &Job) -> Option<PathBuf> {
    let artifact = store.paths(&job.job_id).artifact();
    (job.status == JobStatus::Done && artifact.is_file()).then_some(artifact)
}

pub async fn submit_job(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let archive = read_archive(multipart).await?;
    let store = state.store.clone();

    let job = store.create_job()?;
    let job_id = job.job_id;
    info!("Submitted job {} ({} byte archive)", job_id, archive.len());

    let images = {
        let _claim = store
            .claim(&job_id)
            .map_err(|e| ApiError::for_job(&job_id, e))?;
        let ingest_store = store.clone();
        let ingest_id = job_id.clone();
        tokio::task::spawn_blocking(move || ingest_archive(&ingest_store, &ingest_id, &archive))
            .await
            .map_err(|e| ApiError::for_job(&job_id, JobError::Io(std::io::Error::other(e))))?
            .map_err(|e| ApiError::for_job(&job_id, e))?
    };

    let (done, waiter) = if params.wait {
        let (done, waiter) = oneshot::channel();
        (Some(done), Some(waiter))
    } else {
        (None, None)
    };

    let request = PipelineRequest {
        job_id: job_id.clone(),
        image_dir: images.image_dir,
        done,
    };
    if let Err(e) = state.queue.submit(request) {
        if let Err(persist_err) = store.fail(&job_id, &e) {
            error!("[{}] Failed to persist rejection: {}", job_id, persist_err);
        }
        return Err(ApiError::for_job(&job_id, e));
    }

    let Some(waiter) = waiter else {
        let descriptor = JobDescriptor::new(&state.settings, &job_id, JobStatus::Queued);
        return Ok((StatusCode::ACCEPTED, Json(descriptor)).into_response());
    };

    // a dropped sender means the worker could not run the job; the store has the last word
    let job = match waiter.await {
        Ok(job) => job,
        Err(_) => store
            .read(&job_id)
            .map_err(|e| ApiError::for_job(&job_id, e))?,
    };

    if job.status == JobStatus::Done {
        let descriptor = JobDescriptor::new(&state.settings, &job_id, JobStatus::Done);
        Ok((StatusCode::OK, Json(descriptor)).into_response())
    } else {
        Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(job)).into_response())
    }
}

pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    let job = state.store.read(&job_id)?;
    let artifact_exists = ready_artifact(&state.store, &job).is_some();

    Ok(Json(JobStatusView {
        job_id: job.job_id,
        status: job.status,
        error: job.error,
        artifact_exists,
    }))
}

pub async fn download_artifact(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job = state.store.read(&job_id)?;
    let path = ready_artifact(&state.store, &job).ok_or(JobError::ArtifactNotFound)?;

    let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => JobError::ArtifactNotFound,
        _ => JobError::Io(e),
    })?;
    let length = file.metadata().await.map_err(JobError::Io)?.len();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", ARTIFACT_FILE_NAME),
        )
        .header(header::CONTENT_LENGTH, length)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::from(JobError::Io(std::io::Error::other(e))))
}
