// Error taxonomy shared by the job store, ingestion and pipeline
use crate::models::{JobStatus, Stage};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, JobError>;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("no images found (looked for jpg/jpeg/png/webp at the archive root and one folder deep)")]
    NoImagesFound,

    #[error("stage '{stage}' failed with exit code {exit_code}")]
    StageFailed { stage: Stage, exit_code: i32 },

    #[error("stage '{stage}' could not be launched: {message}")]
    StageLaunch { stage: Stage, message: String },

    #[error("stage '{stage}' timed out after {secs}s")]
    StageTimedOut { stage: Stage, secs: u64 },

    #[error("training produced no run directory")]
    NoRunDirectory,

    #[error("export produced no artifact")]
    ArtifactNotFound,

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job is busy: {0}")]
    JobBusy(String),

    #[error("job queue is full, try again later")]
    QueueFull,

    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job interrupted by a service restart")]
    Interrupted,

    #[error("malformed upload: {0}")]
    Upload(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stable, machine-readable error class persisted next to the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArchive,
    NoImagesFound,
    StageFailed,
    StageLaunch,
    StageTimedOut,
    NoRunDirectory,
    ArtifactNotFound,
    JobNotFound,
    JobBusy,
    QueueFull,
    InvalidTransition,
    Interrupted,
    Upload,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArchive => "invalid_archive",
            ErrorKind::NoImagesFound => "no_images_found",
            ErrorKind::StageFailed => "stage_failed",
            ErrorKind::StageLaunch => "stage_launch",
            ErrorKind::StageTimedOut => "stage_timed_out",
            ErrorKind::NoRunDirectory => "no_run_directory",
            ErrorKind::ArtifactNotFound => "artifact_not_found",
            ErrorKind::JobNotFound => "job_not_found",
            ErrorKind::JobBusy => "job_busy",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Upload => "upload",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::InvalidArchive(_) => ErrorKind::InvalidArchive,
            JobError::NoImagesFound => ErrorKind::NoImagesFound,
            JobError::StageFailed { .. } => ErrorKind::StageFailed,
            JobError::StageLaunch { .. } => ErrorKind::StageLaunch,
            JobError::StageTimedOut { .. } => ErrorKind::StageTimedOut,
            JobError::NoRunDirectory => ErrorKind::NoRunDirectory,
            JobError::ArtifactNotFound => ErrorKind::ArtifactNotFound,
            JobError::JobNotFound(_) => ErrorKind::JobNotFound,
            JobError::JobBusy(_) => ErrorKind::JobBusy,
            JobError::QueueFull => ErrorKind::QueueFull,
            JobError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            JobError::Interrupted => ErrorKind::Interrupted,
            JobError::Upload(_) => ErrorKind::Upload,
            JobError::Config(_) => ErrorKind::Config,
            JobError::Io(_) | JobError::Json(_) => ErrorKind::Internal,
        }
    }

    /// The caller sent something unusable (bad archive, no images, bad multipart)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            JobError::InvalidArchive(_) | JobError::NoImagesFound | JobError::Upload(_)
        )
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }
}
