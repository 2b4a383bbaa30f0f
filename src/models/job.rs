// Job data models
use crate::error::{ErrorKind, JobError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// queued -> running -> {done | failed}; queued may also fail directly
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The three external pipeline stages, in execution order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prepare,
    Train,
    Export,
}

impl Stage {
    pub const ORDER: [Stage; 3] = [Stage::Prepare, Stage::Train, Stage::Export];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Train => "train",
            Stage::Export => "export",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub started_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub image_dir: Option<String>,
    #[serde(default)]
    pub image_count: usize,
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    #[serde(default)]
    pub run_dir: Option<String>,
    #[serde(default)]
    pub artifact_path: Option<String>,
}

impl Job {
    pub fn new(job_id: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            job_id,
            status: JobStatus::Queued,
            error: None,
            error_kind: None,
            created_at: now.clone(),
            updated_at: now,
            image_dir: None,
            image_count: 0,
            stages: Vec::new(),
            run_dir: None,
            artifact_path: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }

    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(JobStatus::Running)
    }

    pub fn mark_done(&mut self, artifact_path: String) -> Result<()> {
        self.transition(JobStatus::Done)?;
        self.artifact_path = Some(artifact_path);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: &JobError) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
        Ok(())
    }

    /// Stage the job failed in, if the failure came from a stage
    pub fn failed_stage(&self) -> Option<Stage> {
        match self.error_kind {
            Some(ErrorKind::StageFailed | ErrorKind::StageLaunch | ErrorKind::StageTimedOut) => {
                self.stages.last().map(|record| record.stage)
            }
            _ => None,
        }
    }
}

/// What the status endpoint exposes; captured process output stays private
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub artifact_exists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_queued() {
        let job = Job::new("abc".to_string());
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.error.is_none());
        assert!(job.stages.is_empty());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = Job::new("abc".to_string());
        job.mark_running().unwrap();
        job.mark_done("/tmp/splat.ply".to_string()).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.artifact_path.as_deref(), Some("/tmp/splat.ply"));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = Job::new("abc".to_string());
        job.mark_failed(&JobError::NoImagesFound).unwrap();
        assert_eq!(job.error_kind, Some(ErrorKind::NoImagesFound));

        let err = job.mark_running().unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Running
            }
        ));
        assert!(job.mark_failed(&JobError::ArtifactNotFound).is_err());
        assert_eq!(job.error_kind, Some(ErrorKind::NoImagesFound));
    }

    #[test]
    fn test_queued_cannot_jump_to_done() {
        let mut job = Job::new("abc".to_string());
        assert!(job.mark_done("x".to_string()).is_err());
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_failed_stage_uses_last_record() {
        let mut job = Job::new("abc".to_string());
        job.mark_running().unwrap();
        job.stages.push(StageRecord {
            stage: Stage::Train,
            command: "ns-train".to_string(),
            exit_code: Some(1),
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            started_at: job.created_at.clone(),
            finished_at: None,
        });
        job.mark_failed(&JobError::StageFailed {
            stage: Stage::Train,
            exit_code: 1,
        })
        .unwrap();
        assert_eq!(job.failed_stage(), Some(Stage::Train));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_value(Job::new("abc".to_string())).unwrap();
        assert_eq!(json["status"], "queued");
    }
}
