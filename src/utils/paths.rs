use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const JOB_RECORD_FILE: &str = "job.json";
pub const ARTIFACT_FILE_NAME: &str = "splat.ply";
pub const ARTIFACT_EXTENSION: &str = "ply";
pub const RUN_CONFIG_FILE: &str = "config.yml";

/// Directory layout of one job's workspace
#[derive(Debug, Clone)]
pub struct JobPaths {
    root: PathBuf,
}

impl JobPaths {
    pub fn new(jobs_dir: &Path, job_id: &str) -> Self {
        Self {
            root: jobs_dir.join(job_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record(&self) -> PathBuf {
        self.root.join(JOB_RECORD_FILE)
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.work_dir().join("dataset")
    }

    pub fn training_outputs_dir(&self) -> PathBuf {
        self.work_dir().join("outputs")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn artifact(&self) -> PathBuf {
        self.output_dir().join(ARTIFACT_FILE_NAME)
    }

    /// Creates the job root exclusively, failing with `AlreadyExists` if it is taken
    pub fn create(&self) -> io::Result<()> {
        if let Some(parent) = self.root.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir(&self.root)?;

        let directories = [
            self.input_dir(),
            self.dataset_dir(),
            self.training_outputs_dir(),
            self.output_dir(),
        ];
        for dir in &directories {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Job ids are 32-char simple UUIDs; anything else never reaches the filesystem
pub fn is_valid_job_id(job_id: &str) -> bool {
    job_id.len() == 32 && uuid::Uuid::try_parse(job_id).is_ok()
}
