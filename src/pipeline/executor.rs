// Pipeline executor
// prepare -> train -> export, strictly in order; the first failing stage ends the job

use super::locator::{publish_artifact, select_run_dir};
use crate::error::{JobError, Result};
use crate::jobs::JobStore;
use crate::models::{Job, Settings, Stage, StageRecord};
use crate::process_manager::{run_stage, CommandTemplate, StageVars};
use crate::utils::{JobPaths, RUN_CONFIG_FILE};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct PipelineExecutor {
    store: Arc<JobStore>,
    settings: Arc<Settings>,
}

impl PipelineExecutor {
    pub fn new(store: Arc<JobStore>, settings: Arc<Settings>) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Drive one job to a terminal state and return its final snapshot.
    /// Pipeline failures are recorded on the job, not returned; `Err` means the
    /// job could not be claimed or its state could not be persisted.
    pub async fn execute(&self, job_id: &str, image_dir: &Path) -> Result<Job> {
        let _claim = self.store.claim(job_id)?;

        self.store.update(job_id, |job| job.mark_running())?;
        info!("[{}] Pipeline started on {:?}", job_id, image_dir);

        match self.run_stages(job_id, image_dir).await {
            Ok(artifact) => {
                let artifact = artifact.to_string_lossy().to_string();
                match self.store.update(job_id, |job| job.mark_done(artifact.clone())) {
                    Ok(job) => {
                        info!("[{}] Pipeline finished, artifact at {}", job_id, artifact);
                        Ok(job)
                    }
                    Err(e) => {
                        error!("[{}] Could not record completion: {}", job_id, e);
                        self.store.fail(job_id, &e)
                    }
                }
            }
            Err(e) => {
                error!("[{}] Pipeline failed: {}", job_id, e);
                self.store.fail(job_id, &e)
            }
        }
    }

    async fn run_stages(&self, job_id: &str, image_dir: &Path) -> Result<PathBuf> {
        let paths = self.store.paths(job_id);
        let commands = &self.settings.commands;
        let iterations = self.settings.iterations;

        let dataset_dir = paths.dataset_dir();
        let outputs_dir = paths.training_outputs_dir();
        let output_dir = paths.output_dir();

        self.run_one(
            job_id,
            &paths,
            Stage::Prepare,
            &commands.prepare,
            StageVars {
                input: image_dir,
                output: &dataset_dir,
                config: None,
                iterations,
            },
        )
        .await?;

        self.run_one(
            job_id,
            &paths,
            Stage::Train,
            &commands.train,
            StageVars {
                input: &dataset_dir,
                output: &outputs_dir,
                config: None,
                iterations,
            },
        )
        .await?;

        let run_dir = select_run_dir(&outputs_dir)?;
        info!("[{}] Exporting from run {:?}", job_id, run_dir);
        self.store.update(job_id, |job| {
            job.run_dir = Some(run_dir.to_string_lossy().to_string());
            Ok(())
        })?;

        let run_config = run_dir.join(RUN_CONFIG_FILE);
        self.run_one(
            job_id,
            &paths,
            Stage::Export,
            &commands.export,
            StageVars {
                input: &run_dir,
                output: &output_dir,
                config: Some(&run_config),
                iterations,
            },
        )
        .await?;

        let canonical = paths.artifact();
        tokio::task::spawn_blocking(move || publish_artifact(&output_dir, &canonical))
            .await
            .map_err(|e| JobError::Io(std::io::Error::other(e)))?
    }

    async fn run_one(
        &self,
        job_id: &str,
        paths: &JobPaths,
        stage: Stage,
        template: &CommandTemplate,
        vars: StageVars<'_>,
    ) -> Result<()> {
        let command = template.render(&vars);
        let description = command.describe();

        self.store.update(job_id, |job| {
            job.stages.push(StageRecord {
                stage,
                command: description.clone(),
                exit_code: None,
                stdout_tail: String::new(),
                stderr_tail: String::new(),
                started_at: chrono::Utc::now().to_rfc3339(),
                finished_at: None,
            });
            Ok(())
        })?;

        let timeout = self.settings.stage_timeout_secs.map(Duration::from_secs);
        let result = run_stage(job_id, stage, &command, &paths.work_dir(), timeout).await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                self.store.update(job_id, |job| {
                    if let Some(record) = job.stages.last_mut() {
                        record.stderr_tail = message;
                        record.finished_at = Some(chrono::Utc::now().to_rfc3339());
                    }
                    Ok(())
                })?;
                return Err(e);
            }
        };

        let succeeded = outcome.succeeded();
        let exit_code = outcome.exit_code;
        let timed_out = outcome.timed_out;

        self.store.update(job_id, |job| {
            if let Some(record) = job.stages.last_mut() {
                record.exit_code = Some(outcome.exit_code);
                record.stdout_tail = outcome.stdout_tail;
                record.stderr_tail = outcome.stderr_tail;
                record.finished_at = Some(chrono::Utc::now().to_rfc3339());
            }
            Ok(())
        })?;

        if timed_out {
            return Err(JobError::StageTimedOut {
                stage,
                secs: self.settings.stage_timeout_secs.unwrap_or_default(),
            });
        }
        if !succeeded {
            return Err(JobError::StageFailed { stage, exit_code });
        }
        Ok(())
    }
}
