// Filesystem-backed job store
// job.json in each workspace is the source of truth; nothing is cached in memory

use crate::error::{JobError, Result};
use crate::file_manager::{read_json_file, update_json_file, write_json_file};
use crate::models::Job;
use crate::utils::{is_valid_job_id, JobPaths};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const CREATE_ATTEMPTS: usize = 3;

pub struct JobStore {
    jobs_dir: PathBuf,
    claims: Arc<Mutex<HashSet<String>>>,
}

/// Single-writer token for one job id; released on drop
#[derive(Debug)]
pub struct JobClaim {
    job_id: String,
    claims: Arc<Mutex<HashSet<String>>>,
}

impl JobClaim {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for JobClaim {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.job_id);
    }
}

impl JobStore {
    pub fn open(jobs_dir: impl Into<PathBuf>) -> Result<Self> {
        let jobs_dir = jobs_dir.into();
        fs::create_dir_all(&jobs_dir)?;
        info!("Job store opened at: {:?}", jobs_dir);

        Ok(Self {
            jobs_dir,
            claims: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    pub fn paths(&self, job_id: &str) -> JobPaths {
        JobPaths::new(&self.jobs_dir, job_id)
    }

    /// Allocate a fresh id, lay out its workspace and persist the `queued` record
    pub fn create_job(&self) -> Result<Job> {
        for _ in 0..CREATE_ATTEMPTS {
            let job_id = uuid::Uuid::new_v4().simple().to_string();
            let paths = self.paths(&job_id);

            match paths.create() {
                Ok(()) => {
                    let job = Job::new(job_id);
                    write_json_file(&paths.record(), &job)?;
                    debug!("Created job: {}", job.job_id);
                    return Ok(job);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    warn!("Job id collision on {}, retrying", job_id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(JobError::Io(io::Error::other("could not allocate a unique job id")))
    }

    pub fn read(&self, job_id: &str) -> Result<Job> {
        if !is_valid_job_id(job_id) {
            return Err(JobError::JobNotFound(job_id.to_string()));
        }

        read_json_file(&self.paths(job_id).record()).map_err(|e| match e {
            JobError::Io(ref io_err) if io_err.kind() == io::ErrorKind::NotFound => {
                JobError::JobNotFound(job_id.to_string())
            }
            other => other,
        })
    }

    pub fn write(&self, job: &Job) -> Result<()> {
        if !is_valid_job_id(&job.job_id) {
            return Err(JobError::JobNotFound(job.job_id.clone()));
        }
        write_json_file(&self.paths(&job.job_id).record(), job)
    }

    /// Read-modify-write of one record; the closure's error aborts the write
    pub fn update<F>(&self, job_id: &str, update_fn: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        // surfaces JobNotFound before touching the file
        self.read(job_id)?;
        update_json_file(&self.paths(job_id).record(), |job: &mut Job| {
            update_fn(job)?;
            job.touch();
            Ok(())
        })
    }

    /// Persist `failed` for `error`; a job that is already terminal keeps its state
    pub fn fail(&self, job_id: &str, error: &JobError) -> Result<Job> {
        warn!("Job {} failed: {}", job_id, error);
        self.update(job_id, |job| job.mark_failed(error))
    }

    pub fn claim(&self, job_id: &str) -> Result<JobClaim> {
        let mut claims = self.claims.lock();
        if !claims.insert(job_id.to_string()) {
            return Err(JobError::JobBusy(job_id.to_string()));
        }

        Ok(JobClaim {
            job_id: job_id.to_string(),
            claims: self.claims.clone(),
        })
    }

    fn job_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = fs::read_dir(&self.jobs_dir)?
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_valid_job_id(name))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Jobs left queued or running by a previous process can never finish; fail them
    pub fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;

        for job_id in self.job_ids()? {
            let job = match self.read(&job_id) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Skipping unreadable job {}: {}", job_id, e);
                    continue;
                }
            };

            if !job.status.is_terminal() {
                self.fail(&job_id, &JobError::Interrupted)?;
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!("Marked {} interrupted job(s) as failed", recovered);
        }
        Ok(recovered)
    }

    /// Remove workspaces of finished jobs last updated more than `retention` ago
    pub fn prune_finished(&self, retention: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut pruned = 0;

        for job_id in self.job_ids()? {
            let paths = self.paths(&job_id);
            let Ok(job) = self.read(&job_id) else {
                continue;
            };
            if !job.status.is_terminal() {
                continue;
            }

            let age = fs::metadata(paths.record())
                .and_then(|meta| meta.modified())
                .ok()
                .map(|modified| now.duration_since(modified).unwrap_or(Duration::ZERO));

            if age.is_some_and(|age| age >= retention) {
                if fs::remove_dir_all(paths.root()).is_ok() {
                    info!("Pruned old job workspace: {}", job_id);
                    pruned += 1;
                }
            }
        }

        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::JobStatus;

    fn store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_job_lays_out_workspace() {
        let (_dir, store) = store();
        let job = store.create_job().unwrap();
        let paths = store.paths(&job.job_id);

        assert_eq!(job.status, JobStatus::Queued);
        assert!(paths.record().is_file());
        assert!(paths.input_dir().is_dir());
        assert!(paths.dataset_dir().is_dir());
        assert!(paths.output_dir().is_dir());
        assert_eq!(store.read(&job.job_id).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn test_ids_are_unique_across_threads() {
        let (_dir, store) = store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..10)
                        .map(|_| store.create_job().unwrap().job_id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: HashSet<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 80);
    }

    #[test]
    fn test_unknown_and_malformed_ids_are_not_found() {
        let (_dir, store) = store();
        let unknown = uuid::Uuid::new_v4().simple().to_string();
        assert!(matches!(store.read(&unknown), Err(JobError::JobNotFound(_))));
        assert!(matches!(store.read("../../etc/passwd"), Err(JobError::JobNotFound(_))));
        assert!(matches!(
            store.update(&unknown, |_| Ok(())),
            Err(JobError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_fail_persists_error() {
        let (_dir, store) = store();
        let job = store.create_job().unwrap();
        store.fail(&job.job_id, &JobError::NoImagesFound).unwrap();

        let job = store.read(&job.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_kind, Some(ErrorKind::NoImagesFound));
        assert!(job.error.unwrap().contains("no images found"));
    }

    #[test]
    fn test_terminal_job_is_not_overwritten() {
        let (_dir, store) = store();
        let job = store.create_job().unwrap();
        store.fail(&job.job_id, &JobError::NoImagesFound).unwrap();

        assert!(store.update(&job.job_id, |job| job.mark_running()).is_err());
        assert_eq!(store.read(&job.job_id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let (_dir, store) = store();
        let job = store.create_job().unwrap();

        let claim = store.claim(&job.job_id).unwrap();
        assert_eq!(claim.job_id(), job.job_id);
        assert!(matches!(store.claim(&job.job_id), Err(JobError::JobBusy(_))));

        drop(claim);
        assert!(store.claim(&job.job_id).is_ok());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = {
            let store = JobStore::open(dir.path()).unwrap();
            let job = store.create_job().unwrap();
            store.update(&job.job_id, |job| job.mark_running()).unwrap();
            store
                .update(&job.job_id, |job| job.mark_done("/x/splat.ply".to_string()))
                .unwrap();
            job.job_id
        };

        let reopened = JobStore::open(dir.path()).unwrap();
        let job = reopened.read(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
    }

    #[test]
    fn test_recover_interrupted() {
        let (_dir, store) = store();
        let queued = store.create_job().unwrap();
        let running = store.create_job().unwrap();
        store.update(&running.job_id, |job| job.mark_running()).unwrap();
        let failed = store.create_job().unwrap();
        store.fail(&failed.job_id, &JobError::NoImagesFound).unwrap();

        assert_eq!(store.recover_interrupted().unwrap(), 2);

        for id in [&queued.job_id, &running.job_id] {
            let job = store.read(id).unwrap();
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.error_kind, Some(ErrorKind::Interrupted));
        }
        let untouched = store.read(&failed.job_id).unwrap();
        assert_eq!(untouched.error_kind, Some(ErrorKind::NoImagesFound));
    }

    #[test]
    fn test_prune_only_removes_finished_jobs() {
        let (_dir, store) = store();
        let finished = store.create_job().unwrap();
        store.fail(&finished.job_id, &JobError::NoImagesFound).unwrap();
        let pending = store.create_job().unwrap();

        assert_eq!(store.prune_finished(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(store.prune_finished(Duration::ZERO).unwrap(), 1);
        assert!(!store.paths(&finished.job_id).root().exists());
        assert!(store.paths(&pending.job_id).root().exists());
    }
}
