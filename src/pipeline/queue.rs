// Bounded job queue feeding a fixed pool of pipeline workers

use super::executor::PipelineExecutor;
use crate::error::{JobError, Result};
use crate::models::Job;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Mutex};

#[derive(Debug)]
pub struct PipelineRequest {
    pub job_id: String,
    pub image_dir: PathBuf,
    /// Receives the terminal job snapshot, for callers that wait
    pub done: Option<oneshot::Sender<Job>>,
}

#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<PipelineRequest>,
}

impl JobQueue {
    /// Spawn `workers` tasks sharing one queue of `capacity` pending jobs
    pub fn start(executor: Arc<PipelineExecutor>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        for worker_id in 0..workers.max(1) {
            tokio::spawn(worker_loop(worker_id, receiver.clone(), executor.clone()));
        }
        info!("Started {} pipeline worker(s), queue capacity {}", workers.max(1), capacity);

        Self { sender }
    }

    /// Enqueue without waiting; a full queue is reported as `QueueFull`
    pub fn submit(&self, request: PipelineRequest) -> Result<()> {
        self.sender.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => JobError::QueueFull,
            TrySendError::Closed(_) => {
                JobError::Io(std::io::Error::other("pipeline workers have stopped"))
            }
        })
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<PipelineRequest>>>,
    executor: Arc<PipelineExecutor>,
) {
    loop {
        let request = receiver.lock().await.recv().await;
        let Some(request) = request else {
            break;
        };

        info!("Worker {} picked up job {}", worker_id, request.job_id);
        match executor.execute(&request.job_id, &request.image_dir).await {
            Ok(job) => {
                if let Some(done) = request.done {
                    let _ = done.send(job);
                }
            }
            Err(JobError::JobBusy(job_id)) => {
                warn!("Worker {} skipped job {}: already being processed", worker_id, job_id);
            }
            Err(e) => {
                error!("Worker {} could not run job {}: {}", worker_id, request.job_id, e);
                match executor.store().fail(&request.job_id, &e) {
                    Ok(job) => {
                        if let Some(done) = request.done {
                            let _ = done.send(job);
                        }
                    }
                    Err(persist_err) => error!(
                        "Worker {} could not mark job {} failed: {}",
                        worker_id, request.job_id, persist_err
                    ),
                }
            }
        }
    }

    info!("Worker {} stopped", worker_id);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::jobs::JobStore;
    use crate::models::{JobStatus, Settings, StageCommands};
    use crate::process_manager::CommandTemplate;
    use std::fs;

    fn executor(dir: &std::path::Path, train: &str) -> Arc<PipelineExecutor> {
        let ok = CommandTemplate::from_tokens(&["sh", "-c", "true"]);
        let settings = Settings {
            data_dir: dir.to_path_buf(),
            commands: StageCommands {
                prepare: ok.clone(),
                train: CommandTemplate::from_tokens(&["sh", "-c", train, "train", "{output}"]),
                export: CommandTemplate::from_tokens(&[
                    "sh",
                    "-c",
                    "printf ply > \"$1/splat.ply\"",
                    "export",
                    "{output}",
                ]),
            },
            ..Settings::default()
        };
        let store = Arc::new(JobStore::open(settings.jobs_dir()).unwrap());
        Arc::new(PipelineExecutor::new(store, Arc::new(settings)))
    }

    fn queued_job(executor: &PipelineExecutor) -> (String, PathBuf) {
        let job = executor.store().create_job().unwrap();
        let image_dir = executor.store().paths(&job.job_id).input_dir();
        fs::write(image_dir.join("a.jpg"), b"x").unwrap();
        (job.job_id, image_dir)
    }

    #[tokio::test]
    async fn test_waiter_receives_terminal_job() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path(), "mkdir -p \"$1/run\" && touch \"$1/run/config.yml\"");
        let queue = JobQueue::start(executor.clone(), 2, 4);

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let (job_id, image_dir) = queued_job(&executor);
            let (done, waiter) = oneshot::channel();
            queue
                .submit(PipelineRequest {
                    job_id,
                    image_dir,
                    done: Some(done),
                })
                .unwrap();
            waiters.push(waiter);
        }

        for waiter in waiters {
            let job = waiter.await.unwrap();
            assert_eq!(job.status, JobStatus::Done);
        }
    }

    #[tokio::test]
    async fn test_job_that_cannot_start_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path(), "true");
        let queue = JobQueue::start(executor.clone(), 1, 4);

        // already running, so the executor refuses to start it again
        let (job_id, image_dir) = queued_job(&executor);
        executor.store().update(&job_id, |job| job.mark_running()).unwrap();

        let (done, waiter) = oneshot::channel();
        queue
            .submit(PipelineRequest {
                job_id: job_id.clone(),
                image_dir,
                done: Some(done),
            })
            .unwrap();

        let job = waiter.await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(executor.store().read(&job_id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_full_queue_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path(), "sleep 2");
        let queue = JobQueue::start(executor.clone(), 1, 1);

        // one job occupies the worker, one fills the queue; keep going until rejected
        let mut rejected = false;
        for _ in 0..4 {
            let (job_id, image_dir) = queued_job(&executor);
            let request = PipelineRequest {
                job_id,
                image_dir,
                done: None,
            };
            if let Err(e) = queue.submit(request) {
                assert!(matches!(e, JobError::QueueFull));
                rejected = true;
                break;
            }
        }
        assert!(rejected);
    }
}
