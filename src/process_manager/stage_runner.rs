// External stage process execution
// Spawns one tool invocation, drains both pipes and keeps a bounded tail of each

use super::command_template::RenderedCommand;
use crate::error::{JobError, Result};
use crate::models::Stage;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::path::Path;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Bytes of stdout/stderr kept per stage
pub const OUTPUT_TAIL_BYTES: usize = 6000;

/// Keeps only the last `capacity` bytes pushed into it
#[derive(Debug)]
pub struct TailBuffer {
    capacity: usize,
    bytes: VecDeque<u8>,
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bytes: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let chunk = if chunk.len() > self.capacity {
            &chunk[chunk.len() - self.capacity..]
        } else {
            chunk
        };
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.capacity);
        self.bytes.drain(..overflow);
        self.bytes.extend(chunk);
    }

    /// Lossy UTF-8, starting on a character boundary
    pub fn into_string(self) -> String {
        let bytes: Vec<u8> = self.bytes.into_iter().collect();
        let start = bytes
            .iter()
            .position(|b| (b & 0b1100_0000) != 0b1000_0000)
            .unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[start..]).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// -1 when the process was killed by a signal or by the timeout
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

impl StageOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// How long the pipe readers may keep draining once a timed-out stage is killed
const READER_GRACE: Duration = Duration::from_secs(1);

type SharedTail = Arc<Mutex<TailBuffer>>;

async fn collect_tail<R>(
    mut reader: R,
    tail: SharedTail,
    job_id: String,
    stage: Stage,
    stream: &'static str,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in String::from_utf8_lossy(&chunk[..n]).lines() {
                    if !line.trim().is_empty() {
                        debug!("[{} {} {}] {}", job_id, stage, stream, line.trim_end());
                    }
                }
                tail.lock().push(&chunk[..n]);
            }
            Err(e) => {
                warn!("[{} {}] failed reading {}: {}", job_id, stage, stream, e);
                break;
            }
        }
    }
}

/// Wait for a reader task, giving up after `grace` if one is set; the tail keeps what was read
async fn finish_tail(reader: JoinHandle<()>, tail: &SharedTail, grace: Option<Duration>) -> String {
    match grace {
        Some(grace) => {
            let abort = reader.abort_handle();
            if tokio::time::timeout(grace, reader).await.is_err() {
                abort.abort();
            }
        }
        None => {
            let _ = reader.await;
        }
    }

    std::mem::replace(&mut *tail.lock(), TailBuffer::new(0)).into_string()
}

/// SIGKILL the stage's whole process group, so tools it forked die with it
#[cfg(unix)]
fn kill_process_group(job_id: &str, pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };

    // negative pid addresses the group led by the stage process
    let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if result != 0 {
        debug!(
            "[{}] Process group {} already gone: {}",
            job_id,
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

/// Run one stage to completion (or timeout); a non-zero exit is reported, not raised
pub async fn run_stage(
    job_id: &str,
    stage: Stage,
    command: &RenderedCommand,
    working_dir: &Path,
    timeout: Option<Duration>,
) -> Result<StageOutcome> {
    info!("[{}] Starting stage {}: {}", job_id, stage, command.describe());

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    let mut child = cmd.spawn().map_err(|e| JobError::StageLaunch {
        stage,
        message: format!("failed to spawn {:?}: {}", command.program, e),
    })?;

    let stdout = child.stdout.take().ok_or_else(|| JobError::StageLaunch {
        stage,
        message: "failed to capture stdout".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| JobError::StageLaunch {
        stage,
        message: "failed to capture stderr".to_string(),
    })?;

    let stdout_buf: SharedTail = Arc::new(Mutex::new(TailBuffer::new(OUTPUT_TAIL_BYTES)));
    let stderr_buf: SharedTail = Arc::new(Mutex::new(TailBuffer::new(OUTPUT_TAIL_BYTES)));
    let stdout_reader = tokio::spawn(collect_tail(
        stdout,
        stdout_buf.clone(),
        job_id.to_string(),
        stage,
        "stdout",
    ));
    let stderr_reader = tokio::spawn(collect_tail(
        stderr,
        stderr_buf.clone(),
        job_id.to_string(),
        stage,
        "stderr",
    ));

    let (exit_code, timed_out) = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (status?.code().unwrap_or(-1), false),
            Err(_) => {
                warn!("[{}] Stage {} exceeded {:?}, killing it", job_id, stage, limit);
                #[cfg(unix)]
                kill_process_group(job_id, child.id());
                if let Err(e) = child.kill().await {
                    warn!("[{}] Failed to kill stage {}: {}", job_id, stage, e);
                }
                (-1, true)
            }
        },
        None => (child.wait().await?.code().unwrap_or(-1), false),
    };

    let grace = timed_out.then_some(READER_GRACE);
    let stdout_tail = finish_tail(stdout_reader, &stdout_buf, grace).await;
    let stderr_tail = finish_tail(stderr_reader, &stderr_buf, grace).await;

    info!("[{}] Stage {} exited with code: {}", job_id, stage, exit_code);

    Ok(StageOutcome {
        exit_code,
        timed_out,
        stdout_tail,
        stderr_tail,
    })
}
