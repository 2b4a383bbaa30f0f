// Service settings: defaults, optional JSON file, then environment overrides
use crate::error::{JobError, Result};
use crate::file_manager::read_json_file;
use crate::process_manager::CommandTemplate;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_ITERATIONS: u32 = 30_000;
const DEFAULT_QUEUE_CAPACITY: usize = 16;
const DEFAULT_MAX_UPLOAD_MB: u64 = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCommands {
    pub prepare: CommandTemplate,
    pub train: CommandTemplate,
    pub export: CommandTemplate,
}

impl Default for StageCommands {
    fn default() -> Self {
        Self {
            prepare: CommandTemplate::from_tokens(&[
                "ns-process-data",
                "images",
                "--data",
                "{input}",
                "--output-dir",
                "{output}",
            ]),
            train: CommandTemplate::from_tokens(&[
                "ns-train",
                "splatfacto",
                "--data",
                "{input}",
                "--output-dir",
                "{output}",
                "--max-num-iterations",
                "{iterations}",
                "--viewer.quit-on-train-completion",
                "True",
            ]),
            export: CommandTemplate::from_tokens(&[
                "ns-export",
                "gaussian-splat",
                "--load-config",
                "{config}",
                "--output-dir",
                "{output}",
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub iterations: u32,
    pub public_base_url: Option<String>,
    /// None means one worker per detected GPU (at least one)
    pub workers: Option<usize>,
    pub queue_capacity: usize,
    pub max_upload_bytes: u64,
    pub stage_timeout_secs: Option<u64>,
    pub cors_origins: Vec<String>,
    pub job_retention_days: Option<u64>,
    pub commands: StageCommands,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            bind_addr: String::from("0.0.0.0:8000"),
            iterations: DEFAULT_ITERATIONS,
            public_base_url: None,
            workers: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
            stage_timeout_secs: None,
            cors_origins: vec![
                String::from("http://localhost:3000"),
                String::from("http://127.0.0.1:3000"),
            ],
            job_retention_days: None,
            commands: StageCommands::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|base| base.join("splatbox"))
        .unwrap_or_else(|| PathBuf::from("splatbox-data"))
}

impl Settings {
    /// Build settings from the process environment
    pub fn load() -> Result<Self> {
        let mut settings = match std::env::var("SPLATBOX_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        info!("Loading settings from {:?}", path);
        read_json_file(path)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("SPLATBOX_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup("SPLATBOX_BIND") {
            self.bind_addr = addr;
        }
        if let Some(value) = lookup("SPLATBOX_ITERATIONS") {
            self.iterations = parse_number("SPLATBOX_ITERATIONS", &value)?;
        }
        if let Some(url) = lookup("SPLATBOX_PUBLIC_BASE_URL") {
            let url = url.trim().to_string();
            self.public_base_url = if url.is_empty() { None } else { Some(url) };
        }
        if let Some(value) = lookup("SPLATBOX_WORKERS") {
            self.workers = Some(parse_number("SPLATBOX_WORKERS", &value)?);
        }
        if let Some(value) = lookup("SPLATBOX_QUEUE_CAPACITY") {
            self.queue_capacity = parse_number("SPLATBOX_QUEUE_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("SPLATBOX_MAX_UPLOAD_MB") {
            let mb: u64 = parse_number("SPLATBOX_MAX_UPLOAD_MB", &value)?;
            self.max_upload_bytes = mb
                .checked_mul(1024 * 1024)
                .ok_or_else(|| JobError::config("SPLATBOX_MAX_UPLOAD_MB is too large"))?;
        }
        if let Some(value) = lookup("SPLATBOX_STAGE_TIMEOUT_SECS") {
            self.stage_timeout_secs = Some(parse_number("SPLATBOX_STAGE_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("SPLATBOX_CORS_ORIGINS") {
            self.cors_origins = value
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(value) = lookup("SPLATBOX_JOB_RETENTION_DAYS") {
            self.job_retention_days = Some(parse_number("SPLATBOX_JOB_RETENTION_DAYS", &value)?);
        }
        if let Some(value) = lookup("SPLATBOX_PREPARE_CMD") {
            self.commands.prepare = CommandTemplate::parse(&value)?;
        }
        if let Some(value) = lookup("SPLATBOX_TRAIN_CMD") {
            self.commands.train = CommandTemplate::parse(&value)?;
        }
        if let Some(value) = lookup("SPLATBOX_EXPORT_CMD") {
            self.commands.export = CommandTemplate::parse(&value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| JobError::Config(format!("invalid bind address {:?}: {}", self.bind_addr, e)))?;

        if let Some(base) = &self.public_base_url {
            Url::parse(base)
                .map_err(|e| JobError::Config(format!("invalid public base URL {:?}: {}", base, e)))?;
        }
        if self.workers == Some(0) {
            return Err(JobError::config("workers must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(JobError::config("queue capacity must be at least 1"));
        }
        self.job_retention()?;
        if self.iterations == 0 {
            warn!("Training iterations set to 0");
        }
        Ok(())
    }

    /// Retention window for finished jobs, if pruning is enabled
    pub fn job_retention(&self) -> Result<Option<Duration>> {
        let Some(days) = self.job_retention_days else {
            return Ok(None);
        };
        days.checked_mul(24 * 60 * 60)
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or_else(|| JobError::config("job retention is too long"))
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind_addr.parse().map_err(JobError::config)
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    /// Absolute link when a public base URL is configured, otherwise the path itself
    pub fn link(&self, path: &str) -> String {
        let Some(base) = &self.public_base_url else {
            return path.to_string();
        };

        let mut base = base.clone();
        if !base.ends_with('/') {
            base.push('/');
        }

        Url::parse(&base)
            .and_then(|url| url.join(path.trim_start_matches('/')))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| path.to_string())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| JobError::Config(format!("{} must be a number, got {:?}: {}", key, value, e)))
}
