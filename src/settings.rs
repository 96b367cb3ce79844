use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Root of the queue directory (lock, version, serial, drain, archive/).
    pub dir: PathBuf,
    /// Submissions are rejected once this many live jobs exist.
    #[serde(default = "default_size_hard_limit")]
    pub size_hard_limit: usize,
    /// Capacity warnings start at this live-job count; 80% of the hard
    /// limit when unset.
    pub size_soft_limit: Option<usize>,
    /// Jobs executed concurrently by the scheduler.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Upper bound on the scheduler's idle poll backoff.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_size_hard_limit() -> usize {
    5000
}

fn default_workers() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl QueueConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            size_hard_limit: default_size_hard_limit(),
            size_soft_limit: None,
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    pub fn soft_limit(&self) -> usize {
        self.size_soft_limit
            .unwrap_or(self.size_hard_limit * 4 / 5)
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let default = Self {
            log: LogConfig::default(),
            queue: QueueConfig::new("/var/lib/granary/queue"),
        };

        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(default),
        }
    }
}
