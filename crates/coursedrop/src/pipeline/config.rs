use std::path::PathBuf;
use std::time::Duration;

use crate::config::WorkerConfig;

/// Tunables for [`super::JobEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Parent of every job sandbox.
    pub staging_dir: PathBuf,
    /// Directory for per-job fetcher logs.
    pub logs_dir: PathBuf,
    /// Course URLs must point at this host or one of its subdomains.
    pub content_domain: String,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub precondition_poll_interval: Duration,
    pub precondition_max_wait: Duration,
    pub download_timeout: Duration,
}

impl EngineConfig {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(20);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(15);
    pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

    pub fn new(staging_dir: PathBuf, logs_dir: PathBuf, content_domain: &str) -> Self {
        Self {
            staging_dir,
            logs_dir,
            content_domain: content_domain.to_ascii_lowercase(),
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Self::DEFAULT_RETRY_BACKOFF,
            precondition_poll_interval: Self::DEFAULT_POLL_INTERVAL,
            precondition_max_wait: Self::DEFAULT_MAX_WAIT,
            download_timeout: Self::DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }

    pub fn from_worker_config(config: &WorkerConfig) -> Self {
        Self {
            staging_dir: config.staging_dir.clone(),
            logs_dir: config.logs_dir.clone(),
            content_domain: config.content_domain.clone(),
            max_attempts: config.max_attempts,
            retry_backoff: config.retry_backoff,
            precondition_poll_interval: config.precondition_poll_interval,
            precondition_max_wait: config.precondition_max_wait,
            download_timeout: config.download_timeout,
        }
    }

    pub fn job_log_path(&self, job_id: i64) -> PathBuf {
        self.logs_dir.join(format!("task_{}.log", job_id))
    }
}
