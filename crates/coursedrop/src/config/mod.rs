//! Worker configuration, loaded from the process environment.

pub mod env;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::fetcher::credentials::EnvTokenCredentials;
use crate::pipeline::EngineConfig;
use crate::secrets::{resolve_secret, resolve_secret_optional};
use crate::uploader::RcloneUploader;
use crate::worker::consumer::DEFAULT_POLL_TIMEOUT;
use crate::worker::queue::DEFAULT_QUEUE_KEY;

pub use env::EnvReader;

/// Log output format for the worker binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: u32,

    pub database_path: PathBuf,
    pub redis_url: String,
    pub queue_key: String,
    pub queue_poll_timeout: Duration,

    pub staging_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub content_domain: String,

    pub fetcher_command: String,
    pub fetcher_token: Option<SecretString>,
    /// Variable name under which the fetcher receives its token.
    pub fetcher_token_env: String,
    pub download_timeout: Duration,

    pub rclone_binary: String,
    pub rclone_remote: String,
    pub rclone_dest_path: String,

    pub webhook_url: String,
    pub webhook_secret: SecretString,

    /// Base URL of the audit-log API. Audit logging is off when unset.
    pub backend_url: Option<String>,
    pub debug_logging: bool,

    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub precondition_poll_interval: Duration,
    pub precondition_max_wait: Duration,

    /// Tasks stuck in downloading/uploading longer than this are reset at startup.
    pub stale_task_after: Option<Duration>,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    pub const DEFAULT_STAGING_DIR: &'static str = "./Staging_Download";
    pub const DEFAULT_LOGS_DIR: &'static str = "./logs";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader::new(lookup);

        let worker_id = match env.optional("WORKER_ID") {
            Some(_) => env.parsed_or("WORKER_ID", 1u32)?,
            None => env.parsed_or::<u32>("INSTANCE_ID", 0)?.saturating_add(1),
        };

        let redis_url = env.required("REDIS_URL")?;
        env::parse_url("REDIS_URL", &redis_url, &["redis", "rediss", "unix"])?;

        let webhook_url = env.required("WEBHOOK_URL")?;
        env::parse_url("WEBHOOK_URL", &webhook_url, &["http", "https"])?;

        let backend_url = match env.optional("BACKEND_URL") {
            Some(raw) => {
                env::parse_url("BACKEND_URL", &raw, &["http", "https"])?;
                Some(raw.trim_end_matches('/').to_string())
            }
            None => None,
        };

        let webhook_secret = resolve_secret(
            env.optional("API_SECRET_KEY").as_deref(),
            env.optional("API_SECRET_KEY_FILE").as_deref(),
            None,
        )
        .map_err(ConfigError::MissingSecret)?;

        let fetcher_token = resolve_secret_optional(
            env.optional("FETCHER_TOKEN").as_deref(),
            env.optional("FETCHER_TOKEN_FILE").as_deref(),
            None,
        )
        .map_err(ConfigError::MissingSecret)?;

        let fetcher_command = env.required("FETCHER_COMMAND")?;
        if !fetcher_command.contains("{url}") {
            return Err(ConfigError::InvalidValue {
                name: "FETCHER_COMMAND",
                reason: "must contain the {url} placeholder".to_string(),
            });
        }

        let max_attempts: u32 = env.parsed_or("MAX_ATTEMPTS", EngineConfig::DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        let download_timeout =
            env.secs_or("DOWNLOAD_TIMEOUT_SECS", EngineConfig::DEFAULT_DOWNLOAD_TIMEOUT)?;
        let retry_backoff =
            env.secs_or("RETRY_BACKOFF_SECS", EngineConfig::DEFAULT_RETRY_BACKOFF)?;

        // updated_at only moves when an attempt starts.
        let stale_task_after = match env.parsed_or::<u64>("STALE_TASK_MINUTES", 0)? {
            0 => None,
            minutes => {
                let threshold = Duration::from_secs(minutes.saturating_mul(60));
                let longest_run = download_timeout
                    .saturating_add(retry_backoff)
                    .saturating_mul(max_attempts);
                if threshold < longest_run {
                    return Err(ConfigError::InvalidValue {
                        name: "STALE_TASK_MINUTES",
                        reason: format!(
                            "must be at least {} minutes (MAX_ATTEMPTS x (DOWNLOAD_TIMEOUT_SECS + RETRY_BACKOFF_SECS))",
                            longest_run.as_secs().div_ceil(60)
                        ),
                    });
                }
                Some(threshold)
            }
        };

        Ok(Self {
            worker_id,
            database_path: PathBuf::from(env.required("DATABASE_PATH")?),
            redis_url,
            queue_key: env.string_or("QUEUE_KEY", DEFAULT_QUEUE_KEY),
            queue_poll_timeout: env.secs_or("QUEUE_POLL_TIMEOUT_SECS", DEFAULT_POLL_TIMEOUT)?,
            staging_dir: PathBuf::from(env.string_or("STAGING_DIR", Self::DEFAULT_STAGING_DIR)),
            logs_dir: PathBuf::from(env.string_or("LOGS_DIR", Self::DEFAULT_LOGS_DIR)),
            content_domain: env.required("CONTENT_DOMAIN")?.to_ascii_lowercase(),
            fetcher_command,
            fetcher_token,
            fetcher_token_env: env.string_or("FETCHER_TOKEN_ENV", EnvTokenCredentials::DEFAULT_VAR),
            download_timeout,
            rclone_binary: env.string_or("RCLONE_BINARY", RcloneUploader::DEFAULT_BINARY),
            rclone_remote: env.required("RCLONE_REMOTE")?,
            rclone_dest_path: env.required("RCLONE_DEST_PATH")?,
            webhook_url,
            webhook_secret,
            backend_url,
            debug_logging: env.flag("DEBUG_LOGGING")?,
            max_attempts,
            retry_backoff,
            precondition_poll_interval: env
                .secs_or("PRECONDITION_POLL_SECS", EngineConfig::DEFAULT_POLL_INTERVAL)?,
            precondition_max_wait: env
                .secs_or("PRECONDITION_MAX_WAIT_SECS", EngineConfig::DEFAULT_MAX_WAIT)?,
            stale_task_after,
            log_format: env.parsed_or("LOG_FORMAT", LogFormat::Text)?,
        })
    }

    /// Creates the staging and log directories if missing.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [&self.staging_dir, &self.logs_dir] {
            fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}
