pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod notifier;
pub mod pipeline;
pub mod sanitize;
pub mod secrets;
pub mod uploader;
pub mod worker;

pub use broadcast::{HttpAuditLogger, JobProgressBroadcaster, RedisProgressPublisher};
pub use config::{LogFormat, WorkerConfig};
pub use db::{Database, DatabaseStateStore, JobStateStore, TaskStatus};
pub use error::{ConfigError, CoursedropError, Result, WorkerError};
pub use fetcher::{ContentFetcher, FetchError, FetchRequest, ProcessFetcher};
pub use notifier::{CompletionNotifier, WebhookNotifier};
pub use pipeline::{EngineConfig, ErrorPayload, ErrorType, JobEngine, JobError};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use uploader::{RcloneUploader, RemoteUploader};
pub use worker::{Job, JobQueue, JobResult, QueueConsumer, RedisJobQueue};
