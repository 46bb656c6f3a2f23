use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coursedrop::broadcast::redis_publisher::COMMAND_TIMEOUT;
use coursedrop::broadcast::{AuditSink, HttpAuditLogger, NoopAudit, RedisProgressPublisher};
use coursedrop::db::task_repo;
use coursedrop::fetcher::{CredentialSource, EnvTokenCredentials, NoCredentials, ProcessFetcher};
use coursedrop::sanitize::redact_url;
use coursedrop::worker::queue;
use coursedrop::{
    ConfigError, CoursedropError, Database, DatabaseStateStore, EngineConfig, JobEngine, LogFormat,
    QueueConsumer, RcloneUploader, RedisJobQueue, WebhookNotifier, WorkerConfig, WorkerError,
};

fn init_tracing(format: LogFormat, debug: bool) {
    // Route `log` records from the store layer into tracing.
    let _ = tracing_log::LogTracer::init();

    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());
    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize tracing: {}", e);
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format, config.debug_logging);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to build async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Worker exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: WorkerConfig) -> Result<(), CoursedropError> {
    info!(
        worker_id = config.worker_id,
        queue = %config.queue_key,
        redis = %redact_url(&config.redis_url),
        "Starting coursedrop worker"
    );
    config.ensure_directories()?;

    let database = Database::open(&config.database_path)?;
    if let Some(max_age) = config.stale_task_after {
        let age = chrono::Duration::from_std(max_age).map_err(|e| ConfigError::InvalidValue {
            name: "STALE_TASK_MINUTES",
            reason: e.to_string(),
        })?;
        let now = chrono::Utc::now();
        let reset = task_repo::reset_stale(
            &database,
            &task_repo::format_timestamp(now - age),
            &task_repo::format_timestamp(now),
        )?;
        if reset > 0 {
            warn!(count = reset, "Reset stale in-flight tasks to enrolled");
        }
    }
    let store = Arc::new(DatabaseStateStore::new(database));

    // BRPOP parks its connection for the whole poll; events use their own.
    let job_queue = Arc::new(RedisJobQueue::new(
        queue::connect(&config.redis_url).await?,
        &config.queue_key,
    ));
    let progress = Arc::new(RedisProgressPublisher::new(
        queue::connect_bounded(&config.redis_url, COMMAND_TIMEOUT).await?,
    ));

    let audit: Arc<dyn AuditSink> = match &config.backend_url {
        Some(url) => Arc::new(
            HttpAuditLogger::new(url, config.debug_logging)
                .map_err(|e| WorkerError::HttpClient(e.to_string()))?,
        ),
        None => {
            info!("BACKEND_URL not set, audit logging disabled");
            Arc::new(NoopAudit)
        }
    };

    let credentials: Arc<dyn CredentialSource> = match &config.fetcher_token {
        Some(token) => Arc::new(EnvTokenCredentials::new(
            config.fetcher_token_env.clone(),
            token.clone(),
        )),
        None => Arc::new(NoCredentials),
    };
    let fetcher = ProcessFetcher::new(&config.fetcher_command, credentials).map_err(|e| {
        ConfigError::InvalidValue {
            name: "FETCHER_COMMAND",
            reason: e.to_string(),
        }
    })?;
    let uploader = RcloneUploader::new(
        &config.rclone_binary,
        &config.rclone_remote,
        &config.rclone_dest_path,
    );
    let notifier = WebhookNotifier::new(&config.webhook_url, config.webhook_secret.clone())
        .map_err(|e| WorkerError::HttpClient(e.to_string()))?;

    let engine = JobEngine::new(
        Arc::new(EngineConfig::from_worker_config(&config)),
        store,
        Arc::new(fetcher),
        Arc::new(uploader),
        Arc::new(notifier),
    )
    .with_progress(progress)
    .with_audit(audit);

    let consumer = QueueConsumer::new(config.worker_id, job_queue, Arc::new(engine))
        .with_poll_timeout(config.queue_poll_timeout);

    let shutdown = consumer.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, finishing current job");
        shutdown.store(true, Ordering::Relaxed);
    })
    .map_err(|e| WorkerError::SignalHandler(e.to_string()))?;

    consumer.run().await;
    info!("Worker shut down cleanly");
    Ok(())
}
