//! Engine test harness with isolated storage.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::broadcast::Receiver;

use coursedrop::broadcast::{JobEvent, JobProgressBroadcaster, OrderComplete, ProgressRecord, StatusChange};
use coursedrop::db::task_repo::{self, TaskRow};
use coursedrop::pipeline::Sandbox;
use coursedrop::{Database, DatabaseStateStore, EngineConfig, ErrorPayload, Job, JobEngine, TaskStatus};

use super::fakes::{RecordingNotifier, ScriptedFetcher, ScriptedUploader};

pub const CONTENT_DOMAIN: &str = "platform.example.com";

/// Owns the temp directories and store an engine runs against.
pub struct EngineHarness {
    pub temp: TempDir,
    pub store: Arc<DatabaseStateStore>,
    pub config: EngineConfig,
    pub events: JobProgressBroadcaster,
}

impl EngineHarness {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config = EngineConfig::new(
            temp.path().join("staging"),
            temp.path().join("logs"),
            CONTENT_DOMAIN,
        );
        std::fs::create_dir_all(&config.staging_dir).expect("Failed to create staging dir");
        std::fs::create_dir_all(&config.logs_dir).expect("Failed to create logs dir");

        let db = Database::open_in_memory().expect("Failed to open store");
        Self {
            temp,
            store: Arc::new(DatabaseStateStore::new(db)),
            config,
            events: JobProgressBroadcaster::default(),
        }
    }

    pub fn database(&self) -> &Database {
        self.store.database()
    }

    /// Inserts a task row and returns the matching job.
    pub fn add_task(&self, id: i64, order_id: Option<i64>, status: TaskStatus) -> Job {
        let now = task_repo::now_timestamp();
        let row = TaskRow {
            id,
            order_id,
            email: format!("student{}@example.com", id),
            course_url: format!("https://{}/course/demo-{}/", CONTENT_DOMAIN, id),
            status: status.as_str().to_string(),
            error_log: None,
            created_at: now.clone(),
            updated_at: now,
        };
        task_repo::insert(self.database(), &row).expect("Failed to insert task");
        Job {
            job_id: row.id,
            user_email: row.email,
            source_url: row.course_url,
            parent_order_id: row.order_id,
        }
    }

    pub fn set_status(&self, id: i64, status: TaskStatus) {
        task_repo::update_status(
            self.database(),
            id,
            status.as_str(),
            None,
            &task_repo::now_timestamp(),
        )
        .expect("Failed to update task");
    }

    pub fn status_of(&self, id: i64) -> String {
        task_repo::find_status(self.database(), id)
            .expect("Failed to read task")
            .expect("Task missing")
    }

    pub fn error_log_of(&self, id: i64) -> ErrorPayload {
        let row = task_repo::find_by_id(self.database(), id)
            .expect("Failed to read task")
            .expect("Task missing");
        let raw = row.error_log.expect("No error log recorded");
        serde_json::from_str(&raw).expect("Error log is not an ErrorPayload")
    }

    pub fn sandbox_path(&self, id: i64) -> PathBuf {
        Sandbox::path_for(&self.config.staging_dir, id)
    }

    pub fn engine(
        &self,
        fetcher: Arc<ScriptedFetcher>,
        uploader: Arc<ScriptedUploader>,
        notifier: Arc<RecordingNotifier>,
    ) -> JobEngine {
        JobEngine::new(
            Arc::new(self.config.clone()),
            self.store.clone(),
            fetcher,
            uploader,
            notifier,
        )
        .with_progress(Arc::new(self.events.clone()))
    }

    pub fn subscribe(&self) -> Receiver<JobEvent> {
        self.events.subscribe()
    }
}

impl Default for EngineHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything published so far, split by kind.
#[derive(Debug, Default)]
pub struct Captured {
    pub progress: Vec<ProgressRecord>,
    pub status: Vec<StatusChange>,
    pub order_complete: Vec<OrderComplete>,
}

impl Captured {
    pub fn drain(rx: &mut Receiver<JobEvent>) -> Self {
        let mut captured = Self::default();
        while let Ok(event) = rx.try_recv() {
            match event {
                JobEvent::Progress(p) => captured.progress.push(p),
                JobEvent::Status(s) => captured.status.push(s),
                JobEvent::OrderComplete(o) => captured.order_complete.push(o),
            }
        }
        captured
    }

    pub fn statuses(&self) -> Vec<TaskStatus> {
        self.status.iter().map(|s| s.new_status).collect()
    }
}
