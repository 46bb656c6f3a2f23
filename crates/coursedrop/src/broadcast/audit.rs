//! Per-job audit trail delivered to the orchestrating backend.
//!
//! Entries are advisory: the engine logs a failed delivery and moves on.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Identifies this worker implementation in the backend's log tables.
pub const AUDIT_SOURCE: &str = "rust_worker";

const AUDIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    Download,
    Upload,
    Enrollment,
    System,
}

/// Milestones the backend tracks separately from the step log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleKind {
    DownloadSuccess,
    DownloadError,
    UploadSuccess,
    UploadError,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::DownloadSuccess => "DOWNLOAD_SUCCESS",
            LifecycleKind::DownloadError => "DOWNLOAD_ERROR",
            LifecycleKind::UploadSuccess => "UPLOAD_SUCCESS",
            LifecycleKind::UploadError => "UPLOAD_ERROR",
        }
    }
}

/// One step-log entry for a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    #[serde(skip)]
    pub task_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    pub level: AuditLevel,
    pub category: AuditCategory,
    pub message: String,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    pub source: &'static str,
}

impl AuditEntry {
    pub fn new(
        task_id: i64,
        order_id: Option<i64>,
        level: AuditLevel,
        category: AuditCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            order_id,
            level,
            category,
            message: message.into(),
            details: Value::Object(Default::default()),
            progress: None,
            current_file: None,
            source: AUDIT_SOURCE,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_progress(mut self, percent: u8) -> Self {
        self.progress = Some(percent.min(100));
        self
    }
}

/// A lifecycle milestone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub event_type: LifecycleKind,
    pub message: String,
    pub meta: Value,
    pub timestamp: String,
    pub source: &'static str,
}

impl LifecycleEvent {
    pub fn new(task_id: i64, kind: LifecycleKind, detail: &str, mut meta: Value) -> Self {
        if let Value::Object(map) = &mut meta {
            map.insert("taskId".to_string(), Value::from(task_id));
        }
        Self {
            event_type: kind,
            message: format!("[{}] [TaskId: {}] {}", kind.as_str(), task_id, detail),
            meta,
            timestamp: chrono::Utc::now().to_rfc3339(),
            source: AUDIT_SOURCE,
        }
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit request failed: {0}")]
    Request(String),

    #[error("Audit endpoint returned HTTP {0}")]
    Status(u16),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError>;
    async fn lifecycle(&self, event: &LifecycleEvent) -> Result<(), AuditError>;
}

/// Drops every entry.
pub struct NoopAudit;

#[async_trait]
impl AuditSink for NoopAudit {
    async fn record(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
        Ok(())
    }

    async fn lifecycle(&self, _event: &LifecycleEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Posts entries to the backend's internal logging API.
pub struct HttpAuditLogger {
    client: reqwest::Client,
    base_url: String,
    debug_enabled: bool,
}

impl HttpAuditLogger {
    pub fn new(base_url: &str, debug_enabled: bool) -> Result<Self, AuditError> {
        let client = reqwest::Client::builder()
            .timeout(AUDIT_TIMEOUT)
            .build()
            .map_err(|e| AuditError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            debug_enabled,
        })
    }

    fn task_log_url(&self, task_id: i64) -> String {
        format!("{}/api/v1/internal/tasks/{}/logs", self.base_url, task_id)
    }

    fn lifecycle_url(&self) -> String {
        format!("{}/api/v1/internal/lifecycle-log", self.base_url)
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<(), AuditError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AuditError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuditError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for HttpAuditLogger {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        if entry.level == AuditLevel::Debug && !self.debug_enabled {
            return Ok(());
        }
        self.post(&self.task_log_url(entry.task_id), entry).await
    }

    async fn lifecycle(&self, event: &LifecycleEvent) -> Result<(), AuditError> {
        self.post(&self.lifecycle_url(), event).await
    }
}
