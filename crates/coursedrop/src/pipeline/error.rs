use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification attached to every job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    ValidationError,
    PreconditionTimeout,
    PreconditionFailed,
    ProcessError,
    TimeoutError,
    UploadError,
    NotifyError,
    StoreError,
    AuditError,
    /// The job directory could not be created (disk or permissions).
    SandboxNotCreated,
    /// The fetcher exited cleanly but produced no course directory
    /// (usually expired credentials or an unavailable course).
    SandboxEmpty,
    WorkerCrash,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ValidationError => "VALIDATION_ERROR",
            ErrorType::PreconditionTimeout => "PRECONDITION_TIMEOUT",
            ErrorType::PreconditionFailed => "PRECONDITION_FAILED",
            ErrorType::ProcessError => "PROCESS_ERROR",
            ErrorType::TimeoutError => "TIMEOUT_ERROR",
            ErrorType::UploadError => "UPLOAD_ERROR",
            ErrorType::NotifyError => "NOTIFY_ERROR",
            ErrorType::StoreError => "STORE_ERROR",
            ErrorType::AuditError => "AUDIT_ERROR",
            ErrorType::SandboxNotCreated => "SANDBOX_NOT_CREATED",
            ErrorType::SandboxEmpty => "SANDBOX_EMPTY",
            ErrorType::WorkerCrash => "WORKER_CRASH",
        }
    }

    /// Whether a failure of this kind consumes an attempt and is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorType::ProcessError
                | ErrorType::TimeoutError
                | ErrorType::UploadError
                | ErrorType::SandboxEmpty
        )
    }

    /// Operator hint stored alongside the failure.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ErrorType::SandboxNotCreated => {
                Some("Check disk space and permissions on the staging directory")
            }
            ErrorType::SandboxEmpty => {
                Some("Fetcher produced no files; check credentials and course availability")
            }
            ErrorType::TimeoutError => Some("Download exceeded the configured timeout"),
            ErrorType::UploadError => Some("Check the rclone remote configuration"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure inside the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error_type}: {message}")]
pub struct JobError {
    pub error_type: ErrorType,
    pub message: String,
    /// Exit code of the fetcher or uploader, when one was observed.
    pub exit_code: Option<i32>,
}

impl JobError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }
}

/// Structured failure record persisted in `download_tasks.error_log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error_type: ErrorType,
    pub message: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_path: Option<String>,
    #[serde(default)]
    pub sandbox_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub timestamp: String,
}

impl ErrorPayload {
    pub fn new(error_type: ErrorType, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            error_type,
            message: message.into(),
            attempts,
            sandbox_path: None,
            sandbox_exists: false,
            exit_code: None,
            hint: error_type.hint().map(str::to_string),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn from_error(error: &JobError, attempts: u32) -> Self {
        let mut payload = Self::new(error.error_type, error.message.clone(), attempts);
        payload.exit_code = error.exit_code;
        payload
    }

    pub fn with_sandbox(mut self, path: &std::path::Path, exists: bool) -> Self {
        self.sandbox_path = Some(path.display().to_string());
        self.sandbox_exists = exists;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_wire_names() {
        let json = serde_json::to_string(&ErrorType::SandboxNotCreated).unwrap();
        assert_eq!(json, "\"SANDBOX_NOT_CREATED\"");
        assert_eq!(ErrorType::PreconditionTimeout.as_str(), "PRECONDITION_TIMEOUT");
        assert_eq!(ErrorType::WorkerCrash.to_string(), "WORKER_CRASH");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorType::ProcessError.is_retryable());
        assert!(ErrorType::UploadError.is_retryable());
        assert!(!ErrorType::ValidationError.is_retryable());
        assert!(!ErrorType::PreconditionFailed.is_retryable());
        assert!(!ErrorType::NotifyError.is_retryable());
    }

    #[test]
    fn test_payload_serializes_camel_case() {
        let err = JobError::new(ErrorType::ProcessError, "exit code 2").with_exit_code(Some(2));
        let payload = ErrorPayload::from_error(&err, 3)
            .with_sandbox(std::path::Path::new("/staging/Task_1"), true);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["errorType"], "PROCESS_ERROR");
        assert_eq!(value["attempts"], 3);
        assert_eq!(value["exitCode"], 2);
        assert_eq!(value["sandboxPath"], "/staging/Task_1");
        assert_eq!(value["sandboxExists"], true);
        assert!(value.get("hint").is_none());
    }

    #[test]
    fn test_payload_carries_hint() {
        let payload = ErrorPayload::new(ErrorType::SandboxEmpty, "no course directory", 3);
        assert!(payload.hint.unwrap().contains("credentials"));
    }

    #[test]
    fn test_job_error_display() {
        let err = JobError::new(ErrorType::UploadError, "rclone exited with 1");
        assert_eq!(err.to_string(), "UPLOAD_ERROR: rclone exited with 1");
    }
}
