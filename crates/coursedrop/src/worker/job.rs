use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::pipeline::context::JobState;
use crate::pipeline::error::{ErrorPayload, ErrorType, JobError};

/// One course download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_id: i64,
    pub user_email: String,
    pub source_url: String,
    /// Groups tasks for aggregate progress and completion events.
    pub parent_order_id: Option<i64>,
}

/// Queue message as pushed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePayload {
    pub task_id: i64,
    pub email: String,
    pub course_url: String,
    #[serde(default)]
    pub order_id: Option<i64>,
}

impl From<QueuePayload> for Job {
    fn from(payload: QueuePayload) -> Self {
        Self {
            job_id: payload.task_id,
            user_email: payload.email,
            source_url: payload.course_url,
            parent_order_id: payload.order_id,
        }
    }
}

#[derive(Error, Debug)]
#[error("Malformed queue payload: {reason}")]
pub struct PayloadError {
    /// Task id, when the payload was JSON with a usable `taskId`.
    pub task_id: Option<i64>,
    pub reason: String,
}

/// Decodes a raw queue message.
pub fn parse_payload(raw: &str) -> Result<Job, PayloadError> {
    match serde_json::from_str::<QueuePayload>(raw) {
        Ok(payload) => Ok(payload.into()),
        Err(e) => {
            let task_id = serde_json::from_str::<Value>(raw)
                .ok()
                .and_then(|v| v.get("taskId").and_then(Value::as_i64));
            Err(PayloadError {
                task_id,
                reason: e.to_string(),
            })
        }
    }
}

/// Outcome of one `execute_job` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub success: bool,
    pub job_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorPayload>,
    /// Whether the sandbox was left on disk.
    pub sandbox_kept: bool,
    /// Where the engine left the job; `None` when it never got to finish.
    #[serde(skip)]
    pub final_state: Option<JobState>,
}

impl JobResult {
    pub fn success(job: &Job, artifact_name: String, sandbox_kept: bool) -> Self {
        Self {
            success: true,
            job_id: job.job_id,
            artifact_name: Some(artifact_name),
            error: None,
            error_type: None,
            error_details: None,
            sandbox_kept,
            final_state: None,
        }
    }

    pub fn failure(job: &Job, error: &JobError, details: Option<ErrorPayload>) -> Self {
        Self {
            success: false,
            job_id: job.job_id,
            artifact_name: None,
            error: Some(error.message.clone()),
            error_type: Some(error.error_type),
            error_details: details,
            sandbox_kept: false,
            final_state: None,
        }
    }

    pub fn with_sandbox_kept(mut self, kept: bool) -> Self {
        self.sandbox_kept = kept;
        self
    }
}
