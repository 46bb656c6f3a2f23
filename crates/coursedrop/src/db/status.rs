//! Download task status values as stored in `download_tasks.status`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, awaiting payment confirmation.
    Pending,
    /// Legacy alias of `Pending` still written by older backends.
    Paid,
    /// Enrollment in progress upstream.
    Processing,
    /// Ready for download.
    Enrolled,
    Downloading,
    Uploading,
    Completed,
    Failed,
    /// No row exists for the task id.
    NotFound,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Paid => "paid",
            TaskStatus::Processing => "processing",
            TaskStatus::Enrolled => "enrolled",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::NotFound => "not_found",
        }
    }

    /// Parses a stored status. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "paid" => Some(TaskStatus::Paid),
            "processing" => Some(TaskStatus::Processing),
            "enrolled" => Some(TaskStatus::Enrolled),
            "downloading" => Some(TaskStatus::Downloading),
            "uploading" => Some(TaskStatus::Uploading),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "not_found" => Some(TaskStatus::NotFound),
            _ => None,
        }
    }

    /// States that are resolved upstream before the worker may start.
    pub fn is_awaiting_precondition(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Paid | TaskStatus::Processing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::NotFound
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
