//! The state store seam used by the job engine.

use super::task_repo::{self, OrderSummary};
use super::{Database, DatabaseError, TaskStatus};
use crate::pipeline::ErrorPayload;

/// Durable job status, shared with the orchestrating backend.
///
/// Implementations must be safe to call from any worker; writes are
/// last-writer-wins.
pub trait JobStateStore: Send + Sync {
    /// Current status. A missing row is reported as `NotFound`.
    fn get_status(&self, job_id: i64) -> Result<TaskStatus, DatabaseError>;

    /// Unconditionally sets the status, recording `error` when given.
    fn set_status(
        &self,
        job_id: i64,
        status: TaskStatus,
        error: Option<&ErrorPayload>,
    ) -> Result<(), DatabaseError>;

    /// Sets `to` only when the current status is one of `from`.
    fn transition(
        &self,
        job_id: i64,
        from: &[TaskStatus],
        to: TaskStatus,
        error: Option<&ErrorPayload>,
    ) -> Result<bool, DatabaseError>;

    fn order_summary(&self, order_id: i64) -> Result<OrderSummary, DatabaseError>;
}

/// `JobStateStore` backed by the `download_tasks` table.
#[derive(Clone)]
pub struct DatabaseStateStore {
    db: Database,
}

impl DatabaseStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn encode(error: Option<&ErrorPayload>) -> Result<Option<String>, DatabaseError> {
    Ok(match error {
        Some(payload) => Some(serde_json::to_string(payload)?),
        None => None,
    })
}

impl JobStateStore for DatabaseStateStore {
    fn get_status(&self, job_id: i64) -> Result<TaskStatus, DatabaseError> {
        match task_repo::find_status(&self.db, job_id)? {
            None => Ok(TaskStatus::NotFound),
            Some(raw) => TaskStatus::parse(&raw).ok_or(DatabaseError::UnknownStatus {
                task_id: job_id,
                status: raw,
            }),
        }
    }

    fn set_status(
        &self,
        job_id: i64,
        status: TaskStatus,
        error: Option<&ErrorPayload>,
    ) -> Result<(), DatabaseError> {
        let error_log = encode(error)?;
        let changed = task_repo::update_status(
            &self.db,
            job_id,
            status.as_str(),
            error_log.as_deref(),
            &task_repo::now_timestamp(),
        )?;
        if changed == 0 {
            log::warn!("Status update to '{}' matched no task {}", status, job_id);
        }
        Ok(())
    }

    fn transition(
        &self,
        job_id: i64,
        from: &[TaskStatus],
        to: TaskStatus,
        error: Option<&ErrorPayload>,
    ) -> Result<bool, DatabaseError> {
        let error_log = encode(error)?;
        let from: Vec<&str> = from.iter().map(TaskStatus::as_str).collect();
        task_repo::transition(
            &self.db,
            job_id,
            &from,
            to.as_str(),
            error_log.as_deref(),
            &task_repo::now_timestamp(),
        )
    }

    fn order_summary(&self, order_id: i64) -> Result<OrderSummary, DatabaseError> {
        task_repo::order_summary(&self.db, order_id)
    }
}
