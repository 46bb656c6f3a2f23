use tracing::info;

use crate::db::TaskStatus;
use crate::worker::job::{Job, JobResult};

use super::error::JobError;

/// Where a job is in its single pass through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Validated,
    PreconditionChecked,
    Downloading,
    Uploading,
    Notifying,
    /// Completed and the sandbox was removed.
    Cleaned,
    /// Completed but the sandbox was retained (notifier failed).
    Kept,
    Failed,
}

impl JobState {
    /// Legal moves. `Failed` is reachable from everything except the two
    /// completed states.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Cleaned | Kept | Failed, _) => false,
            (_, Failed) => true,
            (Received, Validated) => true,
            (Validated, PreconditionChecked) => true,
            (PreconditionChecked, Downloading) => true,
            // A failed upload re-runs the whole attempt.
            (Downloading, Uploading) | (Uploading, Downloading) => true,
            (Downloading, Downloading) => true,
            (Uploading, Notifying) => true,
            (Notifying, Cleaned | Kept) => true,
            _ => false,
        }
    }
}

pub struct JobContext {
    pub job: Job,
    pub state: JobState,
    /// Attempts started so far (1-based once downloading begins).
    pub attempt: u32,
    pub last_error: Option<JobError>,
    /// Last status this engine wrote or observed in the store.
    pub store_status: Option<TaskStatus>,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            state: JobState::Received,
            attempt: 0,
            last_error: None,
            store_status: None,
        }
    }

    /// Moves to `next`, ignoring illegal moves with a debug log.
    pub fn advance(&mut self, next: JobState) {
        if self.state.can_transition_to(next) {
            self.state = next;
        } else {
            tracing::debug!(from = ?self.state, to = ?next, "Ignoring illegal job state change");
        }
    }

    /// Stamps the state the job ended in onto `result`.
    pub fn finish(&self, mut result: JobResult) -> JobResult {
        info!(
            state = ?self.state,
            success = result.success,
            attempts = self.attempt,
            "Job finished"
        );
        result.final_state = Some(self.state);
        result
    }
}
