use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::db::TaskStatus;
use crate::pipeline::error::{ErrorPayload, ErrorType, JobError};
use crate::pipeline::JobEngine;

use super::job::{parse_payload, Job, JobResult};
use super::queue::JobQueue;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Result of one pop-and-execute cycle.
#[derive(Debug)]
pub enum PollOutcome {
    /// The pop timed out with no job.
    Idle,
    Processed(JobResult),
    /// The payload could not be decoded and was discarded.
    Dropped,
    /// The queue was unreachable; the consumer paused before returning.
    QueueUnavailable,
}

/// Single-job-at-a-time loop: pop, execute, repeat.
pub struct QueueConsumer {
    worker_id: u32,
    queue: Arc<dyn JobQueue>,
    engine: Arc<JobEngine>,
    shutdown: Arc<AtomicBool>,
    poll_timeout: Duration,
    reconnect_delay: Duration,
}

impl QueueConsumer {
    pub fn new(worker_id: u32, queue: Arc<dyn JobQueue>, engine: Arc<JobEngine>) -> Self {
        Self {
            worker_id,
            queue,
            engine,
            shutdown: Arc::new(AtomicBool::new(false)),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Flag observed between pops. Setting it lets an in-flight job finish.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        info!(worker_id = self.worker_id, "Shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub async fn run(&self) {
        let span = info_span!("worker", worker_id = self.worker_id);
        async {
            info!("Worker started");
            while !self.is_shutdown() {
                self.run_once().await;
            }
            info!("Worker stopped");
        }
        .instrument(span)
        .await
    }

    pub async fn run_once(&self) -> PollOutcome {
        match self.queue.pop(self.poll_timeout).await {
            Ok(None) => PollOutcome::Idle,
            Ok(Some(raw)) => self.handle_payload(&raw).await,
            Err(e) => {
                error!(error = %e, delay_secs = self.reconnect_delay.as_secs(), "Queue unavailable, pausing before retry");
                tokio::time::sleep(self.reconnect_delay).await;
                PollOutcome::QueueUnavailable
            }
        }
    }

    async fn handle_payload(&self, raw: &str) -> PollOutcome {
        let job = match parse_payload(raw) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, task_id = ?e.task_id, "Dropping malformed payload");
                if let Some(task_id) = e.task_id {
                    let err = JobError::new(ErrorType::ValidationError, e.to_string());
                    self.mark_failed(task_id, &ErrorPayload::from_error(&err, 0));
                }
                return PollOutcome::Dropped;
            }
        };

        info!(job_id = job.job_id, "Job received");
        let result = self.execute_guarded(&job).await;
        if result.success {
            info!(job_id = job.job_id, artifact = ?result.artifact_name, "Job completed");
        } else {
            warn!(job_id = job.job_id, error_type = ?result.error_type, "Job failed");
        }
        PollOutcome::Processed(result)
    }

    /// Runs the engine, turning a panic into a `WORKER_CRASH` failure.
    async fn execute_guarded(&self, job: &Job) -> JobResult {
        match AssertUnwindSafe(self.engine.execute_job(job))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let err = JobError::new(
                    ErrorType::WorkerCrash,
                    format!("Worker crashed: {}", panic_message(panic.as_ref())),
                );
                error!(job_id = job.job_id, error = %err.message, "Job execution panicked");
                let payload = ErrorPayload::from_error(&err, 0);
                self.mark_failed(job.job_id, &payload);
                JobResult::failure(job, &err, Some(payload))
            }
        }
    }

    fn mark_failed(&self, task_id: i64, payload: &ErrorPayload) {
        match self
            .engine
            .store()
            .set_status(task_id, TaskStatus::Failed, Some(payload))
        {
            Ok(()) => debug!(task_id, "Task marked failed"),
            Err(e) => error!(
                task_id,
                error_type = %ErrorType::StoreError,
                error = %e,
                "Failed to mark task failed"
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(boxed.as_ref()), "owned boom");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
