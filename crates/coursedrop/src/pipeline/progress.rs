use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::broadcast::audit::{
    AuditCategory, AuditEntry, AuditLevel, AuditSink, LifecycleEvent, LifecycleKind,
};
use crate::broadcast::job_progress::{
    OrderComplete, ProgressPublisher, ProgressRecord, StatusChange,
};
use crate::db::{OrderSummary, TaskStatus};

use super::error::ErrorType;

/// Upper bound on one event or audit delivery.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Job-scoped front for the event publisher and the audit sink.
///
/// Every method is best-effort; delivery failures are logged and dropped,
/// and no delivery may hold the job for longer than the delivery timeout.
pub struct JobReporter<'a> {
    job_id: i64,
    order_id: Option<i64>,
    publisher: &'a dyn ProgressPublisher,
    audit: &'a dyn AuditSink,
    delivery_timeout: Duration,
}

impl<'a> JobReporter<'a> {
    pub fn new(
        job_id: i64,
        order_id: Option<i64>,
        publisher: &'a dyn ProgressPublisher,
        audit: &'a dyn AuditSink,
    ) -> Self {
        Self {
            job_id,
            order_id,
            publisher,
            audit,
            delivery_timeout: DELIVERY_TIMEOUT,
        }
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Awaits `delivery` up to the delivery timeout. `None` when it stalled.
    async fn bounded<F: Future>(&self, what: &'static str, delivery: F) -> Option<F::Output> {
        match tokio::time::timeout(self.delivery_timeout, delivery).await {
            Ok(output) => Some(output),
            Err(_) => {
                warn!(
                    job_id = self.job_id,
                    event = what,
                    timeout_ms = self.delivery_timeout.as_millis() as u64,
                    "Event delivery stalled, dropping it"
                );
                None
            }
        }
    }

    pub async fn progress(&self, percent: u32, current_file: &str) {
        let record = ProgressRecord::new(self.job_id, self.order_id, percent, current_file);
        self.bounded("progress", self.publisher.publish_progress(&record))
            .await;
    }

    pub async fn status(
        &self,
        new_status: TaskStatus,
        previous: Option<TaskStatus>,
        message: Option<&str>,
    ) {
        let change = StatusChange::new(self.job_id, self.order_id, new_status, previous, message);
        self.bounded("status", self.publisher.publish_status(&change))
            .await;
    }

    pub async fn order_complete(&self, summary: OrderSummary) {
        let Some(order_id) = self.order_id else {
            return;
        };
        let event = OrderComplete {
            order_id,
            total_tasks: summary.total,
            completed_tasks: summary.completed,
            failed_tasks: summary.failed,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.bounded("order_complete", self.publisher.publish_order_complete(&event))
            .await;
    }

    pub async fn log(
        &self,
        level: AuditLevel,
        category: AuditCategory,
        message: &str,
        details: Value,
    ) {
        let entry = AuditEntry::new(self.job_id, self.order_id, level, category, message)
            .with_details(details);
        self.send(entry).await;
    }

    pub async fn log_progress(&self, percent: u32, message: &str) {
        let entry = AuditEntry::new(
            self.job_id,
            self.order_id,
            AuditLevel::Info,
            AuditCategory::Download,
            message,
        )
        .with_progress(percent.min(100) as u8);
        self.send(entry).await;
    }

    async fn send(&self, entry: AuditEntry) {
        if let Some(Err(e)) = self.bounded("audit", self.audit.record(&entry)).await {
            warn!(
                job_id = self.job_id,
                error_type = %ErrorType::AuditError,
                error = %e,
                "Audit entry not delivered"
            );
        }
    }

    pub async fn lifecycle(&self, kind: LifecycleKind, detail: &str, meta: Value) {
        let event = LifecycleEvent::new(self.job_id, kind, detail, meta);
        if let Some(Err(e)) = self.bounded("lifecycle", self.audit.lifecycle(&event)).await {
            warn!(
                job_id = self.job_id,
                error_type = %ErrorType::AuditError,
                error = %e,
                "Lifecycle event not delivered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::audit::{AuditError, NoopAudit};
    use crate::broadcast::job_progress::{JobEvent, JobProgressBroadcaster};
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingAudit;

    #[async_trait]
    impl AuditSink for FailingAudit {
        async fn record(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
            Err(AuditError::Status(500))
        }

        async fn lifecycle(&self, _event: &LifecycleEvent) -> Result<(), AuditError> {
            Err(AuditError::Request("down".to_string()))
        }
    }

    /// Accepts every event and never finishes delivering it.
    struct StalledSink;

    #[async_trait]
    impl ProgressPublisher for StalledSink {
        async fn publish_progress(&self, _record: &ProgressRecord) {
            std::future::pending::<()>().await
        }
        async fn publish_status(&self, _change: &StatusChange) {
            std::future::pending::<()>().await
        }
        async fn publish_order_complete(&self, _event: &OrderComplete) {
            std::future::pending::<()>().await
        }
    }

    #[async_trait]
    impl AuditSink for StalledSink {
        async fn record(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
            std::future::pending().await
        }
        async fn lifecycle(&self, _event: &LifecycleEvent) -> Result<(), AuditError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sinks_are_cut_off() {
        let reporter = JobReporter::new(5, Some(1), &StalledSink, &StalledSink);
        let started = tokio::time::Instant::now();

        reporter.progress(10, "").await;
        reporter.status(TaskStatus::Completed, None, None).await;
        reporter
            .log(AuditLevel::Info, AuditCategory::System, "still here", json!({}))
            .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= DELIVERY_TIMEOUT * 3);
        assert!(elapsed < DELIVERY_TIMEOUT * 4);
    }

    #[tokio::test]
    async fn test_progress_and_status_reach_publisher() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let reporter = JobReporter::new(4, Some(2), &broadcaster, &NoopAudit);

        reporter.progress(20, "").await;
        reporter
            .status(TaskStatus::Downloading, Some(TaskStatus::Enrolled), None)
            .await;

        match rx.try_recv().unwrap() {
            JobEvent::Progress(r) => {
                assert_eq!(r.percent, 20);
                assert_eq!(r.order_id, Some(2));
            }
            other => panic!("unexpected {:?}", other),
        }
        match rx.try_recv().unwrap() {
            JobEvent::Status(s) => assert_eq!(s.new_status, TaskStatus::Downloading),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_order_complete_needs_order() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let summary = OrderSummary {
            total: 2,
            completed: 1,
            failed: 1,
        };

        JobReporter::new(1, None, &broadcaster, &NoopAudit)
            .order_complete(summary)
            .await;
        assert!(rx.try_recv().is_err());

        JobReporter::new(1, Some(8), &broadcaster, &NoopAudit)
            .order_complete(summary)
            .await;
        match rx.try_recv().unwrap() {
            JobEvent::OrderComplete(e) => {
                assert_eq!(e.order_id, 8);
                assert_eq!(e.failed_tasks, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_audit_failures_are_swallowed() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let reporter = JobReporter::new(1, None, &broadcaster, &FailingAudit);
        reporter
            .log(AuditLevel::Error, AuditCategory::Upload, "boom", json!({}))
            .await;
        reporter
            .lifecycle(LifecycleKind::UploadError, "[Reason: boom]", json!({}))
            .await;
    }
}
