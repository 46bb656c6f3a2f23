//! Job progress events and the publisher seam they flow through.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::TaskStatus;

/// Latest download progress of one task. Each emission replaces the last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub task_id: i64,
    pub order_id: Option<i64>,
    /// Always within `0..=100`.
    pub percent: u8,
    pub current_file: String,
    pub speed: Option<String>,
    pub eta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_downloaded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl ProgressRecord {
    pub fn new(task_id: i64, order_id: Option<i64>, percent: u32, current_file: &str) -> Self {
        Self {
            task_id,
            order_id,
            percent: percent.min(100) as u8,
            current_file: current_file.to_string(),
            speed: None,
            eta: None,
            bytes_downloaded: None,
            total_bytes: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// A task moved between store statuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub task_id: i64,
    pub order_id: Option<i64>,
    pub new_status: TaskStatus,
    pub previous_status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: i64,
}

impl StatusChange {
    pub fn new(
        task_id: i64,
        order_id: Option<i64>,
        new_status: TaskStatus,
        previous_status: Option<TaskStatus>,
        message: Option<&str>,
    ) -> Self {
        Self {
            task_id,
            order_id,
            new_status,
            previous_status,
            message: message.map(str::to_string),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Every task of an order has reached an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderComplete {
    pub order_id: i64,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub timestamp: i64,
}

/// Sink for real-time job events.
///
/// Publishing is best-effort: implementations log and swallow transport
/// errors so that a broken event channel never fails a job.
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    async fn publish_progress(&self, record: &ProgressRecord);
    async fn publish_status(&self, change: &StatusChange);
    async fn publish_order_complete(&self, event: &OrderComplete);
}

/// No-op publisher for unit tests and deployments without an event bus.
pub struct NoopProgress;

#[async_trait]
impl ProgressPublisher for NoopProgress {
    async fn publish_progress(&self, _record: &ProgressRecord) {}
    async fn publish_status(&self, _change: &StatusChange) {}
    async fn publish_order_complete(&self, _event: &OrderComplete) {}
}

/// Any event passing through a [`JobProgressBroadcaster`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(ProgressRecord),
    Status(StatusChange),
    OrderComplete(OrderComplete),
}

/// In-process fan-out of job events to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ProgressPublisher for JobProgressBroadcaster {
    async fn publish_progress(&self, record: &ProgressRecord) {
        self.send(JobEvent::Progress(record.clone()));
    }

    async fn publish_status(&self, change: &StatusChange) {
        self.send(JobEvent::Status(change.clone()));
    }

    async fn publish_order_complete(&self, event: &OrderComplete) {
        self.send(JobEvent::OrderComplete(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_clamped() {
        let record = ProgressRecord::new(1, None, 250, "lecture.mp4");
        assert_eq!(record.percent, 100);
    }

    #[test]
    fn test_progress_record_wire_format() {
        let mut record = ProgressRecord::new(7, Some(3), 30, "01 Intro.mp4");
        record.speed = Some("1.2MB/s".to_string());
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["taskId"], 7);
        assert_eq!(value["orderId"], 3);
        assert_eq!(value["percent"], 30);
        assert_eq!(value["currentFile"], "01 Intro.mp4");
        assert_eq!(value["speed"], "1.2MB/s");
        assert!(value["eta"].is_null());
        assert!(value.get("totalBytes").is_none());
    }

    #[test]
    fn test_status_change_wire_format() {
        let change = StatusChange::new(
            7,
            None,
            TaskStatus::Downloading,
            Some(TaskStatus::Enrolled),
            Some("Attempt 1"),
        );
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["newStatus"], "downloading");
        assert_eq!(value["previousStatus"], "enrolled");
        assert_eq!(value["message"], "Attempt 1");
    }

    #[tokio::test]
    async fn test_broadcaster_publishes_to_subscribers() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let record = ProgressRecord::new(1, None, 10, "");
        broadcaster.publish_progress(&record).await;

        match rx.try_recv().unwrap() {
            JobEvent::Progress(received) => assert_eq!(received.task_id, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcaster_without_subscribers() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster
            .publish_status(&StatusChange::new(1, None, TaskStatus::Failed, None, None))
            .await;
    }
}
