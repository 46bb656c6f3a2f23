//! Redis pub/sub transport for job events.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ErrorKind, RedisError, RedisResult};
use serde::Serialize;
use tracing::warn;

use super::job_progress::{OrderComplete, ProgressPublisher, ProgressRecord, StatusChange};

/// Seconds the latest progress record stays readable for late subscribers.
pub const PROGRESS_CACHE_TTL_SECS: u64 = 3600;

/// Longest a single publish or cache write may take.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

pub fn task_progress_channel(task_id: i64) -> String {
    format!("task:{}:progress", task_id)
}

pub fn order_progress_channel(order_id: i64) -> String {
    format!("order:{}:progress", order_id)
}

pub fn task_status_channel(task_id: i64) -> String {
    format!("task:{}:status", task_id)
}

pub fn order_status_channel(order_id: i64) -> String {
    format!("order:{}:status", order_id)
}

pub fn order_complete_channel(order_id: i64) -> String {
    format!("order:{}:complete", order_id)
}

pub fn progress_cache_key(task_id: i64) -> String {
    format!("progress:task:{}", task_id)
}

/// Fails `command` with an I/O error once `limit` elapses.
async fn within<T>(
    limit: Duration,
    command: impl Future<Output = RedisResult<T>>,
) -> RedisResult<T> {
    match tokio::time::timeout(limit, command).await {
        Ok(result) => result,
        Err(_) => Err(RedisError::from((ErrorKind::IoError, "Redis command timed out"))),
    }
}

/// Publishes job events on Redis channels and caches the latest progress.
///
/// Give it its own connection: a blocking pop on a shared one holds every
/// publish behind it.
#[derive(Clone)]
pub struct RedisProgressPublisher {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisProgressPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            timeout: COMMAND_TIMEOUT,
        }
    }

    async fn publish_json<T: Serialize>(&self, channels: &[String], payload: &T) {
        let message = match serde_json::to_string(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Failed to encode job event");
                return;
            }
        };

        let mut conn = self.conn.clone();
        for channel in channels {
            let publish = conn.publish::<_, _, ()>(channel, &message);
            if let Err(e) = within(self.timeout, publish).await {
                warn!(channel = %channel, error = %e, "Failed to publish job event");
            }
        }
    }
}

/// Channels a task-level event fans out to.
fn task_and_order_channels(
    task_channel: String,
    order_id: Option<i64>,
    order_channel: fn(i64) -> String,
) -> Vec<String> {
    let mut channels = vec![task_channel];
    if let Some(order_id) = order_id {
        channels.push(order_channel(order_id));
    }
    channels
}

#[async_trait]
impl ProgressPublisher for RedisProgressPublisher {
    async fn publish_progress(&self, record: &ProgressRecord) {
        let channels = task_and_order_channels(
            task_progress_channel(record.task_id),
            record.order_id,
            order_progress_channel,
        );
        self.publish_json(&channels, record).await;

        let Ok(cached) = serde_json::to_string(record) else {
            return;
        };
        let mut conn = self.conn.clone();
        let cache = conn.set_ex::<_, _, ()>(
            progress_cache_key(record.task_id),
            cached,
            PROGRESS_CACHE_TTL_SECS,
        );
        if let Err(e) = within(self.timeout, cache).await {
            warn!(task_id = record.task_id, error = %e, "Failed to cache progress");
        }
    }

    async fn publish_status(&self, change: &StatusChange) {
        let channels = task_and_order_channels(
            task_status_channel(change.task_id),
            change.order_id,
            order_status_channel,
        );
        self.publish_json(&channels, change).await;
    }

    async fn publish_order_complete(&self, event: &OrderComplete) {
        self.publish_json(&[order_complete_channel(event.order_id)], event)
            .await;
    }
}
