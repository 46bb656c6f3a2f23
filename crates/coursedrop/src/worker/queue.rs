use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use thiserror::Error;

pub const DEFAULT_QUEUE_KEY: &str = "rq:queue:downloads";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue connection error: {0}")]
    Connection(String),

    #[error("Queue command error: {0}")]
    Command(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            QueueError::Connection(e.to_string())
        } else {
            QueueError::Command(e.to_string())
        }
    }
}

/// Source of raw job payloads.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Blocks up to `timeout` for the next payload. `Ok(None)` on timeout.
    async fn pop(&self, timeout: Duration) -> Result<Option<String>, QueueError>;
}

/// Opens a self-reconnecting Redis connection.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, QueueError> {
    let client =
        redis::Client::open(redis_url).map_err(|e| QueueError::Connection(e.to_string()))?;
    let manager = ConnectionManager::new(client).await?;
    Ok(manager)
}

/// Opens a self-reconnecting connection whose connects and replies fail
/// after `timeout`. Not for `BRPOP`, whose block outlasts the timeout.
pub async fn connect_bounded(
    redis_url: &str,
    timeout: Duration,
) -> Result<ConnectionManager, QueueError> {
    let client =
        redis::Client::open(redis_url).map_err(|e| QueueError::Connection(e.to_string()))?;
    let config = ConnectionManagerConfig::new()
        .set_connection_timeout(timeout)
        .set_response_timeout(timeout);
    let manager = ConnectionManager::new_with_config(client, config).await?;
    Ok(manager)
}

/// A Redis list consumed with `BRPOP`.
pub struct RedisJobQueue {
    conn: ConnectionManager,
    key: String,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager, key: &str) -> Self {
        Self {
            conn,
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn pop(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> =
            conn.brpop(&self.key, timeout.as_secs_f64()).await?;
        Ok(popped.map(|(_, payload)| payload))
    }
}
