//! Signed completion webhook to the orchestrating backend.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to sign webhook payload: {0}")]
    Signature(String),

    #[error("Webhook request failed: {0}")]
    Request(String),

    #[error("Webhook returned HTTP {status}")]
    Status { status: u16 },
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Tells the backend that `folder_name` for `job_id` is in cloud storage.
    async fn notify(&self, job_id: i64, folder_name: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    secret_key: &'a str,
    task_id: i64,
    folder_name: &'a str,
    timestamp: i64,
}

/// The exact bytes covered by `X-Signature`.
pub fn signature_message(task_id: i64, folder_name: &str, timestamp: i64) -> String {
    format!("{}{}{}", task_id, folder_name, timestamp)
}

/// Lowercase hex HMAC-SHA256 of `message` under `secret`.
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> Result<String, NotifyError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| NotifyError::Signature(e.to_string()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: SecretString,
}

impl WebhookNotifier {
    pub fn new(url: &str, secret: SecretString) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            secret,
        })
    }
}

#[async_trait]
impl CompletionNotifier for WebhookNotifier {
    async fn notify(&self, job_id: i64, folder_name: &str) -> Result<(), NotifyError> {
        let timestamp = chrono::Utc::now().timestamp();
        let secret = self.secret.expose_secret();
        let signature = hmac_sha256_hex(
            secret.as_bytes(),
            signature_message(job_id, folder_name, timestamp).as_bytes(),
        )?;

        let body = WebhookBody {
            secret_key: secret,
            task_id: job_id,
            folder_name,
            timestamp,
        };

        let response = self
            .client
            .post(&self.url)
            .header("X-Signature", signature)
            .header("X-Timestamp", timestamp.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            warn!(job_id, status = status.as_u16(), "Webhook rejected completion");
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }

        info!(job_id, "Webhook accepted completion");
        Ok(())
    }
}
