//! Moves a finished course directory to cloud storage.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Course directory '{0}' has no usable name")]
    InvalidSource(String),

    #[error("Failed to start uploader '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Uploader exited with code {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
}

impl UploadError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            UploadError::Exit { code, .. } => *code,
            _ => None,
        }
    }
}

/// Name the course directory is uploaded and announced under.
pub fn folder_name(local_dir: &Path) -> Option<&str> {
    local_dir.file_name().and_then(|n| n.to_str())
}

#[async_trait]
pub trait RemoteUploader: Send + Sync {
    /// Uploads `local_dir` under its own folder name. On failure the local
    /// tree is left in place.
    async fn upload(&self, local_dir: &Path) -> Result<(), UploadError>;
}

/// Uploads with `rclone move`.
pub struct RcloneUploader {
    binary: String,
    remote: String,
    dest_path: String,
}

impl RcloneUploader {
    pub const DEFAULT_BINARY: &'static str = "rclone";

    pub fn new(binary: &str, remote: &str, dest_path: &str) -> Self {
        Self {
            binary: binary.to_string(),
            remote: remote.trim_end_matches(':').to_string(),
            dest_path: dest_path.trim_matches('/').to_string(),
        }
    }

    fn destination(&self, folder_name: &str) -> String {
        if self.dest_path.is_empty() {
            format!("{}:{}", self.remote, folder_name)
        } else {
            format!("{}:{}/{}", self.remote, self.dest_path, folder_name)
        }
    }

    fn args(&self, local_dir: &Path, folder_name: &str) -> Vec<String> {
        vec![
            "move".to_string(),
            local_dir.to_string_lossy().to_string(),
            self.destination(folder_name),
            "--transfers=8".to_string(),
            "--checkers=16".to_string(),
        ]
    }
}

#[async_trait]
impl RemoteUploader for RcloneUploader {
    async fn upload(&self, local_dir: &Path) -> Result<(), UploadError> {
        let folder_name = folder_name(local_dir)
            .ok_or_else(|| UploadError::InvalidSource(local_dir.display().to_string()))?;

        let destination = self.destination(folder_name);
        info!(destination = %destination, "Uploading course directory");

        let output = Command::new(&self.binary)
            .args(self.args(local_dir, folder_name))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| UploadError::Spawn {
                program: self.binary.clone(),
                source: e,
            })?;

        if output.status.success() {
            debug!("Upload finished");
            return Ok(());
        }

        Err(UploadError::Exit {
            code: output.status.code(),
            stderr: tail_lines(&String::from_utf8_lossy(&output.stderr), 5),
        })
    }
}

/// Last `n` lines of `text`.
fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
