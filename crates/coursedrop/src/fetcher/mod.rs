//! Adapter around the external course fetch tool.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod credentials;
pub mod process;
pub mod tee;

pub use credentials::{CredentialSource, EnvTokenCredentials, NoCredentials};
pub use process::ProcessFetcher;
pub use tee::TeeWriter;

/// One invocation of the fetch tool.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Already validated course URL.
    pub url: String,
    /// Job sandbox; may hold files from an earlier attempt.
    pub output_dir: PathBuf,
    pub timeout: Duration,
    /// Per-job log file receiving a copy of the tool's output.
    pub log_path: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Fetch command is invalid: {0}")]
    InvalidCommand(String),

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Fetcher exited with {}", exit_description(.code))]
    Exit { code: Option<i32> },

    #[error("Fetcher exceeded {}s timeout", .timeout.as_secs())]
    Timeout { timeout: Duration },

    #[error("Failed to open log file '{path}': {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error while waiting for fetcher: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "a signal".to_string(),
    }
}

impl FetchError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            FetchError::Exit { code } => *code,
            _ => None,
        }
    }
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Runs the tool to completion. `Ok` means a zero exit status; the
    /// caller inspects the output directory itself.
    async fn fetch(&self, request: &FetchRequest) -> Result<(), FetchError>;
}
