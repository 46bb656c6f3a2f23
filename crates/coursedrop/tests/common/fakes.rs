//! Scripted collaborators for the job engine.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use coursedrop::broadcast::{
    AuditEntry, AuditError, AuditSink, LifecycleEvent, LifecycleKind, OrderComplete,
    ProgressPublisher, ProgressRecord, StatusChange,
};
use coursedrop::fetcher::{ContentFetcher, FetchError, FetchRequest};
use coursedrop::notifier::{CompletionNotifier, NotifyError};
use coursedrop::uploader::{RemoteUploader, UploadError};
use coursedrop::worker::{JobQueue, QueueError};

/// What the fake fetch tool does on one call.
#[derive(Debug, Clone)]
pub enum FetchStep {
    /// Writes `<output_dir>/<folder>/lecture.mp4` and exits 0.
    Produce(&'static str),
    /// Like `Produce`, with a folder name given as raw bytes.
    #[cfg(unix)]
    ProduceRaw(&'static [u8]),
    /// Exits 0 without writing anything.
    Empty,
    /// Exits with the given code.
    Exit(i32),
    Timeout,
    Panic,
}

#[derive(Debug, Clone)]
pub struct FetchCall {
    pub at: Instant,
    pub request: FetchRequest,
}

/// Plays back `steps` in order, then repeats `fallback` forever.
pub struct ScriptedFetcher {
    steps: Mutex<VecDeque<FetchStep>>,
    fallback: FetchStep,
    calls: Mutex<Vec<FetchCall>>,
}

impl ScriptedFetcher {
    pub fn new(steps: Vec<FetchStep>, fallback: FetchStep) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(step: FetchStep) -> Self {
        Self::new(Vec::new(), step)
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<(), FetchError> {
        self.calls.lock().unwrap().push(FetchCall {
            at: Instant::now(),
            request: request.clone(),
        });
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            FetchStep::Produce(folder) => {
                let dir = request.output_dir.join(folder);
                std::fs::create_dir_all(&dir)?;
                std::fs::write(dir.join("lecture.mp4"), b"frames")?;
                Ok(())
            }
            #[cfg(unix)]
            FetchStep::ProduceRaw(folder) => {
                use std::ffi::OsStr;
                use std::os::unix::ffi::OsStrExt;

                let dir = request.output_dir.join(OsStr::from_bytes(folder));
                std::fs::create_dir_all(&dir)?;
                std::fs::write(dir.join("lecture.mp4"), b"frames")?;
                Ok(())
            }
            FetchStep::Empty => Ok(()),
            FetchStep::Exit(code) => Err(FetchError::Exit { code: Some(code) }),
            FetchStep::Timeout => Err(FetchError::Timeout {
                timeout: request.timeout,
            }),
            FetchStep::Panic => panic!("fetcher exploded"),
        }
    }
}

/// Succeeds unless a failure is queued; records every uploaded path.
#[derive(Default)]
pub struct ScriptedUploader {
    failures: Mutex<VecDeque<String>>,
    uploads: Mutex<Vec<PathBuf>>,
}

impl ScriptedUploader {
    pub fn failing_once(stderr: &str) -> Self {
        let uploader = Self::default();
        uploader.failures.lock().unwrap().push_back(stderr.to_string());
        uploader
    }

    pub fn uploads(&self) -> Vec<PathBuf> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteUploader for ScriptedUploader {
    async fn upload(&self, local_dir: &Path) -> Result<(), UploadError> {
        self.uploads.lock().unwrap().push(local_dir.to_path_buf());
        match self.failures.lock().unwrap().pop_front() {
            Some(stderr) => Err(UploadError::Exit {
                code: Some(1),
                stderr,
            }),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    fail: AtomicBool,
    calls: Mutex<Vec<(i64, String)>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn calls(&self) -> Vec<(i64, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(&self, job_id: i64, folder_name: &str) -> Result<(), NotifyError> {
        self.calls
            .lock()
            .unwrap()
            .push((job_id, folder_name.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            Err(NotifyError::Status { status: 503 })
        } else {
            Ok(())
        }
    }
}

/// In-memory queue. Pops return `None` once drained, or an error when
/// `unavailable` is set.
#[derive(Default)]
pub struct MemoryQueue {
    payloads: Mutex<VecDeque<String>>,
    unavailable: AtomicBool,
}

impl MemoryQueue {
    pub fn with_payloads(payloads: &[&str]) -> Self {
        let queue = Self::default();
        queue
            .payloads
            .lock()
            .unwrap()
            .extend(payloads.iter().map(|p| p.to_string()));
        queue
    }

    pub fn unavailable() -> Self {
        let queue = Self::default();
        queue.unavailable.store(true, Ordering::SeqCst);
        queue
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn pop(&self, _timeout: Duration) -> Result<Option<String>, QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Connection("connection refused".to_string()));
        }
        Ok(self.payloads.lock().unwrap().pop_front())
    }
}

/// Keeps every audit entry and lifecycle event in memory.
#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
    lifecycle: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingAudit {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn lifecycle_kinds(&self) -> Vec<LifecycleKind> {
        self.lifecycle
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn lifecycle(&self, event: &LifecycleEvent) -> Result<(), AuditError> {
        self.lifecycle.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Event and audit sink whose deliveries never complete, like a Redis or
/// backend that accepted the connection and went silent.
#[derive(Default)]
pub struct StalledEvents;

#[async_trait]
impl ProgressPublisher for StalledEvents {
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
impl AuditSink for StalledEvents {
    async fn record(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
        std::future::pending().await
    }

    async fn lifecycle(&self, _event: &LifecycleEvent) -> Result<(), AuditError> {
        std::future::pending().await
    }
}
