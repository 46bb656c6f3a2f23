use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::broadcast::audit::{AuditCategory, AuditLevel, AuditSink, LifecycleKind, NoopAudit};
use crate::broadcast::job_progress::{NoopProgress, ProgressPublisher};
use crate::db::{JobStateStore, TaskStatus};
use crate::fetcher::{ContentFetcher, FetchError, FetchRequest};
use crate::notifier::CompletionNotifier;
use crate::sanitize;
use crate::uploader::{self, RemoteUploader};
use crate::worker::job::{Job, JobResult};

use super::config::EngineConfig;
use super::context::{JobContext, JobState};
use super::error::{ErrorPayload, ErrorType, JobError};
use super::progress::JobReporter;
use super::sandbox::Sandbox;
use super::validation::validate_job;

/// Drives one job through validation, precondition check, download,
/// upload, notification and cleanup.
///
/// Collaborators are injected once and shared by every job the worker
/// runs. No collaborator error escapes `execute_job`; each one becomes a
/// classified [`JobError`] or a logged warning.
pub struct JobEngine {
    config: Arc<EngineConfig>,
    store: Arc<dyn JobStateStore>,
    fetcher: Arc<dyn ContentFetcher>,
    uploader: Arc<dyn RemoteUploader>,
    notifier: Arc<dyn CompletionNotifier>,
    progress: Arc<dyn ProgressPublisher>,
    audit: Arc<dyn AuditSink>,
}

impl JobEngine {
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<dyn JobStateStore>,
        fetcher: Arc<dyn ContentFetcher>,
        uploader: Arc<dyn RemoteUploader>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            uploader,
            notifier,
            progress: Arc::new(NoopProgress),
            audit: Arc::new(NoopAudit),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressPublisher>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStateStore> {
        &self.store
    }

    /// Runs a job to completion. Never panics on collaborator failure and
    /// never returns an error; the outcome is in the [`JobResult`].
    pub async fn execute_job(&self, job: &Job) -> JobResult {
        let span = info_span!("job",
            job_id = job.job_id,
            order_id = ?job.parent_order_id,
            email = %sanitize::redact_email(&job.user_email),
        );
        self.run(job).instrument(span).await
    }

    async fn run(&self, job: &Job) -> JobResult {
        let reporter = JobReporter::new(
            job.job_id,
            job.parent_order_id,
            self.progress.as_ref(),
            self.audit.as_ref(),
        );
        let mut ctx = JobContext::new(job.clone());

        // Step 1: Validate
        if let Err(e) = validate_job(job, &self.config.content_domain) {
            warn!(error_type = %e.error_type, reason = %e.message, "Job rejected");
            let payload = ErrorPayload::from_error(&e, 0);
            self.write_status(&mut ctx, &reporter, TaskStatus::Failed, Some(&payload), Some(&e.message))
                .await;
            reporter
                .log(AuditLevel::Error, AuditCategory::System, &e.to_string(), json!({}))
                .await;
            self.finish_order(job, &reporter).await;
            ctx.advance(JobState::Failed);
            return ctx.finish(JobResult::failure(job, &e, Some(payload)));
        }
        ctx.advance(JobState::Validated);
        info!(url = %sanitize::redact_url(&job.source_url), "Job accepted");

        // Step 2: Precondition
        if let Err(e) = self
            .await_precondition(&mut ctx, &reporter)
            .instrument(info_span!("precondition"))
            .await
        {
            ctx.advance(JobState::Failed);
            let payload = ErrorPayload::from_error(&e, 0);
            return ctx.finish(JobResult::failure(job, &e, Some(payload)));
        }
        ctx.advance(JobState::PreconditionChecked);

        // Step 3: Sandbox
        let sandbox = match Sandbox::create(&self.config.staging_dir, job.job_id) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                let path = Sandbox::path_for(&self.config.staging_dir, job.job_id);
                let err = JobError::new(
                    ErrorType::SandboxNotCreated,
                    format!("Failed to create {}: {}", path.display(), e),
                );
                error!(error_type = %err.error_type, error = %e, "Sandbox creation failed");
                let payload = ErrorPayload::from_error(&err, 0).with_sandbox(&path, false);
                self.write_status(&mut ctx, &reporter, TaskStatus::Failed, Some(&payload), Some(&err.message))
                    .await;
                reporter
                    .log(AuditLevel::Error, AuditCategory::System, &err.message, json!({}))
                    .await;
                self.finish_order(job, &reporter).await;
                ctx.advance(JobState::Failed);
                return ctx.finish(JobResult::failure(job, &err, Some(payload)));
            }
        };
        info!(sandbox = %sandbox.path().display(), "Sandbox ready");

        // Steps 4 and 5: Download and upload, sharing one attempt budget
        let max_attempts = self.config.max_attempts.max(1);
        let mut uploaded = None;
        for attempt in 1..=max_attempts {
            ctx.attempt = attempt;
            let outcome = self
                .run_attempt(&mut ctx, &sandbox, &reporter)
                .instrument(info_span!("attempt", attempt, max_attempts))
                .await;

            match outcome {
                Ok(course_dir) => {
                    uploaded = Some(course_dir);
                    break;
                }
                Err(e) => {
                    error!(
                        attempt,
                        error_type = %e.error_type,
                        exit_code = ?e.exit_code,
                        error = %e.message,
                        "Attempt failed"
                    );
                    reporter
                        .log(
                            AuditLevel::Warn,
                            AuditCategory::Download,
                            &format!("Attempt {}/{} failed: {}", attempt, max_attempts, e.message),
                            json!({ "attempt": attempt, "errorType": e.error_type }),
                        )
                        .await;
                    ctx.last_error = Some(e);

                    if attempt < max_attempts {
                        info!(
                            backoff_secs = self.config.retry_backoff.as_secs(),
                            "Keeping partial download, retrying after backoff"
                        );
                        sleep(self.config.retry_backoff).await;
                    }
                }
            }
        }

        // Step 6: Completion
        match uploaded {
            Some(folder_name) => self.complete(&mut ctx, &sandbox, &reporter, folder_name).await,
            None => self.fail_exhausted(&mut ctx, &sandbox, &reporter).await,
        }
    }

    /// Waits for the task to become `enrolled`.
    ///
    /// The first read happens immediately. Read errors count as "not ready".
    async fn await_precondition(
        &self,
        ctx: &mut JobContext,
        reporter: &JobReporter<'_>,
    ) -> Result<(), JobError> {
        let job_id = ctx.job.job_id;
        let max_wait = self.config.precondition_max_wait;
        let deadline = Instant::now() + max_wait;
        let mut last_seen = None;

        loop {
            match self.store.get_status(job_id) {
                Ok(TaskStatus::Enrolled) => {
                    ctx.store_status = Some(TaskStatus::Enrolled);
                    return Ok(());
                }
                Ok(status) if status.is_awaiting_precondition() => {
                    debug!(status = %status, "Task not enrolled yet");
                    last_seen = Some(status);
                }
                Ok(status) => {
                    let err = JobError::new(
                        ErrorType::PreconditionFailed,
                        format!("Task is '{}', refusing to start", status),
                    );
                    warn!(error_type = %err.error_type, status = %status, "Precondition failed");
                    return Err(err);
                }
                Err(e) => {
                    warn!(error_type = %ErrorType::StoreError, error = %e, "Status read failed, will retry");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.config.precondition_poll_interval.min(deadline - now)).await;
        }

        let err = JobError::new(
            ErrorType::PreconditionTimeout,
            format!(
                "Task not enrolled after {}s (last status: {})",
                max_wait.as_secs(),
                last_seen.map(|s| s.as_str()).unwrap_or("unknown")
            ),
        );
        warn!(error_type = %err.error_type, "Precondition timed out");

        let payload = ErrorPayload::from_error(&err, 0);
        let awaiting = [TaskStatus::Pending, TaskStatus::Paid, TaskStatus::Processing];
        match self
            .store
            .transition(job_id, &awaiting, TaskStatus::Failed, Some(&payload))
        {
            Ok(true) => {
                reporter
                    .status(TaskStatus::Failed, last_seen, Some(&err.message))
                    .await;
                self.finish_order(&ctx.job, reporter).await;
            }
            Ok(false) => debug!("Task already left the awaiting states; not marking failed"),
            Err(e) => {
                error!(error_type = %ErrorType::StoreError, error = %e, "Failed to mark task failed");
            }
        }
        Err(err)
    }

    /// One download-then-upload attempt. Returns the uploaded folder name.
    async fn run_attempt(
        &self,
        ctx: &mut JobContext,
        sandbox: &Sandbox,
        reporter: &JobReporter<'_>,
    ) -> Result<String, JobError> {
        let attempt = ctx.attempt;
        let max_attempts = self.config.max_attempts.max(1);
        let message = format!("Download attempt {}/{}", attempt, max_attempts);

        ctx.advance(JobState::Downloading);
        self.write_status(ctx, reporter, TaskStatus::Downloading, None, Some(&message))
            .await;
        reporter.progress(10 * attempt, "").await;
        reporter.log_progress(10 * attempt, &message).await;

        let started = Instant::now();
        let request = FetchRequest {
            url: ctx.job.source_url.clone(),
            output_dir: sandbox.path().to_path_buf(),
            timeout: self.config.download_timeout,
            log_path: Some(self.config.job_log_path(ctx.job.job_id)),
        };

        if let Err(e) = self.fetcher.fetch(&request).await {
            let err = match &e {
                FetchError::Timeout { .. } => JobError::new(ErrorType::TimeoutError, e.to_string()),
                _ => JobError::new(ErrorType::ProcessError, e.to_string()).with_exit_code(e.exit_code()),
            };
            reporter
                .lifecycle(
                    LifecycleKind::DownloadError,
                    &format!("[Reason: {}]", err.message),
                    json!({ "reason": err.message, "attempt": attempt }),
                )
                .await;
            return Err(err);
        }

        let course_dir = match sandbox.find_output_dir() {
            Ok(Some(dir)) => dir,
            Ok(None) => {
                return Err(JobError::new(
                    ErrorType::SandboxEmpty,
                    "Fetcher exited cleanly but produced no course directory",
                ))
            }
            Err(e) => {
                return Err(JobError::new(
                    ErrorType::SandboxEmpty,
                    format!("Failed to read sandbox: {}", e),
                ))
            }
        };
        let Some(folder_name) = uploader::folder_name(&course_dir).map(str::to_string) else {
            return Err(JobError::new(
                ErrorType::SandboxEmpty,
                format!("Course directory '{}' has no usable name", course_dir.display()),
            ));
        };
        let duration = started.elapsed().as_secs();
        info!(folder = %folder_name, duration_secs = duration, "Download finished");
        reporter
            .lifecycle(
                LifecycleKind::DownloadSuccess,
                &format!("[Duration: {}s]", duration),
                json!({ "duration": duration, "folder": folder_name }),
            )
            .await;

        self.upload(ctx, &course_dir, &folder_name, reporter)
            .instrument(info_span!("upload"))
            .await?;
        Ok(folder_name)
    }

    async fn upload(
        &self,
        ctx: &mut JobContext,
        course_dir: &Path,
        folder_name: &str,
        reporter: &JobReporter<'_>,
    ) -> Result<(), JobError> {
        ctx.advance(JobState::Uploading);
        self.write_status(ctx, reporter, TaskStatus::Uploading, None, Some("Uploading to cloud storage"))
            .await;

        if let Err(e) = self.uploader.upload(course_dir).await {
            let err = JobError::new(ErrorType::UploadError, e.to_string()).with_exit_code(e.exit_code());
            reporter
                .lifecycle(
                    LifecycleKind::UploadError,
                    &format!("[Reason: {}]", err.message),
                    json!({ "reason": err.message, "attempt": ctx.attempt }),
                )
                .await;
            return Err(err);
        }

        info!(folder = %folder_name, "Upload finished");
        reporter
            .lifecycle(
                LifecycleKind::UploadSuccess,
                &format!("[Folder: {}]", folder_name),
                json!({ "folder": folder_name }),
            )
            .await;
        Ok(())
    }

    async fn complete(
        &self,
        ctx: &mut JobContext,
        sandbox: &Sandbox,
        reporter: &JobReporter<'_>,
        folder_name: String,
    ) -> JobResult {
        ctx.advance(JobState::Notifying);

        self.write_status(ctx, reporter, TaskStatus::Completed, None, Some("Course delivered"))
            .await;
        reporter.progress(100, &folder_name).await;
        reporter
            .log(
                AuditLevel::Info,
                AuditCategory::Upload,
                "Course uploaded",
                json!({ "folder": folder_name, "attempts": ctx.attempt }),
            )
            .await;

        let kept = match self.notifier.notify(ctx.job.job_id, &folder_name).await {
            Ok(()) => match sandbox.remove() {
                Ok(()) => {
                    info!("Sandbox removed");
                    ctx.advance(JobState::Cleaned);
                    false
                }
                Err(e) => {
                    warn!(error = %e, "Failed to remove sandbox");
                    ctx.advance(JobState::Kept);
                    true
                }
            },
            Err(e) => {
                warn!(
                    error_type = %ErrorType::NotifyError,
                    error = %e,
                    sandbox = %sandbox.path().display(),
                    "Webhook failed, keeping sandbox for inspection"
                );
                reporter
                    .log(AuditLevel::Warn, AuditCategory::System, &e.to_string(), json!({}))
                    .await;
                ctx.advance(JobState::Kept);
                true
            }
        };

        self.finish_order(&ctx.job, reporter).await;
        ctx.finish(JobResult::success(&ctx.job, folder_name, kept))
    }

    async fn fail_exhausted(
        &self,
        ctx: &mut JobContext,
        sandbox: &Sandbox,
        reporter: &JobReporter<'_>,
    ) -> JobResult {
        let sandbox_exists = sandbox.exists();
        let err = if !sandbox_exists {
            JobError::new(
                ErrorType::SandboxNotCreated,
                format!("Sandbox {} is missing", sandbox.path().display()),
            )
        } else {
            ctx.last_error.clone().unwrap_or_else(|| {
                JobError::new(ErrorType::ProcessError, "Download failed")
            })
        };

        error!(
            attempts = ctx.attempt,
            error_type = %err.error_type,
            sandbox = %sandbox.path().display(),
            "Job failed after all attempts, sandbox kept"
        );

        let payload =
            ErrorPayload::from_error(&err, ctx.attempt).with_sandbox(sandbox.path(), sandbox_exists);
        self.write_status(ctx, reporter, TaskStatus::Failed, Some(&payload), Some(&err.message))
            .await;
        reporter
            .log(
                AuditLevel::Error,
                AuditCategory::Download,
                &format!("Failed after {} attempts: {}", ctx.attempt, err.message),
                json!({ "errorType": err.error_type, "sandboxPath": payload.sandbox_path }),
            )
            .await;
        self.finish_order(&ctx.job, reporter).await;

        ctx.advance(JobState::Failed);
        let result =
            JobResult::failure(&ctx.job, &err, Some(payload)).with_sandbox_kept(sandbox_exists);
        ctx.finish(result)
    }

    /// Persists a status and announces it. Store failures are logged only.
    async fn write_status(
        &self,
        ctx: &mut JobContext,
        reporter: &JobReporter<'_>,
        status: TaskStatus,
        error: Option<&ErrorPayload>,
        message: Option<&str>,
    ) {
        if let Err(e) = self.store.set_status(ctx.job.job_id, status, error) {
            error!(
                error_type = %ErrorType::StoreError,
                status = %status,
                error = %e,
                "Failed to persist task status"
            );
        }
        reporter.status(status, ctx.store_status, message).await;
        ctx.store_status = Some(status);
    }

    /// Publishes the order completion event once every task is settled.
    async fn finish_order(&self, job: &Job, reporter: &JobReporter<'_>) {
        let Some(order_id) = job.parent_order_id else {
            return;
        };
        match self.store.order_summary(order_id) {
            Ok(summary) if summary.is_settled() => {
                info!(order_id, completed = summary.completed, failed = summary.failed, "Order settled");
                reporter.order_complete(summary).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error_type = %ErrorType::StoreError, error = %e, "Failed to read order summary");
            }
        }
    }
}
