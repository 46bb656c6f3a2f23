use std::fs::OpenOptions;
use std::io::Write;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::credentials::CredentialSource;
use super::tee::TeeWriter;
use super::{ContentFetcher, FetchError, FetchRequest};

const URL_PLACEHOLDER: &str = "{url}";
const OUTPUT_PLACEHOLDER: &str = "{output_dir}";

/// How long output pumps may keep draining after the child has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

type SharedSink = Arc<Mutex<TeeWriter<Box<dyn Write + Send>, Box<dyn Write + Send>>>>;

/// Runs the fetch tool as a child process.
///
/// The command is a whitespace-separated template; `{url}` and
/// `{output_dir}` are substituted per argument after splitting, so the URL
/// is always exactly one argv entry and no shell is involved. The child
/// runs in its own process group with the sandbox as working directory.
pub struct ProcessFetcher {
    program: String,
    args: Vec<String>,
    credentials: Arc<dyn CredentialSource>,
}

impl ProcessFetcher {
    pub fn new(template: &str, credentials: Arc<dyn CredentialSource>) -> Result<Self, FetchError> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| FetchError::InvalidCommand("command is empty".to_string()))?;
        let args: Vec<String> = parts.collect();

        if !args.iter().any(|a| a.contains(URL_PLACEHOLDER)) {
            return Err(FetchError::InvalidCommand(format!(
                "command must contain the {} placeholder",
                URL_PLACEHOLDER
            )));
        }

        Ok(Self {
            program,
            args,
            credentials,
        })
    }

    fn render_args(&self, request: &FetchRequest) -> Vec<String> {
        let output_dir = request.output_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(URL_PLACEHOLDER, &request.url)
                    .replace(OUTPUT_PLACEHOLDER, &output_dir)
            })
            .collect()
    }

    fn open_sink(request: &FetchRequest) -> Result<SharedSink, FetchError> {
        let secondary: Box<dyn Write + Send> = match &request.log_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| FetchError::LogFile {
                        path: path.clone(),
                        source: e,
                    })?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| FetchError::LogFile {
                        path: path.clone(),
                        source: e,
                    })?;
                Box::new(file)
            }
            None => Box::new(std::io::sink()),
        };
        let primary: Box<dyn Write + Send> = Box::new(std::io::stdout());
        Ok(Arc::new(Mutex::new(TeeWriter::new(primary, secondary))))
    }
}

fn spawn_pump<R>(reader: R, sink: SharedSink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Ok(mut out) = sink.lock() {
                        let _ = writeln!(out, "{}", line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Fetcher output stream closed");
                    break;
                }
            }
        }
        if let Ok(mut out) = sink.lock() {
            let _ = out.flush();
        }
    })
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        warn!(pid, error = %e, "Failed to kill fetcher process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

async fn drain(handle: JoinHandle<()>) {
    if tokio::time::timeout(DRAIN_GRACE, handle).await.is_err() {
        debug!("Fetcher output still open after exit; detaching");
    }
}

#[async_trait]
impl ContentFetcher for ProcessFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<(), FetchError> {
        let sink = Self::open_sink(request)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(request))
            .current_dir(&request.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in self.credentials.environment() {
            cmd.env(name, value.expose_secret());
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| FetchError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;
        let pid = child.id();
        debug!(pid, program = %self.program, "Fetcher started");

        let stdout_pump = child.stdout.take().map(|s| spawn_pump(s, Arc::clone(&sink)));
        let stderr_pump = child.stderr.take().map(|s| spawn_pump(s, Arc::clone(&sink)));

        let outcome = tokio::time::timeout(request.timeout, child.wait()).await;

        let result = match outcome {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(FetchError::Exit {
                code: status.code(),
            }),
            Ok(Err(e)) => Err(FetchError::Io(e)),
            Err(_) => {
                warn!(pid, timeout_secs = request.timeout.as_secs(), "Fetcher timed out, killing process group");
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Fetcher already exited");
                }
                Err(FetchError::Timeout {
                    timeout: request.timeout,
                })
            }
        };

        for pump in [stdout_pump, stderr_pump].into_iter().flatten() {
            if matches!(result, Err(FetchError::Timeout { .. })) {
                pump.abort();
            } else {
                drain(pump).await;
            }
        }

        result
    }
}
