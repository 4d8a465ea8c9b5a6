//! Invocation of the external test process.
//!
//! The process is told where to write its log through an `{artifact}`
//! placeholder in its arguments (or a trailing argument when there is no
//! placeholder) and through `PRH_ARTIFACT_PATH`. Only the exit status
//! matters; stdout and stderr are drained in the background for diagnostics
//! and never parsed. The iteration ends when the child exits, even if a
//! descendant it left behind still holds the pipes open.

use crate::error::IterationFailure;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

/// Placeholder replaced with the artifact path in command arguments.
pub const ARTIFACT_PLACEHOLDER: &str = "{artifact}";
/// Environment variable carrying the artifact path to the child.
pub const ARTIFACT_ENV: &str = "PRH_ARTIFACT_PATH";

/// Bytes of captured output kept for failure diagnostics.
const OUTPUT_TAIL_BYTES: usize = 2048;
/// How long a failed child's output may keep draining after it exits.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// A successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSuccess {
    pub elapsed: Duration,
}

/// Runs the external process once for a given artifact path.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run to completion. `Ok` means exit code 0.
    async fn run(&self, artifact: &Path) -> Result<RunSuccess, IterationFailure>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Runs a real program with `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// `command[0]` is the program, the rest its arguments.
    ///
    /// Returns `None` for an empty command.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: None,
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments with the artifact path substituted in.
    pub fn args_for(&self, artifact: &Path) -> Vec<String> {
        let path = artifact.display().to_string();
        if self.args.iter().any(|a| a.contains(ARTIFACT_PLACEHOLDER)) {
            self.args
                .iter()
                .map(|a| a.replace(ARTIFACT_PLACEHOLDER, &path))
                .collect()
        } else {
            let mut args = self.args.clone();
            args.push(path);
            args
        }
    }

    fn build(&self, artifact: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args_for(artifact))
            .env(ARTIFACT_ENV, artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, artifact: &Path) -> Result<RunSuccess, IterationFailure> {
        let start = Instant::now();
        let mut child = self
            .build(artifact)
            .spawn()
            .map_err(|e| IterationFailure::Spawn {
                message: format!("{}: {}", self.program, e),
            })?;
        let stdout = OutputTail::capture(child.stdout.take());
        let stderr = OutputTail::capture(child.stderr.take());

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(result) => result,
                // Returning drops the child, which kills it.
                Err(_) => {
                    return Err(IterationFailure::TimedOut {
                        after_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => child.wait().await,
        };

        let status = waited.map_err(|e| IterationFailure::Wait {
            message: e.to_string(),
        })?;
        let elapsed = start.elapsed();

        if status.success() {
            return Ok(RunSuccess { elapsed });
        }

        let stderr = stderr.finish().await;
        let stdout = stdout.finish().await;
        debug!(
            program = %self.program,
            status = %status,
            stderr = %stderr,
            stdout = %stdout,
            "External process failed"
        );
        Err(classify_status(status))
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Map a non-success exit status to a failure.
pub fn classify_status(status: ExitStatus) -> IterationFailure {
    if let Some(code) = status.code() {
        return IterationFailure::ExitCode { code };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return IterationFailure::Signal { signal };
        }
    }
    IterationFailure::NoExitStatus
}

/// The last [`OUTPUT_TAIL_BYTES`] of one child stream, read by a background
/// task so a full pipe never blocks the child.
struct OutputTail {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl OutputTail {
    fn capture<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            if let Some(reader) = reader {
                drain_into(reader, &sink).await;
            }
        });
        Self { buffer, task }
    }

    /// Waits briefly for the stream to close, then returns what was kept.
    async fn finish(mut self) -> String {
        let _ = tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut self.task).await;
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        tail(&buffer)
    }
}

impl Drop for OutputTail {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drain_into<R: AsyncRead + Unpin>(mut reader: R, sink: &Mutex<Vec<u8>>) {
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut buffer = sink.lock().unwrap_or_else(|e| e.into_inner());
                buffer.extend_from_slice(&chunk[..n]);
                let excess = buffer.len().saturating_sub(OUTPUT_TAIL_BYTES);
                buffer.drain(..excess);
            }
        }
    }
}

fn tail(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
