//! Process execution boundary
//!
//! Every command step ends up here as one `<shell> -c <text>` process.
//! The orchestrator only sees exit code, stdout and stderr; spawn failures
//! are reported as errors so they can be told apart from commands that ran
//! and failed.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as TokioCommand};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

/// How long output readers may keep draining after the process is gone
const READER_GRACE: Duration = Duration::from_secs(2);

/// A fully resolved process invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Name of the step this invocation belongs to
    pub step: String,
    /// Shell executable
    pub shell: String,
    /// Command text with placeholders already expanded
    pub script: String,
    /// Extra environment for the process, on top of the inherited one
    pub env: BTreeMap<String, String>,
    /// Kill the process when it runs longer than this
    pub timeout: Option<Duration>,
}

/// Captured result of one process
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, `None` when the process was killed or died from a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    /// Killed because it exceeded its timeout
    pub timed_out: bool,
    /// Killed on purpose by `RunningProcess::stop`
    pub stopped: bool,
}

/// Executes invocations
///
/// The production implementation is [`ShellRunner`]; tests substitute a
/// scripted runner so orchestration can be checked without a cluster.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion (or timeout) and capture output
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput>;

    /// Start in the background; output is collected when stopped
    async fn start(&self, invocation: &Invocation) -> Result<Box<dyn RunningProcess>>;
}

/// A process started by [`ProcessRunner::start`]
#[async_trait]
pub trait RunningProcess: Send {
    /// Stop the process (if still running) and return everything it printed
    async fn stop(self: Box<Self>) -> Result<ProcessOutput>;
}

/// Runs invocations through a real shell using tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    fn spawn(&self, invocation: &Invocation) -> Result<ShellProcess> {
        let mut cmd = TokioCommand::new(&invocation.shell);
        cmd.arg("-c")
            .arg(&invocation.script)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so a kill also reaches the shell's children
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn(&invocation.step, &invocation.shell, e))?;

        tracing::debug!(
            step = %invocation.step,
            pid = ?child.id(),
            "spawned `{}`",
            invocation.script
        );

        let stdout = Capture::start(child.stdout.take());
        let stderr = Capture::start(child.stderr.take());

        Ok(ShellProcess {
            step: invocation.step.clone(),
            pid: child.id(),
            child,
            started: Instant::now(),
            stdout,
            stderr,
            reaped: false,
        })
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        let mut process = self.spawn(invocation)?;

        let status = match invocation.timeout {
            Some(limit) => match tokio::time::timeout(limit, process.child.wait()).await {
                Ok(status) => Some(status),
                Err(_) => None,
            },
            None => Some(process.child.wait().await),
        };

        match status {
            Some(status) => {
                let status = status.map_err(|e| process.output_error(e))?;
                process.reaped = true;
                Ok(process.collect(status.code(), false, false).await)
            }
            None => {
                tracing::warn!(
                    step = %invocation.step,
                    "timed out after {:?}, killing",
                    invocation.timeout.unwrap_or_default()
                );
                process.kill().await?;
                Ok(process.collect(None, true, false).await)
            }
        }
    }

    async fn start(&self, invocation: &Invocation) -> Result<Box<dyn RunningProcess>> {
        Ok(Box::new(self.spawn(invocation)?))
    }
}

/// A spawned shell with its output being drained in the background
struct ShellProcess {
    step: String,
    pid: Option<u32>,
    child: Child,
    started: Instant,
    stdout: Capture,
    stderr: Capture,
    reaped: bool,
}

impl ShellProcess {
    fn output_error(&self, e: std::io::Error) -> Error {
        Error::ProcessOutput {
            step: self.step.clone(),
            message: e.to_string(),
        }
    }

    fn signal_group(&self) {
        // killpg signals every process in the group led by `pid`
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = self.pid;
    }

    async fn kill(&mut self) -> Result<()> {
        self.signal_group();
        let _ = self.child.start_kill();
        self.child.wait().await.map_err(|e| self.output_error(e))?;
        self.reaped = true;
        Ok(())
    }

    async fn collect(mut self, exit_code: Option<i32>, timed_out: bool, stopped: bool) -> ProcessOutput {
        let elapsed = self.started.elapsed();
        let stdout = self.stdout.finish().await;
        let stderr = self.stderr.finish().await;
        ProcessOutput {
            exit_code,
            stdout,
            stderr,
            elapsed,
            timed_out,
            stopped,
        }
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        // Dropped mid-run (cancellation): take the whole group down
        if !self.reaped {
            self.signal_group();
        }
    }
}

#[async_trait]
impl RunningProcess for ShellProcess {
    async fn stop(mut self: Box<Self>) -> Result<ProcessOutput> {
        match self.child.try_wait().map_err(|e| self.output_error(e))? {
            Some(status) => {
                self.reaped = true;
                Ok(self.collect(status.code(), false, false).await)
            }
            None => {
                tracing::debug!(step = %self.step, "stopping background process");
                self.kill().await?;
                Ok(self.collect(None, false, true).await)
            }
        }
    }
}

/// Drains one output pipe into a shared buffer
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl Capture {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let Some(mut pipe) = pipe else {
            return Self {
                buffer,
                reader: None,
            };
        };

        let sink = Arc::clone(&buffer);
        let reader = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });

        Self {
            buffer,
            reader: Some(reader),
        }
    }

    /// Wait briefly for the reader to hit EOF, then return what was captured
    ///
    /// A grandchild that escaped the kill can hold the pipe open; the
    /// grace period keeps that from blocking the step forever.
    async fn finish(&mut self) -> String {
        if let Some(reader) = self.reader.take() {
            let abort = reader.abort_handle();
            if tokio::time::timeout(READER_GRACE, reader).await.is_err() {
                abort.abort();
            }
        }
        let bytes = self
            .buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
