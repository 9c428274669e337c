//! External command execution.
//!
//! Every command is spawned from discrete argv tokens, never through a
//! shell. Failures to start a process are reported as a failed
//! [`CommandResult`] instead of an error so callers only branch on
//! `success`.

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Split};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::package::CommandResult;

/// Message of a successful command
pub const SUCCESS: &str = "completed successfully";

/// Failure message used when the command wrote nothing to stderr
pub const NO_DETAILS: &str = "failed with no details";

/// How long an interrupted command gets to exit after SIGTERM
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Captured result of a non-streaming command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub result: CommandResult,
    pub stdout: String,
}

impl Output {
    pub fn success(&self) -> bool {
        self.result.success
    }

    fn failed(err: Error) -> Self {
        Self {
            result: err.into(),
            stdout: String::new(),
        }
    }
}

/// Runs external commands.
///
/// Implemented by [`SystemRunner`] for real processes; tests substitute a
/// scripted runner.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run to completion, capturing stdout and stderr in full
    async fn run(&self, argv: &[String]) -> Output;

    /// Run while handing each stdout line to `on_line` as it arrives.
    /// stderr is drained concurrently and becomes the failure message.
    ///
    /// Returns only once the child has exited.
    async fn run_streaming(
        &self,
        argv: &[String],
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> CommandResult;

    /// Look a program up on PATH
    fn locate(&self, program: &str) -> Option<PathBuf>;

    /// Deadline applied to streaming commands
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Build an argv vector from string slices
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts.into_iter().map(|s| s.as_ref().to_string()).collect()
}

/// Turn an exit code and captured stderr into a [`CommandResult`]
pub fn finished(exit_code: i32, stderr: &str) -> CommandResult {
    let stderr = stderr.trim_end();
    let message = if exit_code == 0 {
        SUCCESS
    } else if stderr.is_empty() {
        NO_DETAILS
    } else {
        stderr
    };
    CommandResult::from_exit(exit_code, message)
}

/// Runner backed by real child processes
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Option<Duration>,
    grace: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            timeout: None,
            grace: STOP_GRACE,
        }
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop streaming commands that run longer than `timeout`
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    fn command(argv: &[String]) -> Result<Command, Error> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Spawn("empty command".into()))?;

        tracing::debug!("> {} {}", program, args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    /// Stop an interrupted child and wait for it to exit.
    ///
    /// SIGTERM first, since sudo and doas relay it to the root command.
    /// SIGKILL only after the grace period. When the child cannot be
    /// signalled at all (pkexec execs into a root process) it is left
    /// to finish and its real exit status is returned instead.
    async fn stop(
        &self,
        child: &mut Child,
        stdout: &mut Option<Lines>,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        program: &str,
        reason: Error,
    ) -> Stopped {
        tracing::info!("Stopping {}: {}", program, reason);

        let Some(pid) = child.id() else {
            // already reaped
            return Stopped::Interrupted(reason);
        };

        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!("Cannot signal {} ({}), waiting for it to exit", program, e);
            return Stopped::Exited(drain_until_exit(child, stdout, on_line).await);
        }

        let exited = tokio::time::timeout(self.grace, drain_until_exit(child, stdout, on_line));
        if exited.await.is_err() {
            tracing::warn!("{} still running after SIGTERM, killing it", program);
            kill(child, program).await;
        }
        Stopped::Interrupted(reason)
    }
}

/// How an interrupted command ended
enum Stopped {
    /// Terminated on request
    Interrupted(Error),
    /// Could not be signalled and ran to completion
    Exited(io::Result<ExitStatus>),
}

type Lines = Split<BufReader<ChildStdout>>;

fn spawn_error(program: &str, err: io::Error) -> Error {
    if err.kind() == ErrorKind::NotFound {
        Error::Spawn(format!("{} not found", program))
    } else {
        Error::Spawn(format!("Failed to run {}: {}", program, err))
    }
}

async fn kill(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill {}: {}", program, e);
        if let Err(e) = child.wait().await {
            tracing::debug!("Failed to wait for {}: {}", program, e);
        }
    }
}

/// Hand one raw stdout segment to the line callback.
/// Non-UTF-8 bytes are replaced.
fn deliver(on_line: &mut (dyn for<'l> FnMut(&'l str) + Send), bytes: &[u8]) {
    let line = String::from_utf8_lossy(bytes);
    on_line(line.trim_end_matches('\r'));
}

/// Keep forwarding output until the child exits
async fn drain_until_exit(
    child: &mut Child,
    stdout: &mut Option<Lines>,
    on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
) -> io::Result<ExitStatus> {
    loop {
        let next = async {
            match stdout.as_mut() {
                Some(lines) => lines.next_segment().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            status = child.wait() => return status,
            segment = next => match segment {
                Ok(Some(bytes)) => deliver(on_line, &bytes),
                // EOF or a broken pipe: stop reading, keep waiting
                _ => *stdout = None,
            },
        }
    }
}

async fn exited(
    status: io::Result<ExitStatus>,
    stderr: tokio::task::JoinHandle<String>,
    program: &str,
) -> CommandResult {
    match status {
        Ok(status) => {
            let stderr = stderr.await.unwrap_or_default();
            finished(status.code().unwrap_or(-1), &stderr)
        }
        Err(e) => {
            stderr.abort();
            Error::Spawn(format!("Failed to wait for {}: {}", program, e)).into()
        }
    }
}

#[async_trait]
impl Runner for SystemRunner {
    async fn run(&self, argv: &[String]) -> Output {
        let mut cmd = match Self::command(argv) {
            Ok(cmd) => cmd,
            Err(e) => return Output::failed(e),
        };
        let program = &argv[0];

        match cmd.output().await {
            Ok(out) => {
                let code = out.status.code().unwrap_or(-1);
                let stderr = String::from_utf8_lossy(&out.stderr);
                Output {
                    result: finished(code, &stderr),
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                }
            }
            Err(e) => Output::failed(spawn_error(program, e)),
        }
    }

    async fn run_streaming(
        &self,
        argv: &[String],
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> CommandResult {
        let mut cmd = match Self::command(argv) {
            Ok(cmd) => cmd,
            Err(e) => return e.into(),
        };
        let program = argv[0].as_str();

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return spawn_error(program, e).into(),
        };

        let stderr = child.stderr.take();
        let stderr_program = program.to_string();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                if let Err(e) = stderr.read_to_end(&mut buf).await {
                    tracing::debug!("Failed to read stderr of {}: {}", stderr_program, e);
                }
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).split(b'\n'));

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        let limit_secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();

        // Lines are delivered in emission order until EOF
        let interrupted = loop {
            let next = async {
                match stdout.as_mut() {
                    Some(lines) => lines.next_segment().await,
                    None => Ok(None),
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break Some(Error::Cancelled),
                _ = &mut deadline => break Some(Error::TimedOut(limit_secs)),
                segment = next => match segment {
                    Ok(Some(bytes)) => deliver(on_line, &bytes),
                    Ok(None) => break None,
                    Err(e) => {
                        tracing::warn!("Failed to read output of {}: {}", program, e);
                        stdout = None;
                        break None;
                    }
                },
            }
        };

        let reason = match interrupted {
            Some(reason) => reason,
            None => tokio::select! {
                _ = cancel.cancelled() => Error::Cancelled,
                _ = &mut deadline => Error::TimedOut(limit_secs),
                status = child.wait() => return exited(status, stderr_task, program).await,
            },
        };

        match self.stop(&mut child, &mut stdout, on_line, program, reason).await {
            Stopped::Interrupted(reason) => {
                stderr_task.abort();
                reason.into()
            }
            Stopped::Exited(status) => exited(status, stderr_task, program).await,
        }
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
