//! External engine invocation with a hard wall-clock timeout.
//!
//! # Design
//! - Program and arguments are discrete tokens; paths are substituted into
//!   tokens and never pass through a shell.
//! - The engine runs in its own process group. On timeout the group gets
//!   `SIGTERM`, then `SIGKILL` after a grace period, and the child is reaped
//!   before returning.
//! - A semaphore bounds concurrently running engines. Waiting for a permit
//!   happens before the engine clock starts.

use std::ffi::{OsStr, OsString};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use pdfsqueeze_config::{EngineConfig, INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER, PRESET_PLACEHOLDER};
use pdfsqueeze_telemetry::Metrics;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ExitInfo, InvokeError, InvokeResult};
use crate::preset::{InvocationProfile, Preset};

const STDERR_TAIL_BYTES: usize = 4 * 1024;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
/// Time the engine gets to exit after `SIGTERM` before it is killed.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Outcome of a successful invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationReport {
    /// Wall-clock time from spawn to exit.
    pub duration: Duration,
    /// Size of the produced output.
    pub output_bytes: u64,
}

/// Runs the compression engine against staged files.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Transform `input` into `output` using `profile`, within `timeout`.
    ///
    /// On success `output` exists, is closed, and is non-empty.
    async fn invoke(
        &self,
        input: &Path,
        output: &Path,
        profile: &InvocationProfile,
        timeout: Duration,
    ) -> InvokeResult<InvocationReport>;

    /// Permits not currently held by a running engine.
    fn available_permits(&self) -> usize;

    /// Configured engine program.
    fn program(&self) -> &Path;
}

/// [`Invoker`] backed by a real subprocess.
pub struct EngineInvoker {
    program: PathBuf,
    template: Vec<String>,
    permits: Arc<Semaphore>,
    metrics: Metrics,
    grace: Duration,
}

impl EngineInvoker {
    /// Build an invoker from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig, metrics: Metrics) -> Self {
        Self {
            program: config.program.clone(),
            template: config.args.clone(),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            metrics,
            grace: DEFAULT_TERMINATE_GRACE,
        }
    }

    /// Override the `SIGTERM` grace period.
    #[must_use]
    pub const fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Expand the argument template for one invocation.
    #[must_use]
    pub fn command_args(
        &self,
        input: &Path,
        output: &Path,
        profile: &InvocationProfile,
    ) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.template.len() + profile.engine_args.len());
        for token in &self.template {
            if token == PRESET_PLACEHOLDER {
                args.extend(profile.engine_args.iter().map(OsString::from));
            } else {
                args.push(substitute(token, input.as_os_str(), output.as_os_str()));
            }
        }
        args
    }

    async fn run(
        &self,
        input: &Path,
        output: &Path,
        profile: &InvocationProfile,
        timeout: Duration,
    ) -> InvokeResult<InvocationReport> {
        let mut command = Command::new(&self.program);
        command
            .args(self.command_args(input, output, profile))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|err| InvokeError::EngineFailed {
            exit: ExitInfo {
                reason: "spawn_failed",
                stderr_tail: err.to_string(),
                ..ExitInfo::default()
            },
        })?;
        let mut group = ProcessGroupGuard::new(child.id());
        let _active = ActiveInvocation::start(&self.metrics, profile.preset, started);
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_tail(pipe)));

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        let failure = match waited {
            Ok(Ok(status)) => {
                group.disarm();
                if status.success() {
                    None
                } else {
                    Some(ExitInfo {
                        reason: "nonzero_exit",
                        code: status.code(),
                        signal: status.signal(),
                        stderr_tail: String::new(),
                    })
                }
            }
            Ok(Err(err)) => Some(ExitInfo {
                reason: "wait_failed",
                stderr_tail: err.to_string(),
                ..ExitInfo::default()
            }),
            Err(_) => {
                terminate(&mut child, &mut group, self.grace).await;
                drain_tail(stderr).await;
                return Err(InvokeError::Timeout { limit: timeout });
            }
        };
        let stderr_tail = drain_tail(stderr).await;

        if let Some(mut exit) = failure {
            if exit.stderr_tail.is_empty() {
                exit.stderr_tail = stderr_tail;
            }
            return Err(InvokeError::EngineFailed { exit });
        }

        let output_bytes = match tokio::fs::metadata(output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            Ok(_) => {
                return Err(InvokeError::EngineFailed {
                    exit: ExitInfo {
                        reason: "empty_output",
                        code: Some(0),
                        signal: None,
                        stderr_tail,
                    },
                });
            }
            Err(_) => {
                return Err(InvokeError::EngineFailed {
                    exit: ExitInfo {
                        reason: "missing_output",
                        code: Some(0),
                        signal: None,
                        stderr_tail,
                    },
                });
            }
        };

        Ok(InvocationReport {
            duration: started.elapsed(),
            output_bytes,
        })
    }
}

#[async_trait]
impl Invoker for EngineInvoker {
    async fn invoke(
        &self,
        input: &Path,
        output: &Path,
        profile: &InvocationProfile,
        timeout: Duration,
    ) -> InvokeResult<InvocationReport> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| InvokeError::EngineFailed {
                exit: ExitInfo {
                    reason: "permits_closed",
                    ..ExitInfo::default()
                },
            })?;

        let started = Instant::now();
        let result = self.run(input, output, profile, timeout).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(report) => info!(
                preset = %profile.preset,
                duration_ms,
                outcome = "succeeded",
                output_bytes = report.output_bytes,
                "engine invocation finished"
            ),
            Err(InvokeError::Timeout { limit }) => warn!(
                preset = %profile.preset,
                duration_ms,
                outcome = "timeout",
                limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                "engine invocation timed out and was terminated"
            ),
            Err(InvokeError::EngineFailed { exit }) => warn!(
                preset = %profile.preset,
                duration_ms,
                outcome = "engine_failed",
                reason = exit.reason,
                exit_code = exit.code,
                signal = exit.signal,
                stderr = %exit.stderr_tail,
                "engine invocation failed"
            ),
        }
        result
    }

    fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    fn program(&self) -> &Path {
        &self.program
    }
}

/// Locate `program` the way `execvp` would.
#[must_use]
pub fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn substitute(token: &str, input: &OsStr, output: &OsStr) -> OsString {
    let mut expanded = OsString::new();
    let mut rest = token;
    loop {
        let next = [(INPUT_PLACEHOLDER, input), (OUTPUT_PLACEHOLDER, output)]
            .into_iter()
            .filter_map(|(placeholder, value)| {
                rest.find(placeholder)
                    .map(|at| (at, placeholder.len(), value))
            })
            .min_by_key(|(at, _, _)| *at);
        match next {
            Some((at, len, value)) => {
                expanded.push(&rest[..at]);
                expanded.push(value);
                rest = &rest[at + len..];
            }
            None => {
                expanded.push(rest);
                return expanded;
            }
        }
    }
}

/// Kills the engine's process group if the invocation is abandoned before reaping.
struct ProcessGroupGuard {
    pgid: Option<Pid>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw),
        }
    }

    fn signal(&self, signal: Signal) {
        if let Some(pgid) = self.pgid
            && let Err(err) = killpg(pgid, signal)
        {
            debug!(error = %err, pgid = pgid.as_raw(), signal = ?signal, "failed to signal engine process group");
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.signal(Signal::SIGKILL);
    }
}

struct ActiveInvocation<'a> {
    metrics: &'a Metrics,
    preset: Preset,
    started: Instant,
}

impl<'a> ActiveInvocation<'a> {
    fn start(metrics: &'a Metrics, preset: Preset, started: Instant) -> Self {
        metrics.engine_started();
        Self {
            metrics,
            preset,
            started,
        }
    }
}

impl Drop for ActiveInvocation<'_> {
    fn drop(&mut self) {
        self.metrics
            .engine_finished(self.preset.as_str(), self.started.elapsed());
    }
}

async fn terminate(child: &mut Child, group: &mut ProcessGroupGuard, grace: Duration) {
    group.signal(Signal::SIGTERM);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        group.signal(Signal::SIGKILL);
        if let Err(err) = child.kill().await {
            warn!(error = %err, "failed to kill engine after grace period");
        }
    }
    if let Err(err) = child.wait().await {
        warn!(error = %err, "failed to reap engine process");
    }
    group.disarm();
}

async fn read_tail<R>(mut reader: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail = Vec::new();
    let mut buf = [0_u8; 1_024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                tail.extend_from_slice(&buf[..read]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

async fn drain_tail(task: Option<JoinHandle<String>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}
