//! External command execution.
//!
//! Pipeline stages are argument vectors handed straight to the process
//! spawner; nothing is ever interpolated through a shell. A non-zero exit
//! is a normal [`StageOutcome`], not an error — only the caller decides
//! what a failed stage means for the job.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Notify;

/// A fully-formed external command: program, argv, child environment and
/// optional file sinks for the standard streams.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdout: None,
            stderr: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn stderr_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr = Some(path.into());
        self
    }
}

/// What happened to one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The command ran and exited zero.
    Completed,
    /// The command ran and exited non-zero (or died to a signal).
    ToolFailed { code: Option<i32> },
    /// The command never started: binary missing, permission denied, sink
    /// file could not be opened.
    LaunchFailed { message: String },
    /// The deadline expired; the child was killed and reaped.
    TimedOut,
    /// The cancel token fired; the child was killed and reaped.
    Cancelled,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Completed)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Completed => write!(f, "completed"),
            StageOutcome::ToolFailed { code: Some(code) } => {
                write!(f, "tool exited with code {code}")
            }
            StageOutcome::ToolFailed { code: None } => write!(f, "tool terminated by signal"),
            StageOutcome::LaunchFailed { message } => write!(f, "failed to launch: {message}"),
            StageOutcome::TimedOut => write!(f, "timed out"),
            StageOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation handle shared between a caller and a running
/// stage. Cloning yields another handle to the same token.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before re-checking, so a cancel between
            // the check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

enum Interrupt {
    Deadline,
    Cancel,
}

/// Executes external command pipelines stage by stage.
pub struct CommandRunner;

impl CommandRunner {
    /// Run one stage to completion, deadline expiry or cancellation.
    ///
    /// Sink files are created here and closed on every exit path. The child
    /// is always reaped before this returns, including on timeout and
    /// cancellation.
    pub async fn run(
        spec: &CommandSpec,
        deadline: Option<Duration>,
        cancel: &CancelToken,
    ) -> StageOutcome {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        for (key, value) in &spec.envs {
            command.env(key, value);
        }
        command.stdin(Stdio::null());

        if let Some(path) = &spec.stdout {
            match std::fs::File::create(path) {
                Ok(file) => {
                    command.stdout(Stdio::from(file));
                }
                Err(e) => {
                    return StageOutcome::LaunchFailed {
                        message: format!("cannot open stdout sink {}: {e}", path.display()),
                    };
                }
            }
        }
        if let Some(path) = &spec.stderr {
            match std::fs::File::create(path) {
                Ok(file) => {
                    command.stderr(Stdio::from(file));
                }
                Err(e) => {
                    return StageOutcome::LaunchFailed {
                        message: format!("cannot open stderr sink {}: {e}", path.display()),
                    };
                }
            }
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return StageOutcome::LaunchFailed {
                    message: e.to_string(),
                };
            }
        };

        let interrupted = async {
            tokio::select! {
                _ = cancel.cancelled() => Interrupt::Cancel,
                _ = expire(deadline) => Interrupt::Deadline,
            }
        };

        let mut interrupt = None;
        let waited = tokio::select! {
            status = child.wait() => Some(status),
            kind = interrupted => {
                interrupt = Some(kind);
                None
            }
        };

        match waited {
            Some(Ok(status)) if status.success() => StageOutcome::Completed,
            Some(Ok(status)) => StageOutcome::ToolFailed {
                code: status.code(),
            },
            Some(Err(e)) => StageOutcome::LaunchFailed {
                message: e.to_string(),
            },
            None => {
                Self::kill(&mut child).await;
                match interrupt {
                    Some(Interrupt::Cancel) => StageOutcome::Cancelled,
                    _ => StageOutcome::TimedOut,
                }
            }
        }
    }

    async fn kill(child: &mut Child) {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

async fn expire(deadline: Option<Duration>) {
    match deadline {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}
