//! Subprocess spawn capability.
//!
//! [`Spawner`] turns a [`SpawnSpec`] into a [`SpawnedProcess`]: piped stdio
//! plus a [`ChildHandle`] for waiting and signalling. [`TokioSpawner`] is the
//! production implementation:
//! - `env_clear()` followed by the spec's inherited-variable allowlist and its
//!   explicit variables, so nothing else from the relay's environment leaks
//!   into the child.
//! - `kill_on_drop(true)`, so a dropped session never orphans its process.
//!
//! Argument vectors arrive fully built; this module never interprets them.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::{AppError, Result};

/// Environment variables inherited by the subprocess unless overridden.
pub const DEFAULT_INHERITED_ENV: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "TMPDIR",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Everything needed to launch the wrapped tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Working directory; the relay's own when `None`.
    pub cwd: Option<PathBuf>,
    /// Variables copied from the relay's environment when present.
    pub inherit_env: Vec<String>,
    /// Variables set explicitly. These win over inherited ones.
    pub env: BTreeMap<String, String>,
}

impl SpawnSpec {
    /// Spec for `program` with the default inherited environment.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            inherit_env: DEFAULT_INHERITED_ENV
                .iter()
                .map(|&key| key.to_owned())
                .collect(),
            env: BTreeMap::new(),
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set one explicit environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Signal delivered through [`ChildHandle::kill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Polite request to exit (`SIGTERM` on unix).
    Terminate,
    /// Forced kill.
    Kill,
}

/// How the subprocess ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Whether the exit status reports success.
    pub success: bool,
    /// Human-readable description.
    pub reason: String,
}

impl ExitInfo {
    /// Describe a standard exit status.
    #[must_use]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        let code = status.code();
        let reason = code.map_or_else(
            || "process terminated by signal".to_owned(),
            |c| format!("process exited with code {c}"),
        );
        Self {
            code,
            success: status.success(),
            reason,
        }
    }
}

/// Boxed future returned by [`ChildHandle::wait`].
pub type WaitFuture<'a> = Pin<Box<dyn Future<Output = Result<ExitInfo>> + Send + 'a>>;

/// Control surface over a running subprocess.
pub trait ChildHandle: Send {
    /// OS process id, while known.
    fn id(&self) -> Option<u32>;

    /// Deliver `signal` without waiting for the exit.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the signal cannot be delivered.
    fn kill(&mut self, signal: StopSignal) -> Result<()>;

    /// Wait for the process to exit. Must be cancel-safe.
    fn wait(&mut self) -> WaitFuture<'_>;
}

/// A freshly spawned subprocess with its stdio taken.
pub struct SpawnedProcess {
    /// Input stream; kept open for the session's lifetime.
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Output stream carrying NDJSON records.
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Diagnostic stream, if captured.
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Wait/signal handle.
    pub child: Box<dyn ChildHandle>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.child.id())
            .finish_non_exhaustive()
    }
}

/// Spawn capability consumed by the process session.
pub trait Spawner: Send + Sync {
    /// Launch the subprocess described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the process cannot be started or its
    /// stdio cannot be captured.
    fn spawn(&self, spec: &SpawnSpec) -> Result<SpawnedProcess>;
}

/// [`Spawner`] backed by [`tokio::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
    fn spawn(&self, spec: &SpawnSpec) -> Result<SpawnedProcess> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);

        cmd.env_clear();
        for key in &spec.inherit_env {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.envs(&spec.env);

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to spawn {}: {err}", spec.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture stdout".into()))?;
        let stderr = child.stderr.take();

        info!(
            program = %spec.program,
            pid = ?child.id(),
            cwd = ?spec.cwd,
            "subprocess spawned"
        );

        Ok(SpawnedProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>),
            child: Box::new(TokioChild(child)),
        })
    }
}

/// [`ChildHandle`] over a [`tokio::process::Child`].
#[derive(Debug)]
struct TokioChild(Child);

impl ChildHandle for TokioChild {
    fn id(&self) -> Option<u32> {
        self.0.id()
    }

    fn kill(&mut self, signal: StopSignal) -> Result<()> {
        match signal {
            StopSignal::Kill => self.0.start_kill().map_err(AppError::from),
            StopSignal::Terminate => self.terminate(),
        }
    }

    fn wait(&mut self) -> WaitFuture<'_> {
        Box::pin(async move {
            let status = self.0.wait().await?;
            Ok(ExitInfo::from_status(status))
        })
    }
}

impl TokioChild {
    #[cfg(unix)]
    fn terminate(&mut self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.0.id() else {
            debug!("terminate: process already reaped");
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|_| AppError::Io(format!("pid {pid} out of range")))?;
        kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|err| AppError::Io(format!("failed to send SIGTERM to {pid}: {err}")))
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<()> {
        // No polite signal available; fall back to a forced kill.
        self.0.start_kill().map_err(AppError::from)
    }
}
