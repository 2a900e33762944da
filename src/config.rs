//! Global configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::process::session::SessionOptions;
use crate::process::spawner::{SpawnSpec, DEFAULT_INHERITED_ENV};
use crate::process::writer::InputFormat;
use crate::{AppError, Result};

/// The wrapped tool and how to launch it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessConfig {
    /// Executable name or path.
    pub executable: String,
    /// Arguments passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; canonicalized during validation.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Variables copied from the relay's environment.
    #[serde(default = "default_inherit_env")]
    pub inherit_env: Vec<String>,
    /// Prompt encoding on stdin.
    #[serde(default)]
    pub input_format: InputFormat,
    /// Variables set explicitly.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Timeouts in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Window for the first output record after spawn.
    #[serde(default = "default_startup_seconds")]
    pub startup_seconds: u64,
    /// Grace period between the termination signal and a forced kill.
    #[serde(default = "default_terminate_grace_seconds")]
    pub terminate_grace_seconds: u64,
    /// Per-query timeout; 0 means no timeout.
    #[serde(default)]
    pub query_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_seconds: default_startup_seconds(),
            terminate_grace_seconds: default_terminate_grace_seconds(),
            query_seconds: 0,
        }
    }
}

/// Session-level settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Turns that may wait behind the one in flight.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Event bus capacity; 0 (unbounded) is the only supported value.
    #[serde(default)]
    pub event_buffer: usize,
    /// Directory for JSONL transcripts; none are written when unset.
    #[serde(default)]
    pub transcript_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            event_buffer: 0,
            transcript_dir: None,
        }
    }
}

fn default_inherit_env() -> Vec<String> {
    DEFAULT_INHERITED_ENV.iter().map(|s| (*s).to_owned()).collect()
}

fn default_startup_seconds() -> u64 {
    30
}

fn default_terminate_grace_seconds() -> u64 {
    5
}

fn default_queue_depth() -> usize {
    crate::feeder::DEFAULT_QUEUE_DEPTH
}

/// Root configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// The wrapped tool.
    pub process: ProcessConfig,
    /// Timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Session settings.
    #[serde(default)]
    pub session: SessionConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Override the working directory, canonicalizing it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory does not exist.
    pub fn set_workspace(&mut self, cwd: &Path) -> Result<()> {
        self.process.cwd = Some(canonical_dir(cwd)?);
        Ok(())
    }

    /// Launch description for the wrapped tool.
    #[must_use]
    pub fn spawn_spec(&self) -> SpawnSpec {
        SpawnSpec {
            program: self.process.executable.clone(),
            args: self.process.args.clone(),
            cwd: self.process.cwd.clone(),
            inherit_env: self.process.inherit_env.clone(),
            env: self.process.env.clone(),
        }
    }

    /// Session tunables derived from the timeouts and process settings.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            startup_timeout: Duration::from_secs(self.timeouts.startup_seconds),
            terminate_grace: Duration::from_secs(self.timeouts.terminate_grace_seconds),
            input_format: self.process.input_format,
            ..SessionOptions::default()
        }
    }

    /// Per-query timeout, if configured.
    #[must_use]
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.timeouts.query_seconds > 0).then(|| Duration::from_secs(self.timeouts.query_seconds))
    }

    fn validate(&mut self) -> Result<()> {
        if self.process.executable.trim().is_empty() {
            return Err(AppError::Config(
                "process.executable must not be empty".into(),
            ));
        }
        if self.timeouts.startup_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.startup_seconds must be greater than zero".into(),
            ));
        }
        if self.timeouts.terminate_grace_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.terminate_grace_seconds must be greater than zero".into(),
            ));
        }
        if self.session.queue_depth == 0 {
            return Err(AppError::Config(
                "session.queue_depth must be greater than zero".into(),
            ));
        }
        if self.session.event_buffer != 0 {
            return Err(AppError::Config(
                "session.event_buffer: only 0 (unbounded) is supported".into(),
            ));
        }
        if let Some(cwd) = &self.process.cwd {
            self.process.cwd = Some(canonical_dir(cwd)?);
        }
        Ok(())
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .map_err(|err| AppError::Config(format!("process.cwd invalid: {err}")))
}
