#![forbid(unsafe_code)]

//! `agent-relay` — drives a long-lived agent subprocess from a line REPL.
//!
//! Each line read from stdin is submitted as one turn; the turn's records are
//! printed to stdout as a single JSON line. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::config::GlobalConfig;
use agent_relay::observer::JsonlTranscriptWriter;
use agent_relay::{AppError, Result, SessionClient};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Turn-based relay to a long-lived agent subprocess", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the subprocess working directory.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Prompt submitted as the first turn right after spawn.
    #[arg(long)]
    seed: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(ws) = &args.workspace {
        config.set_workspace(ws)?;
    }
    info!(executable = %config.process.executable, "configuration loaded");

    // ── Build the client ────────────────────────────────
    let mut builder = SessionClient::builder(config.spawn_spec())
        .options(config.session_options())
        .queue_depth(config.session.queue_depth)
        .query_timeout(config.query_timeout());
    if let Some(dir) = &config.session.transcript_dir {
        builder = builder.observer(Arc::new(JsonlTranscriptWriter::new(dir.clone())?));
    }
    let client = Arc::new(builder.build());

    let snapshot = client.start(args.seed.as_deref()).await?;
    info!(session_id = ?snapshot.session_id, "session ready; reading prompts from stdin");

    let signal_client = Arc::clone(&client);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_client.cancel();
    });

    // ── REPL ────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!(%err, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match client.query(&line).await {
            Ok(response) => print_json(&response),
            Err(err) => {
                warn!(%err, "query failed");
                print_json(&json!({ "error": err.to_string(), "fatal": err.is_fatal() }));
                if err.is_fatal() || !client.is_alive() {
                    break;
                }
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────
    client.stop().await?;
    info!(snapshot = ?client.snapshot(), "agent-relay stopped");
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => error!(%err, "failed to serialize output"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
