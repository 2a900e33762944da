//! Exit monitor: the single owner of a subprocess's [`ChildHandle`].
//!
//! The monitor task waits for the child to exit while accepting
//! [`StopSignal`]s from the session, so signalling never races with the
//! wait for ownership of the handle. The exit is published once on a
//! `watch` channel that any number of waiters can observe.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::process::spawner::{ChildHandle, ExitInfo, StopSignal};

/// Session-side handle to a running exit monitor.
#[derive(Debug, Clone)]
pub(crate) struct MonitorHandle {
    signal_tx: mpsc::UnboundedSender<StopSignal>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

impl MonitorHandle {
    /// Ask the monitor to deliver `signal`. Returns `false` once the child exited.
    pub(crate) fn signal(&self, signal: StopSignal) -> bool {
        self.signal_tx.send(signal).is_ok()
    }

    /// Exit details, if the child has exited.
    pub(crate) fn exit_info(&self) -> Option<ExitInfo> {
        self.exit_rx.borrow().clone()
    }

    /// Wait for the exit.
    pub(crate) async fn exited(&self) -> Option<ExitInfo> {
        let mut rx = self.exit_rx.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone(),
            // Monitor gone without publishing: treat the current value as final.
            Err(_) => self.exit_info(),
        };
        exit
    }

    /// Wait for the exit, giving up after `limit`.
    pub(crate) async fn exited_within(&self, limit: Duration) -> Option<ExitInfo> {
        tokio::time::timeout(limit, self.exited())
            .await
            .ok()
            .flatten()
    }
}

/// Spawn the monitor task for `child`.
pub(crate) fn spawn_monitor(
    session: String,
    mut child: Box<dyn ChildHandle>,
) -> (MonitorHandle, JoinHandle<()>) {
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<StopSignal>();
    let (exit_tx, exit_rx) = watch::channel(None);

    let task = tokio::spawn(async move {
        let mut signals_open = true;
        let exit = loop {
            tokio::select! {
                result = child.wait() => {
                    break match result {
                        Ok(exit) => exit,
                        Err(err) => {
                            warn!(session, %err, "monitor: error waiting for subprocess");
                            ExitInfo {
                                code: None,
                                success: false,
                                reason: format!("wait error: {err}"),
                            }
                        }
                    };
                }
                signal = signal_rx.recv(), if signals_open => match signal {
                    Some(signal) => {
                        debug!(session, ?signal, pid = ?child.id(), "monitor: delivering signal");
                        if let Err(err) = child.kill(signal) {
                            warn!(session, ?signal, %err, "monitor: failed to deliver signal");
                        }
                    }
                    None => signals_open = false,
                },
            }
        };

        info!(session, code = ?exit.code, reason = %exit.reason, "subprocess exited");
        let _ = exit_tx.send(Some(exit));
    });

    (MonitorHandle { signal_tx, exit_rx }, task)
}
