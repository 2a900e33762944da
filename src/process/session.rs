//! Process session: one long-lived subprocess driven turn by turn.
//!
//! A [`ProcessSession`] spawns the wrapped tool once and keeps its stdin open
//! for its whole lifetime. Per session it runs:
//!
//! - a **writer** task draining the [`TurnStream`] into stdin
//!   ([`run_writer`](crate::process::writer)),
//! - a **reader** task classifying stdout into [`OutputRecord`]s
//!   ([`run_reader`]),
//! - a **monitor** task owning the child handle,
//! - a **supervisor** judging the exit once the reader drained,
//! - a startup **watchdog** and a **cancellation** watcher.
//!
//! Writer and reader share only the [`ProcessState`] and the [`EventBus`].
//! Every state change and its `StateChanged` event happen under one lock, so
//! subscribers see transitions in the order they were applied.
//!
//! ```text
//! NotStarted -> Initializing -> Ready -> Processing <-> Paused
//!                     \____________\________/____________/
//!                                   v
//!                   Terminating -> Terminated      Error (terminal)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::feeder::TurnStream;
use crate::models::event::SessionEvent;
use crate::models::record::OutputRecord;
use crate::models::snapshot::SessionSnapshot;
use crate::models::state::ProcessState;
use crate::observer::SessionObserver;
use crate::process::bus::EventBus;
use crate::process::monitor::{spawn_monitor, MonitorHandle};
use crate::process::reader::{run_reader, ReaderExit};
use crate::process::spawner::{ExitInfo, SpawnSpec, SpawnedProcess, Spawner, StopSignal};
use crate::process::writer::{run_writer, InputFormat, WriterExit};
use crate::{AppError, Result};

/// Tunables for one process session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Window for the first output record after spawn.
    pub startup_timeout: Duration,
    /// Grace period after the termination signal before a forced kill.
    pub terminate_grace: Duration,
    /// How long the supervisor waits for buffered output after an exit.
    pub drain_timeout: Duration,
    /// Encoding of prompts on stdin.
    pub input_format: InputFormat,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            terminate_grace: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(1),
            input_format: InputFormat::default(),
        }
    }
}

/// State shared between the session's tasks.
#[derive(Debug)]
pub(crate) struct SessionShared {
    id: String,
    state: watch::Sender<ProcessState>,
    transition_lock: Mutex<()>,
    bus: EventBus,
    session_id: Mutex<Option<String>>,
    /// Sequence of the turn in flight; 0 when none has started.
    current_turn: AtomicU64,
    completed_turns: AtomicU64,
    saw_output: AtomicBool,
    first_output: Notify,
    monitor: OnceLock<MonitorHandle>,
    cancel: CancellationToken,
    writer_cancel: CancellationToken,
    writer_stopped: CancellationToken,
}

impl SessionShared {
    fn new(cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(ProcessState::NotStarted);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state,
            transition_lock: Mutex::new(()),
            bus: EventBus::new(),
            session_id: Mutex::new(None),
            current_turn: AtomicU64::new(0),
            completed_turns: AtomicU64::new(0),
            saw_output: AtomicBool::new(false),
            first_output: Notify::new(),
            monitor: OnceLock::new(),
            writer_cancel: cancel.child_token(),
            writer_stopped: CancellationToken::new(),
            cancel,
        }
    }

    /// Relay-local identifier used in logs.
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`; a poisoned lock carries no broken state.
        self.transition_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Apply a transition. Caller must hold the transition lock.
    fn apply(&self, next: ProcessState) -> bool {
        let mut from = None;
        let changed = self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                from = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });
        if let Some(from) = from {
            debug!(session = %self.id, %from, to = %next, "state transition");
            self.bus.publish(&SessionEvent::StateChanged { from, to: next });
        }
        changed
    }

    pub(crate) fn transition(&self, next: ProcessState) -> bool {
        let _guard = self.guard();
        self.apply(next)
    }

    /// Enter `Processing` for turn `seq`, if the state accepts a turn.
    pub(crate) fn begin_turn(&self, seq: u64) -> bool {
        let _guard = self.guard();
        if !self.state().accepts_turn() {
            return false;
        }
        self.current_turn.store(seq, Ordering::Release);
        self.apply(ProcessState::Processing)
    }

    /// Publish `err` for a turn that was never written. The state is unchanged.
    pub(crate) fn reject_turn(&self, seq: u64, err: AppError) {
        let _guard = self.guard();
        warn!(session = %self.id, turn = seq, error = %err, "turn rejected before write");
        self.bus.publish(&SessionEvent::Failed(err));
    }

    /// Publish `err` and move to `Error`.
    pub(crate) fn fail(&self, err: AppError) {
        let _guard = self.guard();
        warn!(session = %self.id, error = %err, state = %self.state(), "session failure");
        self.bus.publish(&SessionEvent::Failed(err));
        self.apply(ProcessState::Error);
    }

    fn turn_in_flight(&self) -> Option<u64> {
        if self.state() == ProcessState::Processing {
            Some(self.current_turn.load(Ordering::Acquire)).filter(|seq| *seq > 0)
        } else {
            None
        }
    }

    /// Reader callback: classify one record into state changes and events.
    fn observe(&self, record: OutputRecord) {
        if !self.saw_output.swap(true, Ordering::AcqRel) {
            self.first_output.notify_one();
        }

        let _guard = self.guard();
        let turn = self.turn_in_flight();

        match record {
            OutputRecord::SessionInit { ref session_id } => {
                let session_id = session_id.clone();
                if let Ok(mut slot) = self.session_id.lock() {
                    *slot = Some(session_id.clone());
                }
                self.bus.publish(&SessionEvent::RecordObserved { turn, record });
                if self.state() == ProcessState::Initializing {
                    self.apply(ProcessState::Ready);
                }
                info!(session = %self.id, session_id, "session ready");
                self.bus.publish(&SessionEvent::SessionReady { session_id });
            }
            OutputRecord::TurnResult { .. } => {
                if turn.is_some() {
                    self.completed_turns.fetch_add(1, Ordering::AcqRel);
                } else {
                    debug!(session = %self.id, "result record outside a turn");
                }
                if turn.is_some() {
                    self.apply(ProcessState::Paused);
                }
                self.bus.publish(&SessionEvent::RecordObserved { turn, record });
            }
            OutputRecord::UpstreamError { ref message } => {
                let err = AppError::Upstream(message.clone());
                self.bus.publish(&SessionEvent::RecordObserved { turn, record });
                self.bus.publish(&SessionEvent::Failed(err));
            }
            OutputRecord::Content { .. } | OutputRecord::Unknown { .. } => {
                self.bus.publish(&SessionEvent::RecordObserved { turn, record });
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            session_id: self.session_id.lock().ok().and_then(|id| id.clone()),
            process_state: state,
            is_alive: state.is_alive(),
            completed_turns: self.completed_turns.load(Ordering::Acquire),
        }
    }

    /// Close stdin, signal, wait out the grace period, then force-kill.
    async fn terminate(&self, grace: Duration) -> Result<()> {
        let state = {
            let _guard = self.guard();
            let state = self.state();
            if state.is_alive() {
                self.apply(ProcessState::Terminating);
            }
            state
        };
        if matches!(state, ProcessState::NotStarted | ProcessState::Terminated) {
            debug!(session = %self.id, %state, "terminate: nothing to do");
            return Ok(());
        }

        info!(session = %self.id, from = %state, "terminating subprocess");
        self.writer_cancel.cancel();
        let Some(monitor) = self.monitor.get() else {
            // Never spawned: nothing to signal.
            return Ok(());
        };
        if tokio::time::timeout(grace, self.writer_stopped.cancelled())
            .await
            .is_err()
        {
            warn!(session = %self.id, "terminate: writer did not stop within grace period");
        }

        if monitor.exit_info().is_none() {
            monitor.signal(StopSignal::Terminate);
            if monitor.exited_within(grace).await.is_none() {
                warn!(session = %self.id, ?grace, "terminate: no exit within grace period, killing");
                monitor.signal(StopSignal::Kill);
                if monitor.exited_within(grace).await.is_none() {
                    return Err(AppError::Io(format!(
                        "subprocess for session {} did not exit after kill",
                        self.id
                    )));
                }
            }
        }

        // The supervisor records the final state once buffered output drained.
        let mut state_rx = self.watch_state();
        let settled = tokio::time::timeout(
            grace,
            state_rx.wait_for(|s| matches!(s, ProcessState::Terminated | ProcessState::Error)),
        )
        .await;
        if settled.is_err() {
            warn!(session = %self.id, state = %self.state(), "terminate: final state not recorded in time");
        }
        Ok(())
    }
}

/// One long-lived subprocess plus the loops that drive it.
///
/// Not reusable: once `Terminated` or `Error`, build a new session.
pub struct ProcessSession {
    shared: Arc<SessionShared>,
    spec: SpawnSpec,
    options: SessionOptions,
    spawner: Arc<dyn Spawner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSession")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .field("program", &self.spec.program)
            .finish_non_exhaustive()
    }
}

impl ProcessSession {
    /// Build a session; nothing is spawned until [`start`](Self::start).
    #[must_use]
    pub fn new(spec: SpawnSpec, options: SessionOptions, spawner: Arc<dyn Spawner>) -> Self {
        Self::with_cancellation(spec, options, spawner, CancellationToken::new())
    }

    /// Build a session that stops cooperatively when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(
        spec: SpawnSpec,
        options: SessionOptions,
        spawner: Arc<dyn Spawner>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared::new(cancel)),
            spec,
            options,
            spawner,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Relay-local identifier used in logs and transcripts.
    #[must_use]
    pub fn id(&self) -> &str {
        self.shared.id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.shared.state()
    }

    /// Watch lifecycle state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ProcessState> {
        self.shared.watch_state()
    }

    /// Whether the subprocess is still usable.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    /// Identifier issued by the wrapped tool, once known.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id.lock().ok().and_then(|id| id.clone())
    }

    /// Point-in-time view for callers.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    /// Exit details once the subprocess has exited.
    #[must_use]
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.shared.monitor.get().and_then(MonitorHandle::exit_info)
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<SessionEvent> {
        self.shared.bus.subscribe()
    }

    /// Attach an observer that sees every event published from now on.
    pub fn attach(&self, observer: Arc<dyn SessionObserver>) {
        let handle = self.shared.bus.attach(self.shared.id.clone(), observer);
        self.track(handle);
    }

    /// Token that cancels this session cooperatively.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Cancel cooperatively: stop both loops and terminate the subprocess.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Spawn the subprocess and start the session's tasks.
    ///
    /// Returns once the process is running; readiness is signalled by a
    /// [`SessionEvent::SessionReady`] event.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] if the session was started before.
    /// - [`AppError::Spawn`] if the subprocess cannot be launched; the
    ///   session is then in `Error`.
    pub async fn start(&self, turns: TurnStream) -> Result<()> {
        if !self.shared.transition(ProcessState::Initializing) {
            return Err(AppError::InvalidState(format!(
                "session {} cannot start from {}",
                self.id(),
                self.state()
            )));
        }

        let SpawnedProcess {
            stdin,
            stdout,
            stderr,
            child,
        } = match self.spawner.spawn(&self.spec) {
            Ok(process) => process,
            Err(err) => {
                self.shared.fail(err.clone());
                return Err(err);
            }
        };

        let span = info_span!("process_session", id = %self.shared.id);
        let (monitor, monitor_task) = spawn_monitor(self.shared.id.clone(), child);
        // `start` runs once (guarded by the transition above), so the cell is empty.
        let _ = self.shared.monitor.set(monitor.clone());
        self.track(monitor_task);

        if let Some(stderr) = stderr {
            self.track(tokio::spawn(
                forward_stderr(self.shared.id.clone(), stderr).instrument(span.clone()),
            ));
        }

        let (reader_done_tx, reader_done_rx) = oneshot::channel();
        // Not tied to the session token: after a cancel the reader keeps
        // delivering buffered lines until EOF or the supervisor's drain limit.
        let reader_cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let cancel = reader_cancel.clone();
        self.track(tokio::spawn(
            async move {
                let session = shared.id.clone();
                let exit = run_reader(session, stdout, cancel, |record| {
                    shared.observe(record);
                })
                .await;
                if let ReaderExit::Failed(err) = &exit {
                    if shared.state().is_alive() {
                        shared.fail(err.clone());
                    }
                }
                let _ = reader_done_tx.send(exit);
            }
            .instrument(span.clone()),
        ));

        let shared = Arc::clone(&self.shared);
        let format = self.options.input_format;
        self.track(tokio::spawn(
            async move {
                let exit = run_writer(
                    Arc::clone(&shared),
                    stdin,
                    turns,
                    format,
                    shared.writer_cancel.clone(),
                )
                .await;
                if let WriterExit::Failed(err) = exit {
                    if shared.state().is_alive() {
                        shared.fail(err);
                    }
                }
                shared.writer_stopped.cancel();
            }
            .instrument(span.clone()),
        ));

        self.track(tokio::spawn(
            supervise_exit(
                Arc::clone(&self.shared),
                monitor.clone(),
                reader_done_rx,
                reader_cancel,
                self.options.drain_timeout,
            )
            .instrument(span.clone()),
        ));

        self.track(tokio::spawn(
            startup_watchdog(
                Arc::clone(&self.shared),
                monitor,
                self.options.startup_timeout,
            )
            .instrument(span.clone()),
        ));

        self.track(tokio::spawn(
            watch_cancellation(Arc::clone(&self.shared), self.options.terminate_grace)
                .instrument(span),
        ));

        info!(session = %self.shared.id, program = %self.spec.program, "process session started");
        Ok(())
    }

    /// Close stdin, send the termination signal, wait out the grace period,
    /// then force-kill. Idempotent; a no-op before `start` and after
    /// `Terminated`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the subprocess survives a forced kill.
    pub async fn terminate(&self) -> Result<()> {
        self.shared.terminate(self.options.terminate_grace).await
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle);
        }
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        // Let the cancellation watcher shut the subprocess down.
        if self.shared.state().is_alive() {
            self.shared.cancel.cancel();
        }
    }
}

/// Judge the exit once buffered output has drained.
async fn supervise_exit(
    shared: Arc<SessionShared>,
    monitor: MonitorHandle,
    reader_done: oneshot::Receiver<ReaderExit>,
    reader_cancel: CancellationToken,
    drain_timeout: Duration,
) {
    let exit = monitor.exited().await;
    if tokio::time::timeout(drain_timeout, reader_done).await.is_err() {
        debug!(session = %shared.id, "supervisor: reader still open after exit, cancelling");
    }
    reader_cancel.cancel();

    let reason = exit
        .as_ref()
        .map_or_else(|| "exit status unavailable".to_owned(), |e| e.reason.clone());
    let success = exit.as_ref().is_some_and(|e| e.success);

    match shared.state() {
        ProcessState::Terminating => {
            shared.transition(ProcessState::Terminated);
        }
        ProcessState::Initializing | ProcessState::Processing => {
            shared.fail(AppError::PrematureExit(format!(
                "{reason} while {}",
                shared.state()
            )));
        }
        ProcessState::Ready | ProcessState::Paused if success => {
            info!(session = %shared.id, "subprocess exited cleanly while idle");
            shared.transition(ProcessState::Terminated);
        }
        ProcessState::Ready | ProcessState::Paused => {
            shared.fail(AppError::PrematureExit(reason));
        }
        ProcessState::NotStarted | ProcessState::Terminated | ProcessState::Error => {}
    }

    shared.writer_cancel.cancel();
    shared.bus.close();
}

/// Fail the session if nothing is heard from the subprocess in time.
async fn startup_watchdog(shared: Arc<SessionShared>, monitor: MonitorHandle, limit: Duration) {
    tokio::select! {
        () = shared.first_output.notified() => {}
        _ = monitor.exited() => {}
        () = shared.cancel.cancelled() => {}
        () = tokio::time::sleep(limit) => {
            if !shared.saw_output.load(Ordering::Acquire) && shared.state().is_alive() {
                shared.fail(AppError::InitializationTimeout(format!(
                    "no output within {limit:?}"
                )));
                shared.writer_cancel.cancel();
                monitor.signal(StopSignal::Kill);
            }
        }
    }
}

/// Turn an external cancellation into a `Failed(Cancelled)` event plus termination.
async fn watch_cancellation(shared: Arc<SessionShared>, grace: Duration) {
    let mut state_rx = shared.watch_state();
    tokio::select! {
        () = shared.cancel.cancelled() => {}
        _ = state_rx.wait_for(|s| matches!(s, ProcessState::Terminated | ProcessState::Error)) => return,
    }

    if shared.state().is_alive() {
        info!(session = %shared.id, "cancellation received");
        shared
            .bus
            .publish(&SessionEvent::Failed(AppError::Cancelled("session cancelled".into())));
    }
    if let Err(err) = shared.terminate(grace).await {
        warn!(session = %shared.id, %err, "termination after cancellation failed");
    }
}

async fn forward_stderr(session: String, stderr: Box<dyn AsyncRead + Send + Unpin>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(session, "stderr: {line}");
    }
}
