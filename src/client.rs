//! Caller-facing façade over one [`ProcessSession`] at a time.
//!
//! [`SessionClient::start`] builds a fresh [`TurnFeeder`] and
//! [`ProcessSession`], waits for readiness, and keeps the session's event
//! receiver. [`SessionClient::query`] submits one prompt and collects every
//! record tagged with its turn until the turn's result arrives. Concurrent
//! queries are serialized on the event receiver's lock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::feeder::{TurnFeeder, DEFAULT_QUEUE_DEPTH};
use crate::models::event::SessionEvent;
use crate::models::record::OutputRecord;
use crate::models::snapshot::SessionSnapshot;
use crate::observer::{SessionObserver, TracingObserver};
use crate::process::session::{ProcessSession, SessionOptions};
use crate::process::spawner::{SpawnSpec, Spawner, TokioSpawner};
use crate::{AppError, Result};

/// Outcome of one [`SessionClient::query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    /// Sequence number of the turn.
    pub turn: u64,
    /// Every record of the turn, in arrival order, ending with its result.
    pub records: Vec<OutputRecord>,
    /// Metadata carried by the result record.
    pub result: Option<Value>,
    /// Session state once the turn completed.
    pub snapshot: SessionSnapshot,
}

impl QueryResponse {
    /// Payloads of the turn's content records.
    #[must_use]
    pub fn content(&self) -> Vec<&Value> {
        self.records
            .iter()
            .filter_map(|record| match record {
                OutputRecord::Content { payload } => Some(payload),
                _ => None,
            })
            .collect()
    }
}

/// Builder for [`SessionClient`].
pub struct SessionClientBuilder {
    spec: SpawnSpec,
    options: SessionOptions,
    spawner: Arc<dyn Spawner>,
    observers: Vec<Arc<dyn SessionObserver>>,
    queue_depth: usize,
    query_timeout: Option<Duration>,
}

impl SessionClientBuilder {
    /// Session tunables.
    #[must_use]
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the spawn capability.
    #[must_use]
    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Attach `observer` to every session this client starts.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Turns that may wait behind the one in flight.
    #[must_use]
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Give up on a query after `limit`. The turn itself stays pending.
    #[must_use]
    pub fn query_timeout(mut self, limit: Option<Duration>) -> Self {
        self.query_timeout = limit;
        self
    }

    /// Build the client.
    #[must_use]
    pub fn build(self) -> SessionClient {
        SessionClient {
            spec: self.spec,
            options: self.options,
            spawner: self.spawner,
            observers: self.observers,
            queue_depth: self.queue_depth,
            query_timeout: self.query_timeout,
            active: Mutex::new(None),
            retired: Mutex::new(None),
            events: tokio::sync::Mutex::new(None),
        }
    }
}

#[derive(Clone)]
struct Active {
    session: Arc<ProcessSession>,
    feeder: TurnFeeder,
}

/// Submit-and-await API over a long-lived subprocess.
pub struct SessionClient {
    spec: SpawnSpec,
    options: SessionOptions,
    spawner: Arc<dyn Spawner>,
    observers: Vec<Arc<dyn SessionObserver>>,
    queue_depth: usize,
    query_timeout: Option<Duration>,
    active: Mutex<Option<Active>>,
    retired: Mutex<Option<SessionSnapshot>>,
    events: tokio::sync::Mutex<Option<UnboundedReceiver<SessionEvent>>>,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("program", &self.spec.program)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    /// Client for `spec` with default options, the Tokio spawner, and a
    /// [`TracingObserver`].
    #[must_use]
    pub fn new(spec: SpawnSpec) -> Self {
        Self::builder(spec).build()
    }

    /// Start configuring a client for `spec`.
    #[must_use]
    pub fn builder(spec: SpawnSpec) -> SessionClientBuilder {
        SessionClientBuilder {
            spec,
            options: SessionOptions::default(),
            spawner: Arc::new(TokioSpawner),
            observers: vec![Arc::new(TracingObserver)],
            queue_depth: DEFAULT_QUEUE_DEPTH,
            query_timeout: None,
        }
    }

    /// Spawn a fresh session and wait for its init record.
    ///
    /// `seed`, when given, is submitted as the first turn right after the
    /// spawn; its output is not returned.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] if a session is already running.
    /// - [`AppError::InvalidPrompt`] if `seed` cannot be encoded.
    /// - [`AppError::Spawn`] if the subprocess cannot be launched.
    /// - [`AppError::InitializationTimeout`] if no init record arrives within
    ///   the startup window; the session is torn down.
    /// - Any failure the session reports before readiness.
    pub async fn start(&self, seed: Option<&str>) -> Result<SessionSnapshot> {
        let mut events = self.events.lock().await;
        if let Some(active) = self.current() {
            if !active.session.state().is_closing() {
                return Err(AppError::InvalidState(format!(
                    "session already {}",
                    active.session.state()
                )));
            }
        }
        if let Some(seed) = seed {
            self.options.input_format.encode(seed)?;
        }

        let feeder = TurnFeeder::builder().queue_depth(self.queue_depth).build();
        let session = Arc::new(ProcessSession::new(
            self.spec.clone(),
            self.options.clone(),
            Arc::clone(&self.spawner),
        ));
        let mut rx = session.subscribe();
        for observer in &self.observers {
            session.attach(Arc::clone(observer));
        }

        self.set_current(Some(Active {
            session: Arc::clone(&session),
            feeder: feeder.clone(),
        }));

        session.start(feeder.produce_turns()?).await?;
        if let Some(seed) = seed {
            let seq = feeder.submit(seed)?;
            debug!(session = session.id(), seq, "seed turn submitted");
        }

        let limit = self.options.startup_timeout;
        let ready = match tokio::time::timeout(limit, wait_ready(&mut rx)).await {
            Ok(ready) => ready,
            Err(_) => Err(AppError::InitializationTimeout(format!(
                "no init record within {limit:?}"
            ))),
        };

        match ready {
            Ok(session_id) => {
                info!(session = session.id(), session_id, "client: session started");
                *events = Some(rx);
                Ok(session.snapshot())
            }
            Err(err) => {
                warn!(session = session.id(), %err, "client: start failed, tearing down");
                feeder.terminate();
                if let Err(term_err) = session.terminate().await {
                    warn!(session = session.id(), %term_err, "client: teardown failed");
                }
                Err(err)
            }
        }
    }

    /// Submit `prompt` and wait for its turn to complete.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] if the client was not started or the
    ///   session is no longer alive.
    /// - [`AppError::InvalidPrompt`] if the prompt cannot be encoded.
    /// - [`AppError::QueueFull`] if too many turns are already waiting.
    /// - [`AppError::Upstream`] if the subprocess reports an error.
    /// - [`AppError::PrematureExit`] if the subprocess exits mid-turn.
    /// - [`AppError::Cancelled`] if the session is cancelled or stopped.
    /// - [`AppError::QueryTimeout`] if the configured query timeout elapses.
    pub async fn query(&self, prompt: &str) -> Result<QueryResponse> {
        let mut events = self.events.lock().await;
        let (Some(rx), Some(active)) = (events.as_mut(), self.current()) else {
            return Err(AppError::InvalidState("client not started".into()));
        };
        let session = active.session;
        if !session.is_alive() {
            return Err(AppError::InvalidState(format!(
                "session is {}",
                session.state()
            )));
        }
        self.options.input_format.encode(prompt)?;

        // Leftovers from earlier turns or an abandoned query.
        let mut stale = 0_usize;
        while rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(session = session.id(), stale, "client: discarded stale events");
        }

        let turn = active.feeder.submit(prompt)?;
        debug!(session = session.id(), turn, "client: turn submitted");

        let collected = match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, collect_turn(rx, turn))
                .await
                .map_err(|_| {
                    AppError::QueryTimeout(format!("turn {turn} incomplete after {limit:?}"))
                })?,
            None => collect_turn(rx, turn).await,
        };
        let (records, result) = collected?;

        Ok(QueryResponse {
            turn,
            records,
            result,
            snapshot: session.snapshot(),
        })
    }

    /// Terminate the feeder and the session, then reset the turn counters.
    /// Idempotent.
    ///
    /// Afterwards [`snapshot`](Self::snapshot) reports the final state with
    /// `completed_turns == 0` until the next [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the subprocess survives a forced kill.
    pub async fn stop(&self) -> Result<()> {
        let Some(active) = self.current() else {
            return Ok(());
        };
        active.feeder.terminate();
        let terminated = active.session.terminate().await;

        // A query in flight has been rejected by now, releasing the receiver.
        let mut events = self.events.lock().await;
        *events = None;
        let mut last = active.session.snapshot();
        last.completed_turns = 0;
        debug!(session = active.session.id(), state = %last.process_state, "client: stopped");
        if let Ok(mut retired) = self.retired.lock() {
            *retired = Some(last);
        }
        self.set_current(None);
        terminated
    }

    /// Cancel the running session cooperatively. A pending query is rejected
    /// with [`AppError::Cancelled`].
    pub fn cancel(&self) {
        if let Some(active) = self.current() {
            active.feeder.terminate();
            active.session.cancel();
        }
    }

    /// Snapshot of the current session, or of the last one after
    /// [`stop`](Self::stop).
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        if let Some(active) = self.current() {
            return active.session.snapshot();
        }
        self.retired
            .lock()
            .ok()
            .and_then(|retired| retired.clone())
            .unwrap_or_else(SessionSnapshot::idle)
    }

    /// Whether a session is running and usable.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.current().is_some_and(|active| active.session.is_alive())
    }

    fn current(&self) -> Option<Active> {
        self.active.lock().ok().and_then(|active| active.clone())
    }

    fn set_current(&self, next: Option<Active>) {
        if let Ok(mut active) = self.active.lock() {
            *active = next;
        }
    }
}

async fn wait_ready(rx: &mut UnboundedReceiver<SessionEvent>) -> Result<String> {
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::SessionReady { session_id } => return Ok(session_id),
            SessionEvent::Failed(err) => return Err(err),
            _ => {}
        }
    }
    Err(AppError::PrematureExit(
        "session closed before the init record".into(),
    ))
}

/// Collect the records tagged with `turn` until its result arrives.
async fn collect_turn(
    rx: &mut UnboundedReceiver<SessionEvent>,
    turn: u64,
) -> Result<(Vec<OutputRecord>, Option<Value>)> {
    let mut records = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::RecordObserved {
                turn: Some(seq),
                record,
            } if seq == turn => match record {
                OutputRecord::UpstreamError { message } => {
                    return Err(AppError::Upstream(message));
                }
                OutputRecord::TurnResult { ref metadata } => {
                    let metadata = metadata.clone();
                    records.push(record);
                    return Ok((records, Some(metadata)));
                }
                record => records.push(record),
            },
            // Upstream errors are matched by their tagged record above; an
            // untagged one belongs to some other turn.
            SessionEvent::Failed(AppError::Upstream(message)) => {
                debug!(turn, error = %message, "client: ignoring upstream error of another turn");
            }
            SessionEvent::Failed(err) => return Err(err),
            SessionEvent::StateChanged { to, .. } if to.is_closing() => {
                return Err(AppError::Cancelled(format!(
                    "session {to} before turn {turn} completed"
                )));
            }
            _ => {}
        }
    }
    Err(AppError::Cancelled(format!(
        "session closed before turn {turn} completed"
    )))
}
