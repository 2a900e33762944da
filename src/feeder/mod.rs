//! Turn feeder: a lazy, single-use sequence of turns gated on caller submissions.
//!
//! The writer loop pulls turns from [`TurnFeeder::produce_turns`]. When no
//! submission is queued the sequence parks on a fresh [`Rendezvous`] slot;
//! [`TurnFeeder::submit`] settles that slot directly. Submissions that arrive
//! while the consumer is busy are held in a bounded queue instead of being
//! pushed into an already-settled slot.
//!
//! [`TurnFeeder::terminate`] is one-way: it rejects the parked slot, so the
//! sequence ends on its next suspension rather than polling a flag.

pub mod rendezvous;

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::Stream;
use tracing::{debug, warn};

use crate::models::turn::Turn;
use crate::{AppError, Result};

use self::rendezvous::{Rendezvous, Resolver};

/// Default bound on submissions waiting for the consumer.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Boxed stream of turns handed to the writer loop.
pub type TurnStream = Pin<Box<dyn Stream<Item = Turn> + Send>>;

type PromptHook = Box<dyn Fn(&str) + Send + Sync>;
type ErrorHook = Box<dyn Fn(&AppError) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    before_emit: Option<PromptHook>,
    on_error: Option<ErrorHook>,
}

struct FeederState {
    queue: VecDeque<Turn>,
    gate: Option<Resolver<Turn>>,
    next_seq: u64,
    terminated: bool,
}

struct FeederInner {
    state: Mutex<FeederState>,
    capacity: usize,
    hooks: Hooks,
    produced: AtomicBool,
}

/// Producer of turns for one process session. Cheap to clone.
#[derive(Clone)]
pub struct TurnFeeder {
    inner: Arc<FeederInner>,
}

impl std::fmt::Debug for TurnFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnFeeder")
            .field("capacity", &self.inner.capacity)
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`TurnFeeder`] with optional hooks.
#[derive(Default)]
pub struct TurnFeederBuilder {
    capacity: Option<usize>,
    hooks: Hooks,
}

impl TurnFeederBuilder {
    /// Bound on queued submissions. Zero is raised to one.
    #[must_use]
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.capacity = Some(depth.max(1));
        self
    }

    /// Called with the prompt text right before each turn is emitted.
    #[must_use]
    pub fn before_emit(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.before_emit = Some(Box::new(hook));
        self
    }

    /// Called when the sequence ends because of an error other than termination.
    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&AppError) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Box::new(hook));
        self
    }

    /// Build the feeder.
    #[must_use]
    pub fn build(self) -> TurnFeeder {
        TurnFeeder {
            inner: Arc::new(FeederInner {
                state: Mutex::new(FeederState {
                    queue: VecDeque::new(),
                    gate: None,
                    next_seq: 1,
                    terminated: false,
                }),
                capacity: self.capacity.unwrap_or(DEFAULT_QUEUE_DEPTH),
                hooks: self.hooks,
                produced: AtomicBool::new(false),
            }),
        }
    }
}

impl TurnFeeder {
    /// Feeder with the default queue depth and no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a feeder.
    #[must_use]
    pub fn builder() -> TurnFeederBuilder {
        TurnFeederBuilder::default()
    }

    /// Take the turn sequence. It can be taken once per feeder.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AlreadyConsumed`] on the second call.
    pub fn produce_turns(&self) -> Result<TurnStream> {
        if self.inner.produced.swap(true, Ordering::AcqRel) {
            return Err(AppError::AlreadyConsumed(
                "turn sequence already taken".into(),
            ));
        }
        let inner = Arc::clone(&self.inner);
        Ok(Box::pin(futures_util::stream::unfold(
            inner,
            |inner| async move {
                let turn = inner.next_turn().await?;
                Some((turn, inner))
            },
        )))
    }

    /// Submit the next prompt and return the sequence number of its turn.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] if the feeder was terminated.
    /// - [`AppError::QueueFull`] if the consumer is busy and the queue is full.
    pub fn submit(&self, prompt: impl Into<String>) -> Result<u64> {
        let mut state = self.inner.lock()?;
        if state.terminated {
            return Err(AppError::InvalidState("turn feeder terminated".into()));
        }

        let waiting = state.gate.as_ref().is_some_and(|gate| !gate.is_abandoned());
        if !waiting && state.queue.len() >= self.inner.capacity {
            return Err(AppError::QueueFull(format!(
                "{} turns already waiting",
                state.queue.len()
            )));
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let turn = Turn::new(seq, prompt);

        match state.gate.take() {
            Some(mut gate) => {
                if let Err((err, turn)) = gate.resolve(turn) {
                    debug!(seq, %err, "turn feeder: gate unavailable, queueing turn");
                    state.queue.push_back(turn);
                }
            }
            None => state.queue.push_back(turn),
        }
        Ok(seq)
    }

    /// End the sequence. Idempotent.
    ///
    /// Queued submissions are discarded and a parked consumer is released.
    pub fn terminate(&self) {
        self.close(AppError::Cancelled("turn feeder terminated".into()));
    }

    /// End the sequence with `err`, invoking the `on_error` hook.
    pub fn abort(&self, err: AppError) {
        self.close(err);
    }

    /// Whether [`terminate`](Self::terminate) or [`abort`](Self::abort) ran.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.lock().is_ok_and(|state| state.terminated)
    }

    /// Submissions accepted but not yet emitted.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.lock().map_or(0, |state| state.queue.len())
    }

    fn close(&self, err: AppError) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        if state.terminated {
            return;
        }
        state.terminated = true;
        let dropped = state.queue.len();
        state.queue.clear();
        if dropped > 0 {
            debug!(dropped, "turn feeder: discarded queued turns on close");
        }
        if let Some(mut gate) = state.gate.take() {
            if let Err(reject_err) = gate.reject(err) {
                warn!(%reject_err, "turn feeder: gate already settled on close");
            }
        }
    }
}

impl Default for TurnFeeder {
    fn default() -> Self {
        Self::new()
    }
}

impl FeederInner {
    fn lock(&self) -> Result<MutexGuard<'_, FeederState>> {
        self.state
            .lock()
            .map_err(|_| AppError::InvalidState("turn feeder mutex poisoned".into()))
    }

    async fn next_turn(&self) -> Option<Turn> {
        let slot = {
            let mut state = self.lock().ok()?;
            if state.terminated {
                return None;
            }
            if let Some(turn) = state.queue.pop_front() {
                drop(state);
                return Some(self.emit(turn));
            }
            let (resolver, slot) = Rendezvous::create();
            state.gate = Some(resolver);
            slot
        };

        match slot.wait().await {
            Ok(turn) => Some(self.emit(turn)),
            Err(AppError::Cancelled(reason)) => {
                debug!(reason, "turn feeder: sequence ended");
                None
            }
            Err(err) => {
                if let Some(hook) = &self.hooks.on_error {
                    hook(&err);
                }
                None
            }
        }
    }

    fn emit(&self, turn: Turn) -> Turn {
        if let Some(hook) = &self.hooks.before_emit {
            hook(turn.prompt());
        }
        turn
    }
}
