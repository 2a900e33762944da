//! Single-slot rendezvous between one external resolver and one waiter.
//!
//! [`Rendezvous::create`] returns a [`Resolver`] and a [`Slot`]. The slot is
//! awaited exactly once (it is consumed by [`Slot::wait`]); the resolver may
//! settle it exactly once. A second `resolve` or `reject` is refused with
//! [`AppError::AlreadyConsumed`] and hands the value back to the caller, so a
//! value meant for a suspended consumer is never silently dropped or parked
//! on a replacement slot.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::{AppError, Result};

const PENDING: u8 = 0;
const RESOLVED: u8 = 1;
const REJECTED: u8 = 2;

/// Settlement status of a rendezvous slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendezvousStatus {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with an error.
    Rejected,
}

/// Namespace for creating rendezvous pairs.
#[derive(Debug)]
pub struct Rendezvous;

impl Rendezvous {
    /// Create a fresh pending slot and the resolver that settles it.
    #[must_use]
    pub fn create<T>() -> (Resolver<T>, Slot<T>) {
        let (tx, rx) = oneshot::channel();
        let status = Arc::new(AtomicU8::new(PENDING));
        (
            Resolver {
                tx: Some(tx),
                status: Arc::clone(&status),
            },
            Slot { rx, status },
        )
    }
}

/// Settling half of a rendezvous.
#[derive(Debug)]
pub struct Resolver<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
    status: Arc<AtomicU8>,
}

impl<T> Resolver<T> {
    /// Hand `value` to the waiter.
    ///
    /// # Errors
    ///
    /// Returns `(AppError::AlreadyConsumed, value)` if the slot was already
    /// settled, or `(AppError::Cancelled, value)` if the waiter is gone. The
    /// value is returned so the caller can route it elsewhere.
    pub fn resolve(&mut self, value: T) -> std::result::Result<(), (AppError, T)> {
        if self.claim(RESOLVED).is_err() {
            return Err((
                AppError::AlreadyConsumed("rendezvous slot already settled".into()),
                value,
            ));
        }
        let Some(tx) = self.tx.take() else {
            return Err((
                AppError::AlreadyConsumed("rendezvous slot already settled".into()),
                value,
            ));
        };
        match tx.send(Ok(value)) {
            Err(Ok(value)) => Err((
                AppError::Cancelled("rendezvous waiter dropped".into()),
                value,
            )),
            Ok(()) | Err(Err(_)) => Ok(()),
        }
    }

    /// Settle the slot with `err`.
    ///
    /// Rejecting a slot whose waiter is gone is not an error: nobody is left
    /// to observe it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AlreadyConsumed`] if the slot was already settled.
    pub fn reject(&mut self, err: AppError) -> Result<()> {
        self.claim(REJECTED)
            .map_err(|()| AppError::AlreadyConsumed("rendezvous slot already settled".into()))?;
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err));
        }
        Ok(())
    }

    /// Current settlement status.
    #[must_use]
    pub fn status(&self) -> RendezvousStatus {
        decode_status(self.status.load(Ordering::Acquire))
    }

    /// Whether the waiting half has been dropped.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.tx.as_ref().is_none_or(oneshot::Sender::is_closed)
    }

    fn claim(&self, next: u8) -> std::result::Result<(), ()> {
        self.status
            .compare_exchange(PENDING, next, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ())
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        // A resolver dropped while pending rejects its slot so the waiter
        // wakes up instead of hanging.
        if self.tx.is_some() {
            let _ = self.claim(REJECTED);
        }
    }
}

/// Waiting half of a rendezvous. Consumed by [`Slot::wait`].
#[derive(Debug)]
pub struct Slot<T> {
    rx: oneshot::Receiver<Result<T>>,
    status: Arc<AtomicU8>,
}

impl<T> Slot<T> {
    /// Suspend until the slot is settled.
    ///
    /// # Errors
    ///
    /// Returns the rejection error, or [`AppError::Cancelled`] if the
    /// resolver was dropped without settling.
    pub async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(settled) => settled,
            Err(_) => Err(AppError::Cancelled(
                "rendezvous resolver dropped before settling".into(),
            )),
        }
    }

    /// Current settlement status.
    #[must_use]
    pub fn status(&self) -> RendezvousStatus {
        decode_status(self.status.load(Ordering::Acquire))
    }
}

fn decode_status(raw: u8) -> RendezvousStatus {
    match raw {
        RESOLVED => RendezvousStatus::Resolved,
        REJECTED => RendezvousStatus::Rejected,
        _ => RendezvousStatus::Pending,
    }
}
