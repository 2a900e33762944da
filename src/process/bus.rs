//! Lossless fan-out of session events.
//!
//! Every subscriber gets its own unbounded channel, so a slow subscriber
//! never causes another to miss an event and event order is preserved per
//! subscriber. Closed subscribers are pruned on the next publish.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::event::SessionEvent;
use crate::observer::SessionObserver;

/// Event bus shared by the reader, writer, monitor, and callers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl EventBus {
    /// Empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(_) => warn!("event bus: subscriber list poisoned, subscription is inert"),
        }
        rx
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&self, event: &SessionEvent) {
        let Ok(mut subs) = self.subscribers.lock() else {
            warn!(kind = event.kind(), "event bus: subscriber list poisoned, event dropped");
            return;
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Feed every future event to `observer` on a dedicated task, labelled
    /// with `session`.
    ///
    /// The task ends when the bus is closed or dropped.
    pub fn attach(&self, session: String, observer: Arc<dyn SessionObserver>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = observer.on_event(&session, &event) {
                    warn!(session, %err, kind = event.kind(), "event bus: observer failed");
                }
            }
            debug!(session, "event bus: observer detached");
        })
    }

    /// Live subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map_or(0, |subs| subs.len())
    }

    /// Drop every subscriber so their receivers observe the end of the stream.
    pub(crate) fn close(&self) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.clear();
        }
    }
}
