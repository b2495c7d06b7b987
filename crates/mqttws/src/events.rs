//! Connection lifecycle events.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Lifecycle transitions reported by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The initial connection completed.
    Connected { session_present: bool },
    /// The connection dropped and the session is attempting recovery.
    Interrupted { reason: String },
    /// The connection was re-established after an interruption.
    Resumed { session_present: bool },
    /// The session was closed deliberately and will not reconnect.
    Closed,
}

type EventCallback = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Fan-out of lifecycle events to callbacks and channel subscribers.
///
/// Dispatch happens from the session's internal tasks, so callbacks must not
/// block. Channel subscribers whose receiver was dropped are pruned on the
/// next dispatch.
pub(crate) struct EventDispatcher {
    callbacks: Mutex<Vec<EventCallback>>,
    channels: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,
}

impl EventDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_callback<F>(&self, callback: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.callbacks.lock().push(Arc::new(callback));
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.lock().push(tx);
        rx
    }

    pub(crate) fn dispatch(&self, event: &ConnectionEvent) {
        tracing::debug!(?event, "dispatching connection event");

        let callbacks: Vec<EventCallback> = self.callbacks.lock().clone();
        for callback in callbacks {
            callback(event);
        }

        self.channels
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
