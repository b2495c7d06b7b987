//! Session state tracking.
//!
//! The connection state machine and the subscription table live here. The
//! state machine enforces which transitions are legal; everything else in the
//! client consults it rather than keeping its own flags.

mod subscription;

pub use subscription::{Subscription, SubscriptionStatus};

use parking_lot::Mutex;

use crate::error::{Result, SessionError};

/// Connection lifecycle states.
///
/// `Interrupted` is only reachable from `Connected`: a failure during the
/// initial connect surfaces as an error to the caller, not as an
/// interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Interrupted,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Interrupted => "interrupted",
            ConnectionState::Closing => "closing",
        };
        f.write_str(s)
    }
}

fn transition_allowed(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::{Closing, Connected, Connecting, Disconnected, Interrupted};
    matches!(
        (from, to),
        (Disconnected, Connecting)
            | (Connecting, Connected | Disconnected | Closing)
            | (Connected, Interrupted | Closing)
            | (Interrupted, Connecting | Connected | Closing | Disconnected)
            | (Closing, Disconnected)
    )
}

/// Tracks the connection state and the subscription table behind one lock.
pub(crate) struct SessionState {
    inner: Mutex<StateInner>,
}

struct StateInner {
    connection: ConnectionState,
    subscriptions: Vec<Subscription>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                connection: ConnectionState::Disconnected,
                subscriptions: Vec::new(),
            }),
        }
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.inner.lock().connection
    }

    /// Moves to `to`, rejecting transitions the lifecycle does not allow.
    pub(crate) fn transition(&self, to: ConnectionState) -> Result<()> {
        let mut inner = self.inner.lock();
        let from = inner.connection;
        if from == to {
            return Ok(());
        }
        if !transition_allowed(from, to) {
            return Err(SessionError::InvalidTransition { from, to });
        }
        tracing::debug!(%from, %to, "connection state transition");
        inner.connection = to;
        Ok(())
    }

    /// Records a subscription as pending until its SUBACK resolves it.
    pub(crate) fn track_subscription(&self, filter: &str, qos: crate::types::QoS) {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.topic_filter == filter)
        {
            existing.qos = qos;
            existing.status = SubscriptionStatus::Pending;
        } else {
            inner.subscriptions.push(Subscription::pending(filter, qos));
        }
    }

    pub(crate) fn resolve_subscription(&self, filter: &str, status: SubscriptionStatus) {
        let mut inner = self.inner.lock();
        if let Some(sub) = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.topic_filter == filter)
        {
            sub.status = status;
        }
    }

    pub(crate) fn remove_subscription(&self, filter: &str) {
        self.inner
            .lock()
            .subscriptions
            .retain(|s| s.topic_filter != filter);
    }

    /// Granted subscriptions to reissue when the broker lost session state.
    pub(crate) fn granted_subscriptions(&self) -> Vec<Subscription> {
        self.inner
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.status == SubscriptionStatus::Granted)
            .cloned()
            .collect()
    }

    pub(crate) fn clear_subscriptions(&self) {
        self.inner.lock().subscriptions.clear();
    }

    /// Drops every subscription whose filter is not in `keep`.
    pub(crate) fn retain_subscriptions(&self, keep: &std::collections::HashSet<String>) {
        self.inner
            .lock()
            .subscriptions
            .retain(|s| keep.contains(&s.topic_filter));
    }

    /// Full subscription table, whatever the ack status.
    pub(crate) fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.lock().subscriptions.clone()
    }
}
