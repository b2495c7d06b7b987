//! Keep-alive: PINGREQ on idle, interruption when the broker goes quiet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::client::inner::SessionInner;
use crate::error::SessionError;
use crate::packet::Packet;

/// Tracks transport activity in both directions.
pub(crate) struct KeepAliveTracker {
    last_sent: Mutex<Instant>,
    last_received: Mutex<Instant>,
}

impl KeepAliveTracker {
    pub(crate) fn new() -> Self {
        let now = Instant::now();
        Self {
            last_sent: Mutex::new(now),
            last_received: Mutex::new(now),
        }
    }

    pub(crate) fn reset(&self) {
        let now = Instant::now();
        *self.last_sent.lock() = now;
        *self.last_received.lock() = now;
    }

    pub(crate) fn record_sent(&self) {
        *self.last_sent.lock() = Instant::now();
    }

    pub(crate) fn record_received(&self) {
        *self.last_received.lock() = Instant::now();
    }

    pub(crate) fn since_sent(&self) -> Duration {
        self.last_sent.lock().elapsed()
    }

    pub(crate) fn since_received(&self) -> Duration {
        self.last_received.lock().elapsed()
    }
}

/// Sends PINGREQ when the connection has been idle for the keep-alive
/// interval and declares the link lost when nothing arrives within a grace
/// window of one and a half intervals.
pub(crate) async fn run(inner: Arc<SessionInner>, link_tx: mpsc::UnboundedSender<String>) {
    let interval = inner.options.keep_alive;
    if interval.is_zero() {
        tracing::debug!("keep-alive disabled");
        return;
    }
    let grace = interval + interval / 2;
    let tick = interval / 4;

    loop {
        tokio::time::sleep(tick).await;

        if inner.keepalive.since_received() > grace {
            tracing::warn!("no broker activity within keep-alive grace window");
            let _ = link_tx.send(SessionError::KeepAliveTimeout.to_string());
            return;
        }

        if inner.keepalive.since_sent() >= interval {
            tracing::trace!("sending PINGREQ");
            if let Err(err) = inner.send_packet(&Packet::PingReq).await {
                let _ = link_tx.send(err.to_string());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_reports_elapsed() {
        let tracker = KeepAliveTracker::new();
        assert!(tracker.since_sent() < Duration::from_secs(1));

        std::thread::sleep(Duration::from_millis(10));
        assert!(tracker.since_sent() >= Duration::from_millis(10));

        tracker.record_sent();
        assert!(tracker.since_sent() < Duration::from_millis(10));
    }

    #[test]
    fn test_reset_touches_both_directions() {
        let tracker = KeepAliveTracker::new();
        std::thread::sleep(Duration::from_millis(10));
        tracker.reset();
        assert!(tracker.since_sent() < Duration::from_millis(10));
        assert!(tracker.since_received() < Duration::from_millis(10));
    }
}
