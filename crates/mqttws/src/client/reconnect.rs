//! Reconnect supervisor.
//!
//! One task per session lifetime. It waits for the I/O tasks to report link
//! loss, emits the interruption event, then retries with exponential backoff
//! until the connection resumes, the policy is exhausted, or the session is
//! closed. Pending operations are never failed by an interruption; they are
//! replayed after a resume and only drained when recovery is abandoned.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::client::inner::SessionInner;
use crate::error::SessionError;
use crate::events::ConnectionEvent;
use crate::session::ConnectionState;

pub(crate) async fn supervise(
    inner: Arc<SessionInner>,
    mut link_rx: mpsc::UnboundedReceiver<String>,
) {
    loop {
        let Some(reason) = link_rx.recv().await else {
            return;
        };

        if !inner.connected.swap(false, Ordering::SeqCst) {
            // close() already took the connection down.
            return;
        }
        if inner.state.transition(ConnectionState::Interrupted).is_err() {
            return;
        }

        inner.tasks.lock().abort_io();
        *inner.writer.lock().await = None;

        tracing::warn!(reason = %reason, "connection interrupted");
        inner
            .events
            .dispatch(&ConnectionEvent::Interrupted { reason });

        let Some(next_rx) = reconnect_loop(&inner).await else {
            return;
        };
        link_rx = next_rx;
    }
}

/// Retries until resumed. Returns the new link-loss channel on success and
/// `None` when recovery was abandoned.
async fn reconnect_loop(
    inner: &Arc<SessionInner>,
) -> Option<mpsc::UnboundedReceiver<String>> {
    let config = inner.options.reconnect.clone();
    if !config.enabled {
        abandon(inner, &SessionError::Interrupted);
        return None;
    }

    let endpoint = inner.endpoint.lock().clone()?;

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if let Some(max) = config.max_attempts {
            if attempt > max {
                tracing::error!(attempts = max, "reconnect attempts exhausted");
                abandon(inner, &SessionError::ReconnectExhausted { attempts: max });
                return None;
            }
        }

        let delay = config.delay_for_attempt(attempt);
        tracing::info!(attempt, ?delay, "scheduling reconnect");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = inner.close_notify.notified() => return None,
        }

        if inner.state.transition(ConnectionState::Connecting).is_err() {
            return None;
        }

        let result = tokio::select! {
            result = inner.establish(&endpoint) => result,
            () = inner.close_notify.notified() => return None,
        };

        match result {
            Ok((session_present, link_rx)) => {
                if inner.state.transition(ConnectionState::Connected).is_err() {
                    return None;
                }
                inner.connected.store(true, Ordering::SeqCst);
                inner.restore_session(session_present).await;
                tracing::info!(attempt, session_present, "connection resumed");
                inner
                    .events
                    .dispatch(&ConnectionEvent::Resumed { session_present });
                return Some(link_rx);
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, "reconnect attempt failed");
            }
        }
    }
}

fn abandon(inner: &Arc<SessionInner>, err: &SessionError) {
    inner.drain_pending(err);
    let _ = inner.state.transition(ConnectionState::Disconnected);
    inner.events.dispatch(&ConnectionEvent::Closed);
}
