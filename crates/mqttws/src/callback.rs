//! Per-subscription message callback dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::packet::publish::Message;
use crate::topic::topic_matches_filter;

pub(crate) type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Routes inbound messages to the callbacks registered per topic filter.
///
/// A message is delivered once per matching filter, so overlapping
/// subscriptions each see it.
pub(crate) struct CallbackManager {
    callbacks: Mutex<HashMap<String, Vec<MessageCallback>>>,
}

impl CallbackManager {
    pub(crate) fn new() -> Self {
        Self {
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, filter: &str, callback: MessageCallback) {
        self.callbacks
            .lock()
            .entry(filter.to_string())
            .or_default()
            .push(callback);
    }

    pub(crate) fn remove(&self, filter: &str) {
        self.callbacks.lock().remove(filter);
    }

    pub(crate) fn clear(&self) {
        self.callbacks.lock().clear();
    }

    /// Drops every registration whose filter is not in `keep`.
    pub(crate) fn retain(&self, keep: &std::collections::HashSet<String>) {
        self.callbacks.lock().retain(|filter, _| keep.contains(filter));
    }

    pub(crate) fn dispatch(&self, message: &Message) {
        let matching: Vec<MessageCallback> = {
            let callbacks = self.callbacks.lock();
            callbacks
                .iter()
                .filter(|(filter, _)| topic_matches_filter(filter, &message.topic))
                .flat_map(|(_, list)| list.iter().cloned())
                .collect()
        };

        if matching.is_empty() {
            tracing::debug!(topic = %message.topic, "no callback registered for topic");
            return;
        }

        for callback in matching {
            callback(message.clone());
        }
    }
}
