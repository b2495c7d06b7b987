use crate::types::QoS;

/// Acknowledgement status of a tracked subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// SUBSCRIBE sent, SUBACK not yet received.
    Pending,
    /// Broker granted the subscription.
    Granted,
    /// Broker rejected the subscription.
    Rejected,
}

/// One entry in the session's subscription table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic_filter: String,
    pub qos: QoS,
    pub status: SubscriptionStatus,
}

impl Subscription {
    pub(crate) fn pending(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic_filter: filter.into(),
            qos,
            status: SubscriptionStatus::Pending,
        }
    }
}
