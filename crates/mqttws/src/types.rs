use std::time::Duration;

use crate::error::{Result, SessionError};

/// MQTT Quality of Service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = SessionError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(SessionError::MalformedPacket(format!(
                "invalid QoS value: {value}"
            ))),
        }
    }
}

/// Reconnection backoff policy applied after a transport interruption.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: Some(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay to apply before the given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Immutable configuration for one [`crate::MqttSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl SessionOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_millis(3000),
            reconnect: ReconnectConfig::default(),
            username: None,
            password: None,
        }
    }

    /// Random `mqttws-<uuid>` client id.
    pub fn with_random_client_id() -> Self {
        Self::new(format!("mqttws-{}", uuid::Uuid::new_v4()))
    }

    #[must_use]
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_automatic_reconnect(mut self, enabled: bool) -> Self {
        self.reconnect.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl AsRef<[u8]>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.as_ref().to_vec());
        self
    }

    /// Keep-alive seconds clamped to the protocol's u16 field.
    pub fn keep_alive_secs(&self) -> u16 {
        u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX)
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::with_random_client_id()
    }
}

/// Outcome of a successful connect.
#[derive(Debug, Clone, Copy)]
pub struct ConnectResult {
    /// Whether the broker resumed existing session state.
    pub session_present: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_round_trip() {
        assert_eq!(QoS::try_from(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(QoS::try_from(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactlyOnce);
        assert!(QoS::try_from(3).is_err());
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            max_attempts: None,
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(8));
    }

    #[test]
    fn test_keep_alive_secs_clamped() {
        let options =
            SessionOptions::new("c").with_keep_alive(Duration::from_secs(u64::from(u16::MAX) + 5));
        assert_eq!(options.keep_alive_secs(), u16::MAX);
    }

    #[test]
    fn test_random_client_id_prefix() {
        let options = SessionOptions::with_random_client_id();
        assert!(options.client_id.starts_with("mqttws-"));
    }
}
