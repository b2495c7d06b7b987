use thiserror::Error;

use crate::packet::connack::ConnectReturnCode;
use crate::packet::suback::SubAckReturnCode;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Failure to turn a URI string into an [`crate::endpoint::Endpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("URI has no scheme: {0}")]
    MissingScheme(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URI has no host: {0}")]
    MissingHost(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),
}

/// Failure while establishing the transport connection.
///
/// Each variant maps to one stage of the connect sequence. A failed attempt is
/// fatal to that attempt; retry policy lives above the transport.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("DNS resolution failed: {0}")]
    DnsFailure(String),

    #[error("TCP connect failed: {0}")]
    TcpFailure(String),

    #[error("connect timeout exceeded")]
    TimeoutExceeded,

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailure(String),

    #[error("failed to sign upgrade request: {0}")]
    SigningFailure(String),

    #[error("WebSocket upgrade rejected with HTTP status {status}")]
    UpgradeRejected { status: u16 },

    #[error("WebSocket upgrade failed: {0}")]
    UpgradeFailed(String),

    #[error("connect attempt cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("IO error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("connection refused: {0:?}")]
    ConnectionRefused(ConnectReturnCode),

    #[error("subscription to {filter} rejected: {code:?}")]
    SubscriptionRejected {
        filter: String,
        code: SubAckReturnCode,
    },

    #[error("invalid topic name: {0}")]
    InvalidTopicName(String),

    #[error("invalid topic filter: {0}")]
    InvalidTopicFilter(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("operation timed out")]
    Timeout,

    #[error("keep alive timeout")]
    KeepAliveTimeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("connection interrupted")]
    Interrupted,

    #[error("connection closed by peer")]
    ConnectionClosedByPeer,

    #[error("packet identifier pool exhausted")]
    PacketIdExhausted,

    #[error("packet identifier already in use: {0}")]
    PacketIdInUse(u16),

    #[error("invalid session state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::session::ConnectionState,
        to: crate::session::ConnectionState,
    },

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_display() {
        let err = ConnectError::UpgradeRejected { status: 403 };
        assert_eq!(
            err.to_string(),
            "WebSocket upgrade rejected with HTTP status 403"
        );
    }

    #[test]
    fn test_parse_error_propagates_through_session_error() {
        let err: SessionError = ParseError::MissingHost("wss://".to_string()).into();
        assert_eq!(err.to_string(), "URI has no host: wss://");
    }

    #[test]
    fn test_error_from_io() {
        use std::io;
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err: SessionError = io_err.into();
        match err {
            SessionError::Io(msg) => assert!(msg.contains("reset by peer")),
            _ => panic!("expected Io error"),
        }
    }
}
