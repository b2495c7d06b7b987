//! Pure URI-to-endpoint resolution.
//!
//! `resolve` never touches the network; DNS happens later, inside the
//! transport connect sequence.

use std::fmt;

use crate::error::ParseError;

/// Connection scheme accepted by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain MQTT over TCP.
    Mqtt,
    /// MQTT over TLS.
    Mqtts,
    /// MQTT over a TLS WebSocket.
    Wss,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Mqtt => 1883,
            Scheme::Mqtts => 8883,
            Scheme::Wss => 443,
        }
    }

    pub fn uses_tls(self) -> bool {
        matches!(self, Scheme::Mqtts | Scheme::Wss)
    }

    pub fn is_websocket(self) -> bool {
        matches!(self, Scheme::Wss)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Mqtt => "mqtt",
            Scheme::Mqtts => "mqtts",
            Scheme::Wss => "wss",
        }
    }
}

/// A resolved broker endpoint. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    scheme: Scheme,
    path: String,
}

impl Endpoint {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Resource path used for the WebSocket upgrade request.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` form for DNS lookup.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full URL for the WebSocket upgrade request.
    pub fn websocket_url(&self) -> String {
        format!("wss://{}:{}{}", self.host, self.port, self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

/// Parses a broker URI into an [`Endpoint`].
///
/// Accepts `mqtt://`, `mqtts://` and `wss://` URIs, with optional port and
/// (for WebSocket) optional path. A missing port takes the scheme default; a
/// missing WebSocket path defaults to `/mqtt`.
pub fn resolve(uri: &str) -> Result<Endpoint, ParseError> {
    let (scheme_str, rest) = uri
        .split_once("://")
        .ok_or_else(|| ParseError::MissingScheme(uri.to_string()))?;

    let scheme = match scheme_str.to_ascii_lowercase().as_str() {
        "mqtt" => Scheme::Mqtt,
        "mqtts" => Scheme::Mqtts,
        "wss" => Scheme::Wss,
        other => return Err(ParseError::UnsupportedScheme(other.to_string())),
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };

    if authority.is_empty() {
        return Err(ParseError::MissingHost(uri.to_string()));
    }

    let (host, port) = split_authority(authority, uri)?;
    let port = match port {
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidPort(p.to_string()))?,
        None => scheme.default_port(),
    };

    let path = if path.is_empty() && scheme.is_websocket() {
        "/mqtt".to_string()
    } else {
        path.to_string()
    };

    Ok(Endpoint {
        host,
        port,
        scheme,
        path,
    })
}

/// Splits `host[:port]`, handling `[v6]:port` bracket syntax.
fn split_authority<'a>(
    authority: &'a str,
    uri: &str,
) -> Result<(String, Option<&'a str>), ParseError> {
    if let Some(stripped) = authority.strip_prefix('[') {
        let (host, rest) = stripped
            .split_once(']')
            .ok_or_else(|| ParseError::MissingHost(uri.to_string()))?;
        if host.is_empty() {
            return Err(ParseError::MissingHost(uri.to_string()));
        }
        let port = match rest.strip_prefix(':') {
            Some(p) => Some(p),
            None if rest.is_empty() => None,
            None => return Err(ParseError::InvalidPort(rest.to_string())),
        };
        return Ok((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(ParseError::MissingHost(uri.to_string()));
            }
            Ok((host.to_string(), Some(port)))
        }
        None => Ok((authority.to_string(), None)),
    }
}
