//! Upgrade request signing.

use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::http::Request;

use crate::credentials::Credentials;
use crate::error::ConnectError;

/// Attaches authentication material to the WebSocket upgrade request.
///
/// Runs synchronously just before the handshake, after credentials have been
/// resolved, so the signature always covers the final request line.
pub trait UpgradeSigner: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ConnectError::SigningFailure`] when the request cannot be
    /// signed with the given credentials.
    fn sign(
        &self,
        request: &mut Request<()>,
        credentials: &Credentials,
    ) -> Result<(), ConnectError>;
}

/// Signer that passes credentials as plain request headers.
///
/// Suitable for gateways that validate the key id and session token
/// themselves. Brokers requiring a computed request signature need their own
/// [`UpgradeSigner`] implementation.
#[derive(Debug, Clone, Default)]
pub struct HeaderSigner;

impl HeaderSigner {
    pub fn new() -> Self {
        Self
    }
}

const KEY_ID_HEADER: HeaderName = HeaderName::from_static("x-mqttws-key-id");
const SESSION_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-mqttws-session-token");

impl UpgradeSigner for HeaderSigner {
    fn sign(
        &self,
        request: &mut Request<()>,
        credentials: &Credentials,
    ) -> Result<(), ConnectError> {
        if !credentials.access_key_id.is_empty() {
            let value = HeaderValue::from_str(&credentials.access_key_id)
                .map_err(|e| ConnectError::SigningFailure(e.to_string()))?;
            request.headers_mut().insert(KEY_ID_HEADER, value);
        }
        if let Some(token) = &credentials.session_token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| ConnectError::SigningFailure(e.to_string()))?;
            request.headers_mut().insert(SESSION_TOKEN_HEADER, value);
        }
        Ok(())
    }
}
