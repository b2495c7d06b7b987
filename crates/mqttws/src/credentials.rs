//! Credential sourcing for signed WebSocket upgrades.
//!
//! Providers are queried at connect time, so a reconnect after a long
//! interruption always signs with fresh material. The [`CachingProvider`]
//! wrapper keeps a resolved set of credentials until they near expiry.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, SessionError};

/// A resolved set of signing credentials.
///
/// The secret key never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    pub expiry: Option<SystemTime>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_key: secret_key.into(),
            session_token: None,
            expiry: None,
        }
    }

    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expiry: SystemTime) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::ZERO)
    }

    /// True when the credentials expire within `margin` from now.
    /// Credentials without an expiry never expire.
    pub fn expires_within(&self, margin: Duration) -> bool {
        match self.expiry {
            Some(expiry) => match expiry.duration_since(SystemTime::now()) {
                Ok(remaining) => remaining <= margin,
                Err(_) => true,
            },
            None => false,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Source of signing credentials, queried before each connection attempt.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Resolves a usable set of credentials.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Credentials`] when no credentials can be
    /// resolved.
    async fn credentials(&self) -> Result<Credentials>;

    /// Discards any cached material, forcing the next call to re-resolve.
    ///
    /// Called when the broker rejects an upgrade with an auth failure.
    fn invalidate(&self) {}
}

/// Provider that always returns the same fixed credentials.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    credentials: Credentials,
}

impl StaticProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Anonymous credentials for brokers that authorize by network placement.
    pub fn anonymous() -> Self {
        Self::new(Credentials::new(String::new(), String::new()))
    }
}

#[async_trait]
impl CredentialsProvider for StaticProvider {
    async fn credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Reads credentials from environment variables.
///
/// With the default prefix the variables are `MQTTWS_ACCESS_KEY_ID`,
/// `MQTTWS_SECRET_ACCESS_KEY`, and optionally `MQTTWS_SESSION_TOKEN`.
#[derive(Debug, Clone)]
pub struct EnvProvider {
    prefix: String,
}

impl EnvProvider {
    pub fn new() -> Self {
        Self::with_prefix("MQTTWS")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var(&self, suffix: &str) -> Option<String> {
        std::env::var(format!("{}_{suffix}", self.prefix)).ok()
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialsProvider for EnvProvider {
    async fn credentials(&self) -> Result<Credentials> {
        let access_key_id = self.var("ACCESS_KEY_ID").ok_or_else(|| {
            SessionError::Credentials(format!(
                "{}_ACCESS_KEY_ID is not set",
                self.prefix
            ))
        })?;
        let secret_key = self.var("SECRET_ACCESS_KEY").ok_or_else(|| {
            SessionError::Credentials(format!(
                "{}_SECRET_ACCESS_KEY is not set",
                self.prefix
            ))
        })?;

        let mut credentials = Credentials::new(access_key_id, secret_key);
        if let Some(token) = self.var("SESSION_TOKEN") {
            credentials = credentials.with_session_token(token);
        }
        Ok(credentials)
    }
}

/// Tries each provider in order and returns the first success.
pub struct ProviderChain {
    providers: Vec<Arc<dyn CredentialsProvider>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    #[must_use]
    pub fn push(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.providers.push(provider);
        self
    }
}

impl Default for ProviderChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialsProvider for ProviderChain {
    async fn credentials(&self) -> Result<Credentials> {
        let mut last_error = None;
        for provider in &self.providers {
            match provider.credentials().await {
                Ok(credentials) => return Ok(credentials),
                Err(err) => {
                    tracing::debug!(error = %err, "credential provider failed, trying next");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            SessionError::Credentials("provider chain is empty".to_string())
        }))
    }

    fn invalidate(&self) {
        for provider in &self.providers {
            provider.invalidate();
        }
    }
}

/// Caches credentials from an inner provider until they near expiry.
///
/// Concurrent callers during a refresh do not stampede the inner provider:
/// the write lock is taken once and late arrivals re-check the cache.
pub struct CachingProvider {
    inner: Arc<dyn CredentialsProvider>,
    cached: RwLock<Option<Credentials>>,
    refresh_margin: Duration,
}

impl CachingProvider {
    pub fn new(inner: Arc<dyn CredentialsProvider>) -> Self {
        Self {
            inner,
            cached: RwLock::new(None),
            refresh_margin: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    fn usable(&self, credentials: &Credentials) -> bool {
        !credentials.expires_within(self.refresh_margin)
    }
}

#[async_trait]
impl CredentialsProvider for CachingProvider {
    async fn credentials(&self) -> Result<Credentials> {
        {
            let cached = self.cached.read().await;
            if let Some(credentials) = cached.as_ref() {
                if self.usable(credentials) {
                    return Ok(credentials.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(credentials) = cached.as_ref() {
            if self.usable(credentials) {
                return Ok(credentials.clone());
            }
        }

        tracing::debug!("refreshing credentials from inner provider");
        let fresh = self.inner.credentials().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    fn invalidate(&self) {
        // A held write lock means a refresh is already in flight and will
        // store fresh material anyway, so losing the race here is fine.
        if let Ok(mut cached) = self.cached.try_write() {
            *cached = None;
        }
        self.inner.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        expiry: Option<SystemTime>,
    }

    #[async_trait]
    impl CredentialsProvider for CountingProvider {
        async fn credentials(&self) -> Result<Credentials> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut credentials = Credentials::new(format!("key-{n}"), "secret");
            if let Some(expiry) = self.expiry {
                credentials = credentials.with_expiry(expiry);
            }
            Ok(credentials)
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl CredentialsProvider for FailingProvider {
        async fn credentials(&self) -> Result<Credentials> {
            Err(SessionError::Credentials("nothing here".to_string()))
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credentials =
            Credentials::new("AKID", "very-secret").with_session_token("tok-value-123");
        let output = format!("{credentials:?}");
        assert!(output.contains("AKID"));
        assert!(!output.contains("very-secret"));
        assert!(!output.contains("tok-value-123"));
    }

    #[test]
    fn test_expiry_checks() {
        let fresh = Credentials::new("k", "s");
        assert!(!fresh.is_expired());
        assert!(!fresh.expires_within(Duration::from_secs(3600)));

        let soon = Credentials::new("k", "s")
            .with_expiry(SystemTime::now() + Duration::from_secs(30));
        assert!(!soon.is_expired());
        assert!(soon.expires_within(Duration::from_secs(60)));

        let past = Credentials::new("k", "s")
            .with_expiry(SystemTime::now() - Duration::from_secs(1));
        assert!(past.is_expired());
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticProvider::new(Credentials::new("AKID", "secret"));
        let credentials = provider.credentials().await.unwrap();
        assert_eq!(credentials.access_key_id, "AKID");
    }

    #[tokio::test]
    async fn test_chain_returns_first_success() {
        let chain = ProviderChain::new()
            .push(Arc::new(FailingProvider))
            .push(Arc::new(StaticProvider::new(Credentials::new("AKID", "s"))));
        let credentials = chain.credentials().await.unwrap();
        assert_eq!(credentials.access_key_id, "AKID");
    }

    #[tokio::test]
    async fn test_empty_chain_errors() {
        let chain = ProviderChain::new();
        assert!(matches!(
            chain.credentials().await,
            Err(SessionError::Credentials(_))
        ));
    }

    #[tokio::test]
    async fn test_caching_provider_caches() {
        let inner = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            expiry: None,
        });
        let caching = CachingProvider::new(inner.clone());

        let first = caching.credentials().await.unwrap();
        let second = caching.credentials().await.unwrap();
        assert_eq!(first.access_key_id, second.access_key_id);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_caching_provider_refreshes_near_expiry() {
        let inner = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            expiry: Some(SystemTime::now() + Duration::from_secs(10)),
        });
        let caching =
            CachingProvider::new(inner.clone()).with_refresh_margin(Duration::from_secs(60));

        caching.credentials().await.unwrap();
        caching.credentials().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_clears_cache() {
        let inner = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            expiry: None,
        });
        let caching = CachingProvider::new(inner.clone());

        caching.credentials().await.unwrap();
        caching.invalidate();
        caching.credentials().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
