//! Upstream credential handling.
//!
//! The gateway authenticates to the upstream realtime endpoint either with a
//! static API key or with a bearer token sourced from a [`TokenProvider`].
//! Token providers are behind a trait so that deployments using managed
//! identity can plug in their own acquisition logic without touching the
//! relay; [`CachedTokenProvider`] wraps any provider with a TTL cache so a
//! burst of new sessions does not trigger a burst of token requests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to acquire bearer token: {0}")]
    TokenAcquisition(String),
}

/// Source of bearer tokens for the upstream endpoint.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, AuthError>;
}

/// Provider that always returns the same pre-issued token.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}

/// Wraps another provider and caches its token for a fixed TTL.
pub struct CachedTokenProvider {
    inner: Arc<dyn TokenProvider>,
    ttl: Duration,
    cached: RwLock<Option<(String, Instant)>>,
}

impl CachedTokenProvider {
    pub fn new(inner: Arc<dyn TokenProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: RwLock::new(None),
        }
    }
}

#[async_trait]
impl TokenProvider for CachedTokenProvider {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        {
            let cached = self.cached.read().await;
            if let Some((token, fetched_at)) = cached.as_ref() {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(token.clone());
                }
            }
        }
        let token = self.inner.bearer_token().await?;
        let mut cached = self.cached.write().await;
        *cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }
}

/// How a relay session authenticates to the upstream endpoint.
pub enum UpstreamCredential {
    /// Static key sent as an `api-key` header.
    ApiKey(String),
    /// Token provider whose output is sent as `Authorization: Bearer <token>`.
    Bearer(Arc<dyn TokenProvider>),
}

impl UpstreamCredential {
    /// Resolves the credential into a header name and value for the upstream
    /// websocket handshake.
    pub async fn header(&self) -> Result<(&'static str, String), AuthError> {
        match self {
            UpstreamCredential::ApiKey(key) => Ok(("api-key", key.clone())),
            UpstreamCredential::Bearer(provider) => {
                let token = provider.bearer_token().await?;
                Ok(("Authorization", format!("Bearer {token}")))
            }
        }
    }
}

impl std::fmt::Debug for UpstreamCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamCredential::ApiKey(_) => f.write_str("UpstreamCredential::ApiKey(..)"),
            UpstreamCredential::Bearer(_) => f.write_str("UpstreamCredential::Bearer(..)"),
        }
    }
}
