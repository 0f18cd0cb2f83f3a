//! Shared application state.

use std::sync::Arc;

use crate::auth::{StaticTokenProvider, UpstreamCredential};
use crate::config::{ConfigError, ServerConfig};
use crate::relay::SessionPolicy;
use crate::tools::ToolRegistry;

/// State shared by every connection handler.
///
/// The policy and registry are built once at startup and never mutated
/// afterwards; per-connection state (pending tool calls, dispatch flags)
/// lives inside each relay session instead.
#[derive(Debug)]
pub struct AppState {
    pub config: ServerConfig,
    pub policy: Arc<SessionPolicy>,
    pub registry: Arc<ToolRegistry>,
    pub credential: Arc<UpstreamCredential>,
}

impl AppState {
    /// Builds the shared state from a validated configuration.
    ///
    /// The API key takes precedence over a bearer token when both are set.
    pub fn new(config: ServerConfig, registry: Arc<ToolRegistry>) -> Result<Arc<Self>, ConfigError> {
        let credential = if let Some(key) = &config.upstream_api_key {
            UpstreamCredential::ApiKey(key.clone())
        } else if let Some(token) = &config.upstream_bearer_token {
            UpstreamCredential::Bearer(Arc::new(StaticTokenProvider::new(token.clone())))
        } else {
            return Err(ConfigError::MissingCredential);
        };

        let policy = SessionPolicy {
            model: config.model.clone(),
            instructions: config.system_message.clone(),
            temperature: config.temperature,
            max_response_output_tokens: config.max_response_output_tokens,
            disable_audio: config.disable_audio,
            voice: config.voice.clone(),
            api_version: config.api_version.clone(),
        };

        Ok(Arc::new(Self {
            config,
            policy: Arc::new(policy),
            registry,
            credential: Arc::new(credential),
        }))
    }
}
