//! Configuration for the voice RAG gateway.
//!
//! All configuration comes from environment variables (a `.env` file is
//! honored via dotenvy in `main`). The upstream realtime endpoint and
//! deployment are required; everything else has a sensible default or is
//! optional. Search configuration is only assembled when both the search
//! endpoint and index are set, so the gateway can run as a plain relay
//! with no tools registered.

use std::env;

use thiserror::Error;

use crate::relay::DEFAULT_API_VERSION;

/// Default port matches the original deployment of this service.
const DEFAULT_PORT: u16 = 8765;
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_VOICE: &str = "alloy";
const DEFAULT_SEMANTIC_CONFIGURATION: &str = "default";
const DEFAULT_IDENTIFIER_FIELD: &str = "chunk_id";
const DEFAULT_CONTENT_FIELD: &str = "chunk";
const DEFAULT_EMBEDDING_FIELD: &str = "text_vector";
const DEFAULT_TITLE_FIELD: &str = "title";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    InvalidVar { name: &'static str, reason: String },
    #[error(
        "No upstream credential configured: set AZURE_OPENAI_API_KEY or AZURE_OPENAI_BEARER_TOKEN"
    )]
    MissingCredential,
}

/// Knowledge base search configuration.
///
/// Present only when `AZURE_SEARCH_ENDPOINT` and `AZURE_SEARCH_INDEX` are
/// both set; without it the gateway registers no tools.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub index: String,
    pub api_key: Option<String>,
    pub semantic_configuration: String,
    pub identifier_field: String,
    pub content_field: String,
    pub embedding_field: String,
    pub title_field: String,
    pub use_vector_query: bool,
}

/// Server configuration.
///
/// Contains everything needed to run the gateway: listener settings, the
/// upstream realtime endpoint and credentials, the session policy values
/// enforced on every connection, and optional search configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Listener settings
    pub host: String,
    pub port: u16,

    // Upstream realtime endpoint
    pub upstream_endpoint: String,
    pub upstream_deployment: String,
    pub upstream_api_key: Option<String>,
    pub upstream_bearer_token: Option<String>,
    pub api_version: String,

    // Session policy values
    pub model: Option<String>,
    pub system_message: Option<String>,
    pub temperature: Option<f32>,
    pub max_response_output_tokens: Option<i64>,
    pub disable_audio: Option<bool>,
    pub voice: Option<String>,

    // Knowledge base (optional)
    pub search: Option<SearchConfig>,

    // Security
    pub cors_allowed_origins: Option<String>,
}

impl ServerConfig {
    /// Loads configuration from environment variables and validates it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let upstream_endpoint = require_var("AZURE_OPENAI_ENDPOINT")?;
        let upstream_deployment = require_var("AZURE_OPENAI_REALTIME_DEPLOYMENT")?;

        let config = Self {
            host: optional_var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_var("PORT")?.unwrap_or(DEFAULT_PORT),
            upstream_endpoint,
            upstream_deployment,
            upstream_api_key: optional_var("AZURE_OPENAI_API_KEY"),
            upstream_bearer_token: optional_var("AZURE_OPENAI_BEARER_TOKEN"),
            api_version: optional_var("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            model: optional_var("AZURE_OPENAI_REALTIME_MODEL"),
            system_message: optional_var("SYSTEM_MESSAGE"),
            temperature: parse_var("TEMPERATURE")?,
            max_response_output_tokens: parse_var("MAX_RESPONSE_OUTPUT_TOKENS")?,
            disable_audio: parse_var("DISABLE_AUDIO")?,
            voice: optional_var("AZURE_OPENAI_REALTIME_VOICE_CHOICE")
                .or_else(|| Some(DEFAULT_VOICE.to_string())),
            search: Self::search_from_env(),
            cors_allowed_origins: optional_var("CORS_ALLOWED_ORIGINS"),
        };

        config.validate()?;
        Ok(config)
    }

    fn search_from_env() -> Option<SearchConfig> {
        let endpoint = optional_var("AZURE_SEARCH_ENDPOINT")?;
        let index = optional_var("AZURE_SEARCH_INDEX")?;
        Some(SearchConfig {
            endpoint,
            index,
            api_key: optional_var("AZURE_SEARCH_API_KEY"),
            semantic_configuration: optional_var("AZURE_SEARCH_SEMANTIC_CONFIGURATION")
                .unwrap_or_else(|| DEFAULT_SEMANTIC_CONFIGURATION.to_string()),
            identifier_field: optional_var("AZURE_SEARCH_IDENTIFIER_FIELD")
                .unwrap_or_else(|| DEFAULT_IDENTIFIER_FIELD.to_string()),
            content_field: optional_var("AZURE_SEARCH_CONTENT_FIELD")
                .unwrap_or_else(|| DEFAULT_CONTENT_FIELD.to_string()),
            embedding_field: optional_var("AZURE_SEARCH_EMBEDDING_FIELD")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_FIELD.to_string()),
            title_field: optional_var("AZURE_SEARCH_TITLE_FIELD")
                .unwrap_or_else(|| DEFAULT_TITLE_FIELD.to_string()),
            use_vector_query: optional_var("AZURE_SEARCH_USE_VECTOR_QUERY")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_api_key.is_none() && self.upstream_bearer_token.is_none() {
            return Err(ConfigError::MissingCredential);
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidVar {
                    name: "TEMPERATURE",
                    reason: format!("{temperature} is outside the range 0.0..=2.0"),
                });
            }
        }
        Ok(())
    }

    /// Listener address in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    optional_var(name).ok_or(ConfigError::MissingVar(name))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidVar {
                name,
                reason: e.to_string(),
            }),
    }
}
