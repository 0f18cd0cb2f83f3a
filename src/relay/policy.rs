//! Server-enforced session policy.
//!
//! Every field set here overrides whatever the client puts into its
//! `session.update`, and is hidden again when the upstream echoes the session
//! back in `session.created`. Typically at least the system instructions and
//! the voice are set by the server.

/// Server-owned session configuration, immutable after construction and
/// shared across all connections.
#[derive(Debug, Clone, Default)]
pub struct SessionPolicy {
    /// Model name override.
    pub model: Option<String>,
    /// System instructions override.
    pub instructions: Option<String>,
    /// Temperature override.
    pub temperature: Option<f32>,
    /// Maximum response output tokens override.
    pub max_response_output_tokens: Option<i64>,
    /// Audio-disable override.
    pub disable_audio: Option<bool>,
    /// Voice override, also applied to redacted `session.created` copies.
    pub voice: Option<String>,
    /// Upstream protocol version used when opening the realtime socket.
    pub api_version: String,
}

/// Default protocol version for the upstream realtime endpoint.
pub const DEFAULT_API_VERSION: &str = "2024-10-01-preview";

impl SessionPolicy {
    /// Policy with no overrides and the default protocol version.
    pub fn new() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sets_api_version() {
        let policy = SessionPolicy::new();
        assert_eq!(policy.api_version, DEFAULT_API_VERSION);
        assert!(policy.instructions.is_none());
        assert!(policy.voice.is_none());
    }
}
