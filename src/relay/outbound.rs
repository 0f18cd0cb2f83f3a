//! Client -> upstream transformer.
//!
//! The single enforcement point preventing a client from injecting its own
//! system prompt, tool set, or resource limits. `session.update` messages
//! get every server-enforced field overwritten and the tool list replaced
//! with the registered schemas; everything else is forwarded untouched.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::tools::ToolRegistry;

use super::messages::ClientMessage;
use super::policy::SessionPolicy;

/// Applies the session policy to client messages. Cheap to clone; holds only
/// shared, immutable state.
#[derive(Debug, Clone)]
pub struct OutboundRewriter {
    policy: Arc<SessionPolicy>,
    registry: Arc<ToolRegistry>,
}

impl OutboundRewriter {
    pub fn new(policy: Arc<SessionPolicy>, registry: Arc<ToolRegistry>) -> Self {
        Self { policy, registry }
    }

    /// Rewrite one text frame from the client.
    ///
    /// Returns the frame to forward upstream: a rewritten copy for
    /// `session.update`, otherwise the input unchanged. Frames that fail to
    /// parse are forwarded as-is; the upstream rejects them itself.
    pub fn process(&self, raw: &str) -> String {
        let message = match ClientMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Unparseable client frame, forwarding unchanged: {e}");
                return raw.to_string();
            }
        };

        match message {
            ClientMessage::SessionUpdate(mut envelope) => {
                let session = &mut envelope.session;
                if let Some(model) = &self.policy.model {
                    session.model = Some(model.clone());
                }
                if let Some(instructions) = &self.policy.instructions {
                    session.instructions = Some(instructions.clone());
                }
                if let Some(temperature) = self.policy.temperature {
                    session.temperature = Some(temperature);
                }
                if let Some(max_tokens) = self.policy.max_response_output_tokens {
                    session.max_response_output_tokens = Some(Value::from(max_tokens));
                }
                if let Some(disable_audio) = self.policy.disable_audio {
                    session.disable_audio = Some(disable_audio);
                }
                if let Some(voice) = &self.policy.voice {
                    session.voice = Some(voice.clone());
                }

                // The tool list is always server-owned, even when empty.
                session.tools = Some(self.registry.schemas());
                session.tool_choice = Some(
                    if self.registry.is_empty() { "none" } else { "auto" }.to_string(),
                );

                match serde_json::to_string(&envelope) {
                    Ok(rewritten) => rewritten,
                    Err(e) => {
                        warn!("Failed to re-serialize session.update: {e}");
                        raw.to_string()
                    }
                }
            }
            ClientMessage::Passthrough => raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolError, ToolResult};
    use async_trait::async_trait;
    use serde_json::json;

    struct SearchStub;

    #[async_trait]
    impl Tool for SearchStub {
        fn name(&self) -> &str {
            "search"
        }

        fn schema(&self) -> Value {
            json!({"type": "function", "name": "search"})
        }

        async fn invoke(&self, _args: Value) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::upstream_text(""))
        }
    }

    fn rewriter(policy: SessionPolicy, with_tool: bool) -> OutboundRewriter {
        let mut registry = ToolRegistry::new();
        if with_tool {
            registry.register(Arc::new(SearchStub));
        }
        OutboundRewriter::new(Arc::new(policy), Arc::new(registry))
    }

    #[test]
    fn test_policy_overrides_client_session() {
        let policy = SessionPolicy {
            temperature: Some(0.2),
            ..SessionPolicy::new()
        };
        let rewriter = rewriter(policy, true);

        let raw = r#"{"type":"session.update","session":{"temperature":0.9,"tools":["x"]}}"#;
        let out: Value = serde_json::from_str(&rewriter.process(raw)).unwrap();

        assert_eq!(out["session"]["temperature"], json!(0.2));
        assert_eq!(
            out["session"]["tools"],
            json!([{"type": "function", "name": "search"}])
        );
        assert_eq!(out["session"]["tool_choice"], json!("auto"));
    }

    #[test]
    fn test_all_enforced_fields_overwritten() {
        let policy = SessionPolicy {
            model: Some("gpt-4o-realtime-preview".to_string()),
            instructions: Some("server prompt".to_string()),
            temperature: Some(0.4),
            max_response_output_tokens: Some(512),
            disable_audio: Some(false),
            voice: Some("alloy".to_string()),
            ..SessionPolicy::new()
        };
        let rewriter = rewriter(policy, false);

        let raw = r#"{"type":"session.update","session":{"instructions":"client prompt","voice":"echo","max_response_output_tokens":"inf"}}"#;
        let out: Value = serde_json::from_str(&rewriter.process(raw)).unwrap();
        let session = &out["session"];

        assert_eq!(session["model"], json!("gpt-4o-realtime-preview"));
        assert_eq!(session["instructions"], json!("server prompt"));
        assert_eq!(session["temperature"], json!(0.4));
        assert_eq!(session["max_response_output_tokens"], json!(512));
        assert_eq!(session["disable_audio"], json!(false));
        assert_eq!(session["voice"], json!("alloy"));
        assert_eq!(session["tool_choice"], json!("none"));
        assert_eq!(session["tools"], json!([]));
    }

    #[test]
    fn test_unset_policy_fields_keep_client_values() {
        let rewriter = rewriter(SessionPolicy::new(), false);

        let raw = r#"{"type":"session.update","session":{"instructions":"client prompt","temperature":0.7,"input_audio_format":"pcm16"}}"#;
        let out: Value = serde_json::from_str(&rewriter.process(raw)).unwrap();
        let session = &out["session"];

        assert_eq!(session["instructions"], json!("client prompt"));
        assert_eq!(session["temperature"], json!(0.7));
        // Non-enforced fields survive the rewrite verbatim
        assert_eq!(session["input_audio_format"], json!("pcm16"));
    }

    #[test]
    fn test_other_messages_pass_through_unchanged() {
        let rewriter = rewriter(SessionPolicy::new(), true);
        let raw = r#"{"type":"input_audio_buffer.append","audio":"AAAA"}"#;
        assert_eq!(rewriter.process(raw), raw);
    }

    #[test]
    fn test_unparseable_frame_forwarded() {
        let rewriter = rewriter(SessionPolicy::new(), true);
        assert_eq!(rewriter.process("not json"), "not json");
    }
}
