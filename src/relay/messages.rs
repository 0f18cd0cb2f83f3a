//! Wire-level message types for the realtime relay.
//!
//! The relay sits between a client speaking the upstream's own client-facing
//! schema and the Azure OpenAI Realtime WebSocket endpoint. Only the message
//! kinds the relay rewrites or suppresses are modeled as typed structs;
//! everything else flows through untouched as raw text.
//!
//! # Protocol Overview
//!
//! Inspected client events (client -> upstream):
//! - session.update - Session configuration, rewritten by the policy
//!
//! Inspected server events (upstream -> client):
//! - session.created - Redacted before forwarding
//! - response.output_item.added - Suppressed for function calls
//! - conversation.item.created - Tracked/suppressed for function calls
//! - response.function_call_arguments.delta / .done - Suppressed
//! - response.output_item.done - Tool dispatch point
//! - response.done - Continuation trigger, function calls stripped
//!
//! Relay-originated events:
//! - conversation.item.create - Function call output injection
//! - response.create - Continue after satisfied tool calls
//! - extension.middle_tier_tool_response - Client-side tool notification

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Item type string for a function call.
pub const FUNCTION_CALL: &str = "function_call";

/// Item type string for a function call output.
pub const FUNCTION_CALL_OUTPUT: &str = "function_call_output";

// =============================================================================
// Parsed Message Kinds
// =============================================================================

/// Minimal probe used to read the `type` discriminator before committing to a
/// full typed parse.
#[derive(Debug, Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    kind: String,
}

/// Client -> upstream messages, dispatched on `type`.
///
/// `Passthrough` carries no payload; the caller forwards the original raw
/// text so unmodeled messages never suffer re-serialization drift.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// `session.update` - the single policy enforcement point.
    SessionUpdate(SessionEnvelope),
    /// Any other message type, forwarded verbatim.
    Passthrough,
}

impl ClientMessage {
    /// Parse a raw text frame from the client.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let probe: TypeProbe = serde_json::from_str(raw)?;
        match probe.kind.as_str() {
            "session.update" => Ok(Self::SessionUpdate(serde_json::from_str(raw)?)),
            _ => Ok(Self::Passthrough),
        }
    }
}

/// Upstream -> client events, dispatched on `type`.
///
/// Variants carry only the fields that kind of message guarantees; unlisted
/// kinds fall into `Passthrough` and are forwarded verbatim.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// `session.created` - redacted before forwarding.
    SessionCreated(SessionEnvelope),
    /// `response.output_item.added`.
    OutputItemAdded(OutputItemEnvelope),
    /// `conversation.item.created`.
    ItemCreated(ItemCreatedEnvelope),
    /// `response.function_call_arguments.delta` - never shown to the client.
    FunctionCallArgumentsDelta,
    /// `response.function_call_arguments.done` - never shown to the client.
    FunctionCallArgumentsDone,
    /// `response.output_item.done` - the tool dispatch point.
    OutputItemDone(OutputItemEnvelope),
    /// `response.done`.
    ResponseDone(ResponseDoneEnvelope),
    /// Any other event type, forwarded verbatim.
    Passthrough,
}

impl UpstreamEvent {
    /// Parse a raw text frame from the upstream socket.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let probe: TypeProbe = serde_json::from_str(raw)?;
        match probe.kind.as_str() {
            "session.created" => Ok(Self::SessionCreated(serde_json::from_str(raw)?)),
            "response.output_item.added" => Ok(Self::OutputItemAdded(serde_json::from_str(raw)?)),
            "conversation.item.created" => Ok(Self::ItemCreated(serde_json::from_str(raw)?)),
            "response.function_call_arguments.delta" => Ok(Self::FunctionCallArgumentsDelta),
            "response.function_call_arguments.done" => Ok(Self::FunctionCallArgumentsDone),
            "response.output_item.done" => Ok(Self::OutputItemDone(serde_json::from_str(raw)?)),
            "response.done" => Ok(Self::ResponseDone(serde_json::from_str(raw)?)),
            _ => Ok(Self::Passthrough),
        }
    }
}

// =============================================================================
// Message Envelopes
// =============================================================================

/// A `session.update` or `session.created` message.
///
/// The `rest` map keeps top-level fields the relay does not model (e.g.
/// `event_id`) intact across a rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEnvelope {
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// The embedded session object.
    pub session: SessionSettings,
    /// Unmodeled top-level fields, preserved verbatim.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// A `response.output_item.added` or `response.output_item.done` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputItemEnvelope {
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// The output item.
    pub item: ConversationItem,
    /// Unmodeled top-level fields.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// A `conversation.item.created` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemCreatedEnvelope {
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Identifier of the item preceding the created one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_item_id: Option<String>,
    /// The created item.
    pub item: ConversationItem,
    /// Unmodeled top-level fields.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// A `response.done` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDoneEnvelope {
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// The completed response.
    pub response: ResponseSummary,
    /// Unmodeled top-level fields.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// The `response` object inside `response.done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSummary {
    /// Output items produced by the response.
    #[serde(default)]
    pub output: Vec<ConversationItem>,
    /// Unmodeled response fields.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

// =============================================================================
// Session Settings
// =============================================================================

/// The session object embedded in `session.update` / `session.created`.
///
/// Only the fields the relay enforces or redacts are typed; everything else
/// rides in `rest` and round-trips untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// System instructions for the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Temperature for response generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum response output tokens. Kept as a raw value because the wire
    /// format allows a number, the string "inf", or an explicit null.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<Value>,

    /// Whether audio output is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_audio: Option<bool>,

    /// Voice for audio output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Tool definitions (JSON schemas).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,

    /// Tool choice strategy ("auto" / "none" / ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Unmodeled session fields, preserved verbatim.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

// =============================================================================
// Conversation Items
// =============================================================================

/// A conversation or response output item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, function_call_output).
    #[serde(rename = "type")]
    pub item_type: String,
    /// Call ID for function calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments as a JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Unmodeled item fields, preserved verbatim.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl ConversationItem {
    /// Whether this item is a function call.
    pub fn is_function_call(&self) -> bool {
        self.item_type == FUNCTION_CALL
    }

    /// Whether this item is a function call output.
    pub fn is_function_call_output(&self) -> bool {
        self.item_type == FUNCTION_CALL_OUTPUT
    }

    /// Build a `function_call_output` item carrying a tool result.
    pub fn function_call_output(call_id: &str, output: String) -> Self {
        Self {
            id: None,
            item_type: FUNCTION_CALL_OUTPUT.to_string(),
            call_id: Some(call_id.to_string()),
            name: None,
            arguments: None,
            output: Some(output),
            rest: Map::new(),
        }
    }
}

// =============================================================================
// Relay-Originated Events
// =============================================================================

/// Events the relay itself sends to the upstream socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RelayEvent {
    /// Inject a conversation item (function call output).
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create.
        item: ConversationItem,
    },

    /// Ask the model to continue after its tool calls were satisfied.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

/// Extension frames the relay sends to the client.
///
/// This is the only path by which a client ever learns of tool activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientNotice {
    /// A tool routed its result to the client.
    #[serde(rename = "extension.middle_tier_tool_response")]
    ToolResponse {
        /// Item the function call followed in the conversation.
        previous_item_id: Option<String>,
        /// Name of the tool that ran.
        tool_name: String,
        /// Serialized tool result.
        tool_result: String,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_parse_session_update() {
        let raw = r#"{"type":"session.update","session":{"voice":"echo","turn_detection":{"type":"server_vad"}}}"#;
        match ClientMessage::parse(raw).unwrap() {
            ClientMessage::SessionUpdate(env) => {
                assert_eq!(env.kind, "session.update");
                assert_eq!(env.session.voice.as_deref(), Some("echo"));
                assert!(env.session.rest.contains_key("turn_detection"));
            }
            _ => panic!("Wrong message kind"),
        }
    }

    #[test]
    fn test_client_message_parse_passthrough() {
        let raw = r#"{"type":"input_audio_buffer.append","audio":"AAAA"}"#;
        assert!(matches!(
            ClientMessage::parse(raw).unwrap(),
            ClientMessage::Passthrough
        ));
    }

    #[test]
    fn test_upstream_event_parse_item_created() {
        let raw = r#"{"type":"conversation.item.created","event_id":"ev1","previous_item_id":"p0","item":{"type":"function_call","call_id":"c1","name":"search"}}"#;
        match UpstreamEvent::parse(raw).unwrap() {
            UpstreamEvent::ItemCreated(env) => {
                assert_eq!(env.previous_item_id.as_deref(), Some("p0"));
                assert!(env.item.is_function_call());
                assert_eq!(env.item.call_id.as_deref(), Some("c1"));
                assert_eq!(env.rest["event_id"], json!("ev1"));
            }
            _ => panic!("Wrong event kind"),
        }
    }

    #[test]
    fn test_upstream_event_parse_argument_streaming() {
        let delta = r#"{"type":"response.function_call_arguments.delta","call_id":"c1","delta":"{\"qu"}"#;
        assert!(matches!(
            UpstreamEvent::parse(delta).unwrap(),
            UpstreamEvent::FunctionCallArgumentsDelta
        ));

        let done = r#"{"type":"response.function_call_arguments.done","call_id":"c1","arguments":"{}"}"#;
        assert!(matches!(
            UpstreamEvent::parse(done).unwrap(),
            UpstreamEvent::FunctionCallArgumentsDone
        ));
    }

    #[test]
    fn test_session_envelope_round_trip_preserves_unknown_fields() {
        let raw = r#"{"type":"session.created","event_id":"ev2","session":{"id":"sess_1","voice":"alloy","input_audio_format":"pcm16"}}"#;
        let env: SessionEnvelope = serde_json::from_str(raw).unwrap();
        let out = serde_json::to_string(&env).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["event_id"], json!("ev2"));
        assert_eq!(value["session"]["id"], json!("sess_1"));
        assert_eq!(value["session"]["input_audio_format"], json!("pcm16"));
    }

    #[test]
    fn test_function_call_output_item() {
        let item = ConversationItem::function_call_output("c9", "42".to_string());
        let event = RelayEvent::ConversationItemCreate { item };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("conversation.item.create"));
        assert!(json.contains("function_call_output"));
        assert!(json.contains("\"call_id\":\"c9\""));
        assert!(json.contains("\"output\":\"42\""));
        // Absent optional fields must not serialize
        assert!(!json.contains("arguments"));
    }

    #[test]
    fn test_response_create_serialization() {
        let json = serde_json::to_string(&RelayEvent::ResponseCreate).unwrap();
        assert_eq!(json, r#"{"type":"response.create"}"#);
    }

    #[test]
    fn test_client_notice_serialization() {
        let notice = ClientNotice::ToolResponse {
            previous_item_id: Some("p1".to_string()),
            tool_name: "report_grounding".to_string(),
            tool_result: r#"{"sources":[]}"#.to_string(),
        };
        let json = serde_json::to_string(&notice).unwrap();
        assert!(json.contains("extension.middle_tier_tool_response"));
        assert!(json.contains("\"previous_item_id\":\"p1\""));
        assert!(json.contains("report_grounding"));
    }

    #[test]
    fn test_response_done_parse() {
        let raw = r#"{"type":"response.done","response":{"id":"resp_1","status":"completed","output":[{"type":"message","id":"i1"},{"type":"function_call","call_id":"c1","name":"search","arguments":"{}"}]}}"#;
        match UpstreamEvent::parse(raw).unwrap() {
            UpstreamEvent::ResponseDone(env) => {
                assert_eq!(env.response.output.len(), 2);
                assert!(env.response.output[1].is_function_call());
                assert_eq!(env.response.rest["status"], json!("completed"));
            }
            _ => panic!("Wrong event kind"),
        }
    }
}
