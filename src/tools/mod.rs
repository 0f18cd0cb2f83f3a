//! Server-side tool subsystem.
//!
//! Tools are capabilities the upstream model can invoke by name with
//! structured arguments. They are registered once at startup, looked up by
//! name during dispatch, and invisible to the client except for results a
//! tool explicitly routes client-side.

mod grounding;
mod search;

pub use grounding::GroundingTool;
pub use search::{SearchBackend, SearchTool};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

// =============================================================================
// Error Types
// =============================================================================

/// Errors a tool handler can surface.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The model sent arguments the tool could not parse.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// A backend request failed.
    #[error("Backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with an unusable payload.
    #[error("Backend error: {0}")]
    Backend(String),
}

// =============================================================================
// Tool Contract
// =============================================================================

/// Where a tool result is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolDestination {
    /// Fed back into the conversation as the function's return value.
    ToUpstream,
    /// Pushed to the client as an extension frame; the model sees an empty
    /// return value.
    ToClient,
}

/// Payload of a tool result.
#[derive(Debug, Clone)]
pub enum ToolPayload {
    /// Plain text.
    Text(String),
    /// Structured value, serialized when fed to the model or client.
    Json(Value),
}

/// Result of a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Result payload.
    pub payload: ToolPayload,
    /// Delivery destination.
    pub destination: ToolDestination,
}

impl ToolResult {
    /// Text result destined for the model.
    pub fn upstream_text(text: impl Into<String>) -> Self {
        Self {
            payload: ToolPayload::Text(text.into()),
            destination: ToolDestination::ToUpstream,
        }
    }

    /// Structured result pushed to the client.
    pub fn client_json(value: Value) -> Self {
        Self {
            payload: ToolPayload::Json(value),
            destination: ToolDestination::ToClient,
        }
    }

    /// Render the payload as text, serializing structured values.
    pub fn to_text(&self) -> String {
        match &self.payload {
            ToolPayload::Text(text) => text.clone(),
            ToolPayload::Json(value) => value.to_string(),
        }
    }
}

/// A server-side tool the model can call.
///
/// Implementations may perform their own network I/O but should not block
/// the transformer longer than necessary; the upstream pump waits on
/// `invoke` before processing the next inbound message.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name, used as the registry key and in function calls.
    fn name(&self) -> &str;

    /// JSON schema describing the function to the model.
    fn schema(&self) -> Value;

    /// Execute the tool with parsed arguments.
    async fn invoke(&self, args: Value) -> Result<ToolResult, ToolError>;
}

// =============================================================================
// Registry
// =============================================================================

/// Static mapping from tool name to implementation.
///
/// Populated at startup and read-only during serving, so it is shared across
/// connections without further synchronization.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Idempotent per name; the last registration wins.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool = tool.name(), "Registering tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Schemas of every registered tool, for the session tool list.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.values().map(|tool| tool.schema()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
