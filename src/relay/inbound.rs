//! Upstream -> client transformer and tool dispatch engine.
//!
//! Every inbound text frame is classified and handled synchronously before
//! the pump moves on, so messages within this direction keep strict receive
//! order. Function-call machinery is never forwarded: the client only ever
//! learns of tool activity through the `extension.middle_tier_tool_response`
//! frame, and only for tools that route their result client-side.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::tools::{ToolDestination, ToolRegistry};

use super::messages::{
    ClientNotice, ConversationItem, ItemCreatedEnvelope, OutputItemEnvelope, RelayEvent,
    ResponseDoneEnvelope, SessionEnvelope, UpstreamEvent,
};
use super::pending::PendingToolCalls;
use super::policy::SessionPolicy;
use super::{RelayError, RelayResult};

/// Per-connection inbound message processor.
///
/// Owns the connection's pending-call tracker; constructed fresh for every
/// session and never shared across connections.
pub struct InboundProcessor {
    policy: Arc<SessionPolicy>,
    registry: Arc<ToolRegistry>,
    pending: PendingToolCalls,
    /// Whether a function call output was injected since the last
    /// `response.done`. The model only resumes after its tool calls were
    /// satisfied if the relay asks it to.
    dispatched: bool,
}

impl InboundProcessor {
    pub fn new(policy: Arc<SessionPolicy>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            policy,
            registry,
            pending: PendingToolCalls::new(),
            dispatched: false,
        }
    }

    /// Number of tool calls currently tracked. Exposed for tests.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Process one text frame from the upstream socket.
    ///
    /// Returns the frame to forward to the client, or `None` when the frame
    /// is suppressed. Side messages (function call outputs, continuations,
    /// client notices) are sent through the channel handles feeding the two
    /// socket sender tasks.
    pub async fn process(
        &mut self,
        raw: &str,
        upstream_tx: &mpsc::Sender<String>,
        client_tx: &mpsc::Sender<String>,
    ) -> RelayResult<Option<String>> {
        let event = match UpstreamEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("Unparseable upstream frame, forwarding unchanged: {e}");
                return Ok(Some(raw.to_string()));
            }
        };

        match event {
            UpstreamEvent::SessionCreated(envelope) => {
                Ok(Some(self.redact_session_created(envelope)?))
            }

            UpstreamEvent::OutputItemAdded(OutputItemEnvelope { item, .. }) => {
                if item.is_function_call() {
                    Ok(None)
                } else {
                    Ok(Some(raw.to_string()))
                }
            }

            UpstreamEvent::ItemCreated(ItemCreatedEnvelope {
                previous_item_id,
                item,
                ..
            }) => {
                if item.is_function_call() {
                    if let Some(call_id) = &item.call_id {
                        self.pending.insert(call_id, previous_item_id);
                    } else {
                        warn!("function_call item without call_id, not tracking");
                    }
                    Ok(None)
                } else if item.is_function_call_output() {
                    // Hide the upstream's acknowledgment of the injected output.
                    Ok(None)
                } else {
                    Ok(Some(raw.to_string()))
                }
            }

            UpstreamEvent::FunctionCallArgumentsDelta
            | UpstreamEvent::FunctionCallArgumentsDone => Ok(None),

            UpstreamEvent::OutputItemDone(OutputItemEnvelope { item, .. }) => {
                if item.is_function_call() {
                    self.dispatch(&item, upstream_tx, client_tx).await?;
                    Ok(None)
                } else {
                    Ok(Some(raw.to_string()))
                }
            }

            UpstreamEvent::ResponseDone(envelope) => {
                self.finish_response(raw, envelope, upstream_tx).await
            }

            UpstreamEvent::Passthrough => Ok(Some(raw.to_string())),
        }
    }

    /// Forward a redacted copy of `session.created`: the client must not see
    /// the instructions, tool list, or token limits the server enforces.
    fn redact_session_created(&self, mut envelope: SessionEnvelope) -> RelayResult<String> {
        let session = &mut envelope.session;
        session.instructions = Some(String::new());
        session.tools = Some(Vec::new());
        session.tool_choice = Some("none".to_string());
        session.max_response_output_tokens = Some(Value::Null);
        session.voice = self.policy.voice.clone();
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Dispatch point: the upstream finalized a function call.
    ///
    /// Looks up the pending call and the named tool, invokes the handler,
    /// and injects the result as a `function_call_output`. Consistency
    /// failures and handler errors become error-shaped outputs so a bad
    /// call never takes the session down.
    async fn dispatch(
        &mut self,
        item: &ConversationItem,
        upstream_tx: &mpsc::Sender<String>,
        client_tx: &mpsc::Sender<String>,
    ) -> RelayResult<()> {
        let Some(call_id) = item.call_id.clone() else {
            warn!("function_call output item without call_id, dropping");
            return Ok(());
        };
        let name = item.name.clone().unwrap_or_default();

        let Some(call) = self.pending.remove(&call_id) else {
            warn!(call_id, tool = name, "Function call was never announced");
            return self
                .send_function_output(&call_id, error_output("unknown function call"), upstream_tx)
                .await;
        };

        let Some(tool) = self.registry.lookup(&name) else {
            warn!(call_id, tool = name, "No such tool registered");
            return self
                .send_function_output(&call_id, error_output("unknown tool"), upstream_tx)
                .await;
        };

        let args: Value = match serde_json::from_str(item.arguments.as_deref().unwrap_or("{}")) {
            Ok(args) => args,
            Err(e) => {
                warn!(call_id, tool = name, "Unparseable tool arguments: {e}");
                return self
                    .send_function_output(&call_id, error_output("invalid arguments"), upstream_tx)
                    .await;
            }
        };

        debug!(call_id, tool = name, "Dispatching tool call");
        match tool.invoke(args).await {
            Ok(result) => {
                let output = match result.destination {
                    ToolDestination::ToUpstream => result.to_text(),
                    ToolDestination::ToClient => String::new(),
                };
                self.send_function_output(&call_id, output, upstream_tx)
                    .await?;

                if result.destination == ToolDestination::ToClient {
                    let notice = ClientNotice::ToolResponse {
                        previous_item_id: call.previous_item_id,
                        tool_name: name,
                        tool_result: result.to_text(),
                    };
                    client_tx
                        .send(serde_json::to_string(&notice)?)
                        .await
                        .map_err(|_| RelayError::ChannelClosed)?;
                }
                Ok(())
            }
            Err(e) => {
                warn!(call_id, tool = name, "Tool handler failed: {e}");
                self.send_function_output(&call_id, error_output(&e.to_string()), upstream_tx)
                    .await
            }
        }
    }

    async fn send_function_output(
        &mut self,
        call_id: &str,
        output: String,
        upstream_tx: &mpsc::Sender<String>,
    ) -> RelayResult<()> {
        let event = RelayEvent::ConversationItemCreate {
            item: ConversationItem::function_call_output(call_id, output),
        };
        upstream_tx
            .send(serde_json::to_string(&event)?)
            .await
            .map_err(|_| RelayError::ChannelClosed)?;
        self.dispatched = true;
        Ok(())
    }

    /// Handle `response.done`: request a continuation if tool calls were in
    /// flight, and strip function-call entries from the output list before
    /// forwarding. The raw frame is reused byte-for-byte when nothing was
    /// removed.
    async fn finish_response(
        &mut self,
        raw: &str,
        mut envelope: ResponseDoneEnvelope,
        upstream_tx: &mpsc::Sender<String>,
    ) -> RelayResult<Option<String>> {
        if !self.pending.is_empty() || self.dispatched {
            self.pending.clear();
            self.dispatched = false;
            upstream_tx
                .send(serde_json::to_string(&RelayEvent::ResponseCreate)?)
                .await
                .map_err(|_| RelayError::ChannelClosed)?;
        }

        let before = envelope.response.output.len();
        envelope.response.output.retain(|item| !item.is_function_call());
        if envelope.response.output.len() == before {
            Ok(Some(raw.to_string()))
        } else {
            Ok(Some(serde_json::to_string(&envelope)?))
        }
    }
}

fn error_output(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

// =============================================================================
// Tests
// =============================================================================
