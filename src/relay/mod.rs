//! The realtime middle tier.
//!
//! A bidirectional proxy between an end-user websocket client and the
//! upstream realtime endpoint. The outbound transformer enforces the
//! server-side session policy, the inbound transformer redacts and
//! suppresses function-call machinery and drives tool dispatch, and the
//! session orchestrator runs the two pumps for the life of a connection.

mod inbound;
pub mod messages;
mod outbound;
mod pending;
mod policy;
mod session;

pub use inbound::InboundProcessor;
pub use outbound::OutboundRewriter;
pub use pending::{PendingToolCall, PendingToolCalls};
pub use policy::{DEFAULT_API_VERSION, SessionPolicy};
pub use session::run_relay_session;

use thiserror::Error;

/// Errors that end a relay pump.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The counterpart socket's sender task is gone.
    #[error("Relay channel closed")]
    ChannelClosed,

    /// A relay-constructed message failed to serialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The upstream websocket could not be opened.
    #[error("Upstream connection failed: {0}")]
    UpstreamConnection(String),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
