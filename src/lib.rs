pub mod auth;
pub mod config;
pub mod handlers;
pub mod relay;
pub mod routes;
pub mod state;
pub mod tools;

// Re-export commonly used items for convenience
pub use config::{ServerConfig, SearchConfig};
pub use relay::{InboundProcessor, OutboundRewriter, SessionPolicy, run_relay_session};
pub use state::AppState;
pub use tools::{Tool, ToolRegistry, ToolResult};
