//! Route configuration.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{health_check, relay_handler};
use crate::state::AppState;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET /realtime` - WebSocket upgrade for the realtime relay
///
/// After the upgrade the client speaks the realtime protocol directly; the
/// gateway rewrites `session.update`, redacts `session.created`, and keeps
/// function-call traffic server-side.
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/realtime", get(relay_handler))
        .layer(TraceLayer::new_for_http())
}

/// Create the public router with unauthenticated routes
pub fn create_public_router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
