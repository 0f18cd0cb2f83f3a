//! HTTP handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::info;

use crate::relay::run_relay_session;
use crate::state::AppState;

/// Maximum WebSocket message size (10 MB). Realtime sessions stream audio
/// chunks as base64 inside JSON frames, so frames run large.
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Relay WebSocket handler
///
/// Upgrades the HTTP connection to WebSocket and hands it to a relay session
/// connected to the upstream realtime endpoint. The client's request id
/// header, when present, is forwarded upstream for end-to-end tracing.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let request_id = headers
        .get("x-ms-client-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    info!(
        request_id = request_id.as_deref().unwrap_or("-"),
        "Relay WebSocket connection upgrade requested"
    );

    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| run_relay_session(socket, state, request_id))
}

/// Liveness endpoint.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    #[tokio::test]
    async fn health_reports_service_name() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["service"], env!("CARGO_PKG_NAME"));
    }
}
