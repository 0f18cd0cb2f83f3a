//! Per-connection relay session.
//!
//! One task per client connection. The session dials the upstream realtime
//! endpoint, then runs two pumps until either side goes away: client frames
//! pass through the [`OutboundRewriter`] on their way upstream, upstream
//! frames pass through the [`InboundProcessor`] on their way back. Each
//! socket has a dedicated sender task fed by an mpsc channel, so the pumps
//! and the tool dispatcher can all emit frames without contending for the
//! sinks and without reordering anything.

use std::sync::Arc;

use axum::extract::ws::{Message as ClientMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use http::Request;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message as UpstreamMessage};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ServerConfig;
use crate::relay::{InboundProcessor, OutboundRewriter, RelayError, RelayResult};
use crate::state::AppState;

/// Depth of each sender channel. Backpressure propagates to the reading
/// pump once a peer stops draining its socket.
const SENDER_CHANNEL_CAPACITY: usize = 256;

/// Path of the realtime websocket on the upstream endpoint.
const UPSTREAM_REALTIME_PATH: &str = "/openai/realtime";

/// Builds the upstream websocket handshake request.
///
/// The endpoint scheme is mapped to `ws`/`wss`, the realtime path and the
/// `api-version`/`deployment` query parameters are applied, and the client
/// request id is propagated when the client supplied one.
fn build_upstream_request(
    config: &ServerConfig,
    auth_header: (&'static str, String),
    request_id: Option<&str>,
) -> RelayResult<Request<()>> {
    let mut url = Url::parse(&config.upstream_endpoint)
        .map_err(|e| RelayError::UpstreamConnection(format!("invalid endpoint: {e}")))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(RelayError::UpstreamConnection(format!(
                "unsupported endpoint scheme: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| RelayError::UpstreamConnection("invalid endpoint scheme".into()))?;
    url.set_path(UPSTREAM_REALTIME_PATH);
    url.query_pairs_mut()
        .append_pair("api-version", &config.api_version)
        .append_pair("deployment", &config.upstream_deployment);

    let host = url
        .host_str()
        .ok_or_else(|| RelayError::UpstreamConnection("endpoint has no host".into()))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let (auth_name, auth_value) = auth_header;
    let mut builder = Request::builder()
        .uri(url.as_str())
        .header(auth_name, auth_value)
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host);
    if let Some(id) = request_id {
        builder = builder.header("x-ms-client-request-id", id);
    }

    builder
        .body(())
        .map_err(|e| RelayError::UpstreamConnection(e.to_string()))
}

/// Runs one relay session to completion.
///
/// Returns once either socket closes or fails; the other side is torn down
/// on the way out. Connection resets during teardown are expected and only
/// logged at debug level.
pub async fn run_relay_session(
    client_socket: WebSocket,
    state: Arc<AppState>,
    request_id: Option<String>,
) {
    let auth_header = match state.credential.header().await {
        Ok(header) => header,
        Err(e) => {
            warn!("Failed to resolve upstream credential: {e}");
            return;
        }
    };

    let request = match build_upstream_request(&state.config, auth_header, request_id.as_deref()) {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to build upstream request: {e}");
            return;
        }
    };

    let (upstream_socket, _response) = match tokio_tungstenite::connect_async(request).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!("Failed to connect to upstream realtime endpoint: {e}");
            return;
        }
    };
    info!(
        deployment = %state.config.upstream_deployment,
        request_id = request_id.as_deref().unwrap_or("-"),
        "Relay session established"
    );

    let (mut client_sink, mut client_stream) = client_socket.split();
    let (mut upstream_sink, mut upstream_stream) = upstream_socket.split();

    let (client_tx, mut client_rx) = mpsc::channel::<String>(SENDER_CHANNEL_CAPACITY);
    let (upstream_tx, mut upstream_rx) = mpsc::channel::<String>(SENDER_CHANNEL_CAPACITY);

    // Sender tasks. Send errors here mean the peer is gone, so the task just
    // stops; the pump on the other side notices through the channel closing
    // or its own read failing.
    let client_sender = tokio::spawn(async move {
        while let Some(text) = client_rx.recv().await {
            if client_sink.send(ClientMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = client_sink.close().await;
    });
    let upstream_sender = tokio::spawn(async move {
        while let Some(text) = upstream_rx.recv().await {
            if upstream_sink.send(UpstreamMessage::text(text)).await.is_err() {
                break;
            }
        }
        let _ = upstream_sink.close().await;
    });

    let rewriter = OutboundRewriter::new(state.policy.clone(), state.registry.clone());
    let outbound_tx = upstream_tx.clone();
    let outbound_pump = async move {
        while let Some(frame) = client_stream.next().await {
            match frame {
                Ok(ClientMessage::Text(text)) => {
                    if outbound_tx.send(rewriter.process(text.as_str())).await.is_err() {
                        break;
                    }
                }
                Ok(ClientMessage::Binary(_)) => {
                    warn!("Dropping binary frame from client");
                }
                Ok(ClientMessage::Ping(_)) | Ok(ClientMessage::Pong(_)) => {}
                Ok(ClientMessage::Close(_)) => break,
                Err(e) => {
                    debug!("Client socket error: {e}");
                    break;
                }
            }
        }
    };

    let mut processor = InboundProcessor::new(state.policy.clone(), state.registry.clone());
    let inbound_upstream_tx = upstream_tx.clone();
    let inbound_client_tx = client_tx.clone();
    let inbound_pump = async move {
        while let Some(frame) = upstream_stream.next().await {
            match frame {
                Ok(UpstreamMessage::Text(text)) => {
                    match processor
                        .process(text.as_str(), &inbound_upstream_tx, &inbound_client_tx)
                        .await
                    {
                        Ok(Some(forward)) => {
                            if inbound_client_tx.send(forward).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!("Relay session ending: {e}");
                            break;
                        }
                    }
                }
                Ok(UpstreamMessage::Binary(_)) => {
                    warn!("Dropping binary frame from upstream");
                }
                Ok(UpstreamMessage::Ping(_))
                | Ok(UpstreamMessage::Pong(_))
                | Ok(UpstreamMessage::Frame(_)) => {}
                Ok(UpstreamMessage::Close(_)) => break,
                Err(e) => {
                    debug!("Upstream socket error: {e}");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = outbound_pump => debug!("Client side closed, tearing down relay session"),
        _ = inbound_pump => debug!("Upstream side closed, tearing down relay session"),
    }

    // Dropping the last channel handles lets the sender tasks drain their
    // queues and close the sinks.
    drop(client_tx);
    drop(upstream_tx);
    let _ = client_sender.await;
    let _ = upstream_sender.await;

    info!(
        request_id = request_id.as_deref().unwrap_or("-"),
        "Relay session closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::DEFAULT_API_VERSION;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 8765,
            upstream_endpoint: "https://example.openai.azure.com".into(),
            upstream_deployment: "gpt-4o-realtime".into(),
            upstream_api_key: Some("key".into()),
            upstream_bearer_token: None,
            api_version: DEFAULT_API_VERSION.into(),
            model: None,
            system_message: None,
            temperature: None,
            max_response_output_tokens: None,
            disable_audio: None,
            voice: None,
            search: None,
            cors_allowed_origins: None,
        }
    }

    #[test]
    fn upstream_request_targets_realtime_path() {
        let request =
            build_upstream_request(&test_config(), ("api-key", "key".into()), None).unwrap();

        let uri = request.uri().to_string();
        assert!(uri.starts_with("wss://example.openai.azure.com/openai/realtime?"));
        assert!(uri.contains("api-version=2024-10-01-preview"));
        assert!(uri.contains("deployment=gpt-4o-realtime"));
        assert_eq!(request.headers().get("api-key").unwrap(), "key");
        assert_eq!(
            request.headers().get("Host").unwrap(),
            "example.openai.azure.com"
        );
        assert!(request.headers().get("x-ms-client-request-id").is_none());
    }

    #[test]
    fn request_id_propagated_when_present() {
        let request = build_upstream_request(
            &test_config(),
            ("Authorization", "Bearer tok".into()),
            Some("req-123"),
        )
        .unwrap();

        assert_eq!(
            request.headers().get("x-ms-client-request-id").unwrap(),
            "req-123"
        );
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "Bearer tok"
        );
    }

    #[test]
    fn plain_http_endpoint_maps_to_ws() {
        let mut config = test_config();
        config.upstream_endpoint = "http://localhost:9100".into();

        let request =
            build_upstream_request(&config, ("api-key", "key".into()), None).unwrap();
        assert!(request.uri().to_string().starts_with("ws://localhost:9100/"));
        assert_eq!(request.headers().get("Host").unwrap(), "localhost:9100");
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let mut config = test_config();
        config.upstream_endpoint = "ftp://example.net".into();

        let err = build_upstream_request(&config, ("api-key", "key".into()), None).unwrap_err();
        assert!(matches!(err, RelayError::UpstreamConnection(_)));
    }
}
