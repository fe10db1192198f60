//! HTTP and WebSocket handlers for the TeamChat relay.
//!
//! Upgraded sockets are split into transport halves and handed to the
//! [`ChannelBroadcaster`], which owns the rest of the connection lifecycle.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, State},
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use teamchat_core::{ChannelBroadcaster, ChannelKey, ConnectionRegistry};
use teamchat_protocol::{close_code, Payload};
use teamchat_transport::websocket;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The channel broadcaster.
    pub broadcaster: ChannelBroadcaster,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with an empty registry.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            broadcaster: ChannelBroadcaster::new(Arc::new(ConnectionRegistry::new())),
            config,
        }
    }
}

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    let channel_route = state.config.transport.channel_route();
    let cors = cors_layer(&state.config.cors.allowed_origins);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ws/test", get(ws_test_handler))
        .route(&channel_route, get(ws_handler))
        .route("/api/channels/:channel_id/broadcast", post(push_handler))
        .route("/api/channels/:channel_id/members", get(members_handler))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let channel_route = config.transport.channel_route();
    let state = Arc::new(AppState::new(config));

    let listener = TcpListener::bind(addr).await?;

    info!("TeamChat relay listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, channel_route);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Root handler.
async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "message": "TeamChat relay",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.broadcaster.registry().stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": stats.channel_count,
        "connections": stats.connection_count
    }))
}

/// Describes where the channel socket lives.
async fn ws_test_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let prefix = state.config.transport.websocket_prefix.trim_end_matches('/');
    Json(json!({
        "message": "WebSocket routes are registered",
        "path": format!("{}/channel/{{channel_id}}", prefix),
        "status": "available"
    }))
}

/// WebSocket upgrade handler.
///
/// The channel key is validated after the upgrade so the client receives a
/// proper close frame rather than an HTTP error.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel_id): Path<String>,
    remote: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let remote_addr = remote.map(|ConnectInfo(addr)| addr);
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| async move {
            let _metrics_guard = ConnectionMetricsGuard::new();
            let (connection, source) = websocket::split(socket, remote_addr);
            debug!(
                channel = %channel_id,
                remote = ?remote_addr,
                "WebSocket connected"
            );

            let summary = state
                .broadcaster
                .handle_connect(connection, source, &channel_id)
                .await;

            metrics::record_session(&summary);
            metrics::set_active_channels(state.broadcaster.registry().stats().channel_count);
        })
}

fn invalid_channel() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": close_code::INVALID_CHANNEL_REASON })),
    )
}

/// Push a message from the server to every member of a channel.
async fn push_handler(
    Path(channel_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Payload>,
) -> impl IntoResponse {
    let Ok(channel) = ChannelKey::parse(&channel_id) else {
        return invalid_channel().into_response();
    };

    match state.broadcaster.broadcast(&channel, &payload, None).await {
        Ok(report) => {
            metrics::record_push(&report);
            debug!(
                channel = %channel,
                delivered = report.delivered,
                pruned = report.pruned,
                "Server push"
            );
            Json(report).into_response()
        }
        Err(e) => {
            error!(channel = %channel, error = %e, "Server push failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Report how many connections are joined to a channel.
async fn members_handler(
    Path(channel_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let Ok(channel) = ChannelKey::parse(&channel_id) else {
        return invalid_channel().into_response();
    };

    Json(json!({
        "channel_id": channel.to_string(),
        "members": state.broadcaster.registry().member_count(&channel)
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorsConfig, MetricsConfig, TransportConfig};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{
        connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
    };

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const KEY: &str = "6f1c2a1e-8b0e-4c7d-9a55-0f3e2b7d4c11";

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            transport: TransportConfig::default(),
            cors: CorsConfig {
                allowed_origins: Vec::new(),
            },
            metrics: MetricsConfig {
                enabled: false,
                port: 0,
            },
        }
    }

    async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
        let state = Arc::new(AppState::new(test_config()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = app(Arc::clone(&state));
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        (addr, state)
    }

    async fn next_json(client: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn join(addr: SocketAddr, key: &str) -> Client {
        let url = format!("ws://{}/ws/channel/{}", addr, key);
        let (mut client, _) = connect_async(url).await.unwrap();
        let ack = next_json(&mut client).await;
        assert_eq!(ack["type"], "connected");
        assert_eq!(ack["channel_id"], key);
        client
    }

    async fn wait_for_members(state: &AppState, channel: &ChannelKey, expected: usize) {
        for _ in 0..100 {
            if state.broadcaster.registry().member_count(channel) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.broadcaster.registry().member_count(channel), expected);
    }

    #[tokio::test]
    async fn test_relay_between_sockets() {
        let (addr, state) = spawn_server().await;
        let channel = ChannelKey::parse(KEY).unwrap();

        let mut a = join(addr, KEY).await;
        let mut b = join(addr, KEY).await;
        wait_for_members(&state, &channel, 2).await;

        a.send(Message::Text(r#"{"type":"message","content":"hi"}"#.to_string()))
            .await
            .unwrap();
        let relayed = next_json(&mut b).await;
        assert_eq!(relayed["type"], "message");
        assert_eq!(relayed["content"], "hi");

        b.send(Message::Text("not json".to_string())).await.unwrap();
        let reply = next_json(&mut b).await;
        assert_eq!(reply["error"], "Invalid JSON");
        assert_eq!(reply["received"], "not json");

        a.close(None).await.unwrap();
        b.close(None).await.unwrap();
        for _ in 0..100 {
            if !state.broadcaster.registry().contains_channel(&channel) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!state.broadcaster.registry().contains_channel(&channel));
    }

    #[tokio::test]
    async fn test_invalid_channel_closes_with_policy_violation() {
        let (addr, state) = spawn_server().await;
        let url = format!("ws://{}/ws/channel/not-a-uuid", addr);
        let (mut client, _) = connect_async(url).await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match msg {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), close_code::POLICY_VIOLATION);
                assert_eq!(frame.reason, close_code::INVALID_CHANNEL_REASON);
            }
            other => panic!("Expected close frame, got {:?}", other),
        }
        assert_eq!(state.broadcaster.registry().stats().channel_count, 0);
    }

    #[tokio::test]
    async fn test_server_push_and_member_count() {
        let (addr, state) = spawn_server().await;
        let mut a = join(addr, KEY).await;
        wait_for_members(&state, &ChannelKey::parse(KEY).unwrap(), 1).await;

        // Plain HTTP/1.1 on the same listener
        let body = r#"{"type":"announcement","text":"deploy"}"#;
        let request = format!(
            "POST /api/channels/{}/broadcast HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            KEY,
            addr,
            body.len(),
            body
        );
        let response = http_roundtrip(addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""delivered":1"#));

        let pushed = next_json(&mut a).await;
        assert_eq!(pushed["type"], "announcement");

        let request = format!(
            "GET /api/channels/{}/members HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            KEY, addr
        );
        let response = http_roundtrip(addr, &request).await;
        assert!(response.contains(r#""members":1"#));

        let request = format!(
            "GET /api/channels/nope/members HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            addr
        );
        let response = http_roundtrip(addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 400"));
    }

    async fn http_roundtrip(addr: SocketAddr, request: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8(response).unwrap()
    }
}
