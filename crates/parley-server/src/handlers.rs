//! Connection handlers for the Parley server.
//!
//! This module handles the connection lifecycle and event dispatch.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parley_core::{ConnectionId, Hub, HubConfig, RoutingError};
use parley_protocol::{codec, ClientEvent, Encoded, ServerEvent, WireFormat, PROTOCOL_VERSION};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// Presence and routing hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub_config = HubConfig {
            max_connections: config.limits.max_connections,
        };

        Self {
            hub: Hub::with_config(hub_config),
            config,
        }
    }
}

/// Query parameters accepted on the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Wire format for events sent to this connection.
    pub format: Option<WireFormat>,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    serve(listener, config).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, config: Config) -> Result<()> {
    let addr = listener.local_addr()?;
    let ws_path = config.transport.websocket_path.clone();
    let state = Arc::new(AppState::new(config));

    info!("Parley server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, ws_path);

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let cors_enabled = state.config.cors.enabled;

    let router = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_enabled {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "connections": stats.connections,
        "online": stats.online,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !state.hub.has_capacity() {
        warn!("Refusing connection: maximum connections reached");
        metrics::record_error("capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    let format = params
        .format
        .unwrap_or(state.config.transport.default_format);

    ws.on_upgrade(move |socket| handle_websocket(socket, state, format))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, format: WireFormat) {
    let connection_id = ConnectionId::generate();

    let mut outbox = match state.hub.connect(connection_id.clone()) {
        Ok(outbox) => outbox,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Connection refused");
            metrics::record_error(e.reason());
            return;
        }
    };

    let _metrics_guard = ConnectionMetricsGuard::open(format);
    info!(connection = %connection_id, format = %format, "User connected");

    state.hub.send_to(
        &connection_id,
        ServerEvent::connected(connection_id.as_str(), PROTOCOL_VERSION),
    );

    let (mut sender, mut receiver) = socket.split();

    // Binary frames may carry partial or multiple envelopes
    let mut read_buffer = BytesMut::with_capacity(4096);
    let max_message_size = state.config.limits.max_message_size;

    let interval = state.config.heartbeat.interval();
    let timeout = state.config.heartbeat.timeout();
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            biased;

            // Events queued by the hub for this connection
            event = outbox.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut sender, format, &event).await.is_err() {
                    break;
                }
            }

            // Frames from the client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        last_seen = Instant::now();
                        match msg {
                            Message::Text(text) => {
                                let start = Instant::now();
                                if text.len() > max_message_size {
                                    warn!(connection = %connection_id, size = text.len(), "Message too large");
                                    metrics::record_error("too_large");
                                    continue;
                                }
                                match codec::decode_json::<ClientEvent>(&text) {
                                    Ok(event) => dispatch(&state, &connection_id, event, text.len()),
                                    Err(e) => {
                                        warn!(connection = %connection_id, error = %e, "Undecodable text frame");
                                        metrics::record_error("decode");
                                    }
                                }
                                metrics::record_latency(start.elapsed().as_secs_f64());
                            }
                            Message::Binary(data) => {
                                let start = Instant::now();
                                read_buffer.extend_from_slice(&data);
                                if read_buffer.len() > max_message_size {
                                    warn!(connection = %connection_id, size = read_buffer.len(), "Message too large");
                                    metrics::record_error("too_large");
                                    read_buffer.clear();
                                    continue;
                                }
                                decode_binary(&state, &connection_id, &mut read_buffer);
                                metrics::record_latency(start.elapsed().as_secs_f64());
                            }
                            Message::Ping(data) => {
                                if sender.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                            Message::Pong(_) => {}
                            Message::Close(_) => {
                                debug!(connection = %connection_id, "Received close frame");
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() > timeout {
                    info!(connection = %connection_id, "Heartbeat timeout");
                    metrics::record_error("heartbeat_timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(name) = state.hub.handle_disconnect(&connection_id) {
        debug!(connection = %connection_id, name = %name, "Identity released");
    }
    metrics::set_online(state.hub.stats().online);

    info!(connection = %connection_id, "User disconnected");
}

/// Decode every complete MessagePack envelope in the buffer.
fn decode_binary(state: &AppState, connection_id: &ConnectionId, buf: &mut BytesMut) {
    loop {
        let before = buf.len();
        match codec::decode_from::<ClientEvent>(buf) {
            Ok(Some(event)) => dispatch(state, connection_id, event, before - buf.len()),
            Ok(None) => break,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Undecodable binary frame");
                metrics::record_error("decode");
                buf.clear();
                break;
            }
        }
    }
}

/// Route a decoded client event through the hub.
///
/// Routing failures are never reported back to the client.
fn dispatch(state: &AppState, connection_id: &ConnectionId, event: ClientEvent, size: usize) {
    let name = event.name();
    metrics::record_event(name, size, "inbound");

    let result: Result<(), RoutingError> = match event {
        ClientEvent::Login(login) => {
            state
                .hub
                .register_identity(connection_id, login.username.clone())
                .map(|outcome| {
                    if let Some(displaced) = outcome.displaced {
                        info!(
                            connection = %connection_id,
                            displaced = %displaced,
                            name = %login.username,
                            "Display name taken over"
                        );
                    }
                    debug!(
                        connection = %connection_id,
                        name = %login.username,
                        recipients = outcome.recipients,
                        "Logged in"
                    );
                    metrics::set_online(state.hub.stats().online);
                })
        }
        ClientEvent::GroupMessage(payload) => state
            .hub
            .route_group_message(connection_id, payload)
            .map(|recipients| {
                trace!(connection = %connection_id, recipients = recipients, "Group message");
            }),
        ClientEvent::PrivateMessage(payload) => {
            state.hub.route_private_message(connection_id, payload)
        }
    };

    if let Err(e) = result {
        debug!(connection = %connection_id, event = name, error = %e, "Event dropped");
        metrics::record_dropped(e.reason());
    }
}

/// Encode and send a hub event to the WebSocket.
///
/// Only socket failures are returned; an event that cannot be encoded is
/// logged and skipped.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    format: WireFormat,
    event: &ServerEvent,
) -> Result<()> {
    let encoded = match format.encode(event) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!(event = event.name(), error = %e, "Failed to encode event");
            metrics::record_error("encode");
            return Ok(());
        }
    };

    metrics::record_event(event.name(), encoded.len(), "outbound");

    let message = match encoded {
        Encoded::Text(text) => Message::Text(text),
        Encoded::Binary(data) => Message::Binary(data.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}
