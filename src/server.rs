//! HTTP + WebSocket front door (spec.md §6 transport, §6 HTTP probes,
//! §10.5 metrics). Grounded on the teacher's `http.rs` for the axum
//! `Router`/`TcpListener` shape and on `groblegark-coop`'s
//! `transport/ws.rs` for the `WebSocketUpgrade` → per-connection
//! `tokio::select!` loop pattern (this crate has no teacher precedent for
//! a WebSocket gateway — the IRC daemon's gateway is a raw `TcpListener`
//! line protocol, so the socket-handling shape is grounded on the sibling
//! example instead; see DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use relay_proto::{OutboundEvent, WireMessage};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::handlers;
use crate::state::sink::{CloseReason, ConnectionSink};
use crate::state::Hub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub shutdown: broadcast::Sender<()>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_probe))
        .route("/health", get(health_probe))
        .route("/metrics", get(metrics_probe))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// `GET /` (spec.md §6): `{ status:"running", drivers:<int>, uptime:<seconds> }`.
async fn root_probe(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.hub.clock.now().duration_since(state.hub.started_at).as_secs();
    axum::Json(json!({
        "status": "running",
        "drivers": state.hub.live_driver_count(),
        "uptime": uptime,
    }))
}

/// `GET /health` (spec.md §6): `{ status:"healthy", timestamp }`.
async fn health_probe() -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

async fn metrics_probe(State(state): State<AppState>) -> impl IntoResponse {
    crate::metrics::gather(&state.hub)
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bridges `ConnectionSink::send` (synchronous, fire-and-forget from the
/// registry/fan-out's point of view) to the async `SplitSink` half of the
/// WebSocket, via an unbounded channel so a send from inside a registry
/// lock never awaits.
struct WsSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl ConnectionSink for WsSink {
    fn send(&self, event: OutboundEvent) -> Result<(), ()> {
        let wire = event.to_wire();
        let text = serde_json::to_string(&wire).map_err(|_| ())?;
        self.tx.send(Message::Text(text)).map_err(|_| ())
    }

    fn close(&self, _reason: CloseReason) {
        let _ = self.tx.send(Message::Close(None));
    }
}

/// Per-connection task: owns the socket for its lifetime, forwards inbound
/// frames to [`handlers::dispatch`], forwards outbound frames queued by
/// [`WsSink::send`] back out over the socket, runs the transport keepalive
/// (spec.md §5), and reacts to the process-wide shutdown broadcast
/// (spec.md §5, §11.1).
async fn handle_socket(socket: WebSocket, state: AppState) {
    let hub = state.hub;
    let connection_id = hub.next_connection_id();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    hub.connections
        .insert(connection_id, Arc::new(WsSink { tx: out_tx }) as Arc<dyn ConnectionSink>);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut shutdown_rx = state.shutdown.subscribe();

    let ping_interval = Duration::from_secs(hub.config.limits.ping_interval_secs);
    let pong_timeout = Duration::from_secs(hub.config.limits.ping_timeout_secs);
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    'connection: loop {
        let deadline_wait = async {
            match pong_deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                let _ = ws_tx.send(to_ws_message(&OutboundEvent::ServerShutdown {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                })).await;
                break 'connection;
            }

            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_text(&hub, connection_id, &text);
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Ok(text) = String::from_utf8(bytes) {
                            dispatch_text(&hub, connection_id, &text);
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws_tx.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break 'connection,
                    Some(Err(err)) => {
                        debug!(connection_id, error = %err, "websocket read error");
                        break 'connection;
                    }
                }
            }

            outbound = out_rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if ws_tx.send(msg).await.is_err() {
                            break 'connection;
                        }
                    }
                    None => break 'connection,
                }
            }

            _ = ticker.tick(), if pong_deadline.is_none() => {
                pong_deadline = Some(tokio::time::Instant::now() + pong_timeout);
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break 'connection;
                }
            }

            _ = deadline_wait, if pong_deadline.is_some() => {
                warn!(connection_id, "keepalive pong not received in time, closing");
                break 'connection;
            }
        }
    }

    handlers::disconnect(&hub, connection_id, hub.clock.now());
    info!(connection_id, "connection closed");
}

fn to_ws_message(event: &OutboundEvent) -> Message {
    let wire = event.to_wire();
    Message::Text(serde_json::to_string(&wire).unwrap_or_default())
}

fn dispatch_text(hub: &Hub, connection_id: u64, text: &str) {
    match serde_json::from_str::<WireMessage>(text) {
        Ok(wire) => handlers::dispatch(hub, connection_id, wire),
        Err(err) => {
            if let Some(sink) = hub.connections.get(&connection_id) {
                let _ = sink.send(OutboundEvent::Error {
                    message: format!("malformed frame: {err}"),
                });
            }
        }
    }
}
