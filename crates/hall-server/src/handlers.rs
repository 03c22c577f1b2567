//! Connection handlers for the Study Hall server.
//!
//! This module handles the connection lifecycle and message processing.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use studyhall_core::{
    AllowAll, Broadcaster, ConnectionHandle, JoinPolicy, JoinRequest, Membership, Outbound,
    PresenceConfig, PresenceCoordinator, PresenceError, Registry,
};
use studyhall_protocol::{encode_server, ClientMessage, Codec, ServerMessage};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

const JOIN_FIRST: &str = "Join a room first";

/// Shared server state.
pub struct AppState {
    pub presence: Arc<PresenceCoordinator>,
    pub config: Config,
    codec: Codec,
    open_connections: AtomicUsize,
}

impl AppState {
    /// Create state that admits every join.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_policy(config, Arc::new(AllowAll))
    }

    /// Create state with a custom join policy.
    #[must_use]
    pub fn with_policy(config: Config, policy: Arc<dyn JoinPolicy>) -> Self {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let presence = PresenceCoordinator::new(
            registry,
            broadcaster,
            policy,
            PresenceConfig {
                max_rooms: config.limits.max_rooms,
            },
        );

        Self {
            presence: Arc::new(presence),
            codec: Codec::new(config.limits.max_message_size),
            config,
            open_connections: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Registry {
        self.presence.registry()
    }
}

/// One of `max_connections` slots, released on drop.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .open_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < max).then_some(open + 1)
            })
            .ok()
            .map(|_| Self {
                state: Arc::clone(state),
            })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.open_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let app = build_app(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Study Hall server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry().stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": stats.room_count,
        "connections": stats.connection_count,
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(
            max = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };
    ws.on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

/// Per-connection state.
struct Connection {
    handle: ConnectionHandle,
    membership: Option<Membership>,
}

impl Connection {
    fn reply_error(&self, message: impl Into<String>) {
        match encode_server(&ServerMessage::error(message)) {
            Ok(text) => {
                if self.handle.send_frame(Arc::from(text)).is_err() {
                    trace!(connection = %self.handle.id(), "Connection gone before error reply");
                }
            }
            Err(e) => warn!(connection = %self.handle.id(), error = %e, "Failed to encode error"),
        }
    }

    fn leave(&mut self) {
        if let Some(membership) = self.membership.take() {
            membership.leave();
        }
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (handle, mut outbound) = ConnectionHandle::channel();
    let connection_id = handle.id();
    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut connection = Connection {
        handle,
        membership: None,
    };

    loop {
        tokio::select! {
            biased;

            Some(out) = outbound.recv() => match out {
                Outbound::Frame(text) => {
                    metrics::record_message(text.len(), "outbound");
                    if sender.send(Message::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    debug!(connection = %connection_id, "Superseded by a newer connection");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },

            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let start = Instant::now();
                    metrics::record_message(text.len(), "inbound");
                    handle_text(&state, &mut connection, &text).await;
                    metrics::record_latency(start.elapsed().as_secs_f64());
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!(connection = %connection_id, len = data.len(), "Ignoring binary frame");
                    metrics::record_error("protocol");
                }
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %connection_id, "Received close frame");
                    break;
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
    }

    // Leaves the room, if any.
    drop(connection);
    metrics::set_active_rooms(state.registry().room_count());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

async fn handle_text(state: &Arc<AppState>, connection: &mut Connection, text: &str) {
    let message = match state.codec.decode_client(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(connection = %connection.handle.id(), error = %e, "Dropping invalid message");
            metrics::record_error("protocol");
            return;
        }
    };
    trace!(connection = %connection.handle.id(), kind = %message.kind(), "Inbound message");

    match message {
        ClientMessage::Join {
            user_id,
            room_id,
            password,
        } => {
            connection.leave();

            let mut request = JoinRequest::new(user_id, room_id);
            if let Some(password) = password {
                request = request.with_password(password);
            }

            match state.presence.join(request, connection.handle.clone()).await {
                Ok(membership) => {
                    metrics::record_join();
                    connection.membership = Some(membership);
                }
                Err(e) => {
                    warn!(connection = %connection.handle.id(), error = %e, "Join rejected");
                    metrics::record_error(match e {
                        PresenceError::MissingIdentity => "join_invalid",
                        PresenceError::Unauthorized(_) => "join_unauthorized",
                        PresenceError::MaxRoomsReached => "room_limit",
                    });
                    connection.reply_error(e.to_string());
                }
            }
            metrics::set_active_rooms(state.registry().room_count());
        }

        ClientMessage::Leave => {
            connection.leave();
            metrics::set_active_rooms(state.registry().room_count());
        }

        ClientMessage::Chat { message, .. } => match &connection.membership {
            Some(membership) => {
                let count = state.presence.relay_chat(membership, message);
                trace!(room = %membership.room_id(), recipients = count, "Chat relayed");
            }
            None => connection.reply_error(JOIN_FIRST),
        },

        ClientMessage::PomodoroUpdate { timer_state } => match &connection.membership {
            Some(membership) => {
                state.presence.relay_timer_update(membership, timer_state);
            }
            None => connection.reply_error(JOIN_FIRST),
        },

        ClientMessage::TaskUpdate { tasks } => match &connection.membership {
            Some(membership) => {
                state.presence.relay_task_update(membership, tasks);
            }
            None => connection.reply_error(JOIN_FIRST),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::{SplitSink, SplitStream};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::time::Duration;
    use studyhall_protocol::{decode_server, encode_client};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

    struct Client {
        tx: SplitSink<Ws, WsMessage>,
        rx: SplitStream<Ws>,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
            let (tx, rx) = ws.split();
            Self { tx, rx }
        }

        async fn send(&mut self, message: &ClientMessage) {
            let text = encode_client(message).unwrap();
            self.tx.send(WsMessage::Text(text)).await.unwrap();
        }

        async fn send_raw(&mut self, text: &str) {
            self.tx.send(WsMessage::Text(text.to_string())).await.unwrap();
        }

        async fn next_raw(&mut self) -> Option<WsMessage> {
            timeout(Duration::from_secs(5), self.rx.next())
                .await
                .expect("timed out waiting for frame")
                .map(|m| m.unwrap())
        }

        async fn recv(&mut self) -> ServerMessage {
            loop {
                match self.next_raw().await {
                    Some(WsMessage::Text(text)) => return decode_server(&text).unwrap(),
                    Some(WsMessage::Ping(_)) | Some(WsMessage::Pong(_)) => continue,
                    other => panic!("Expected text frame, got {:?}", other),
                }
            }
        }

        async fn join(&mut self, user: &str, room: &str) -> ServerMessage {
            self.send(&ClientMessage::join(user, room)).await;
            self.recv().await
        }

        async fn close(mut self) {
            self.tx.send(WsMessage::Close(None)).await.unwrap();
        }
    }

    async fn spawn_server(config: Config) -> (SocketAddr, Arc<AppState>) {
        let state = Arc::new(AppState::new(config));
        let app = build_app(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, state)
    }

    fn participants(message: &ServerMessage) -> Vec<String> {
        match message {
            ServerMessage::RoomState { participants, .. } => participants.clone(),
            other => panic!("Expected room_state, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_scenario() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut a = Client::connect(addr).await;
        let mut b = Client::connect(addr).await;

        assert_eq!(participants(&a.join("ada", "r1").await), vec!["ada"]);
        assert_eq!(participants(&b.join("bob", "r1").await), vec!["ada", "bob"]);
        assert!(matches!(
            a.recv().await,
            ServerMessage::UserJoined { user_id, .. } if user_id == "bob"
        ));

        a.send(&ClientMessage::chat("ada", "r1", "hello")).await;
        match b.recv().await {
            ServerMessage::Chat {
                user_id, message, ..
            } => {
                assert_eq!(user_id, "ada");
                assert_eq!(message, "hello");
            }
            other => panic!("Expected chat, got {:?}", other),
        }

        b.close().await;

        // The next frame A sees is the departure, not an echo of its chat.
        assert!(matches!(
            a.recv().await,
            ServerMessage::UserLeft { user_id, .. } if user_id == "bob"
        ));
    }

    #[tokio::test]
    async fn test_chat_before_join() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut a = Client::connect(addr).await;

        a.send(&ClientMessage::chat("ada", "r1", "hello")).await;
        assert_eq!(a.recv().await, ServerMessage::error(JOIN_FIRST));
    }

    #[tokio::test]
    async fn test_invalid_messages_keep_connection_open() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut a = Client::connect(addr).await;

        a.send_raw("not json").await;
        a.send_raw(r#"{"type":"teleport"}"#).await;
        a.send_raw(&format!(r#"{{"type":"chat","message":"{}"}}"#, "x".repeat(70_000)))
            .await;

        assert_eq!(participants(&a.join("ada", "r1").await), vec!["ada"]);
    }

    #[tokio::test]
    async fn test_join_requires_identity() {
        let (addr, state) = spawn_server(Config::default()).await;
        let mut a = Client::connect(addr).await;

        assert_eq!(
            a.join("", "r1").await,
            ServerMessage::error("User ID and room ID are required")
        );
        assert_eq!(state.registry().room_count(), 0);
    }

    #[tokio::test]
    async fn test_rejoin_moves_rooms() {
        let (addr, state) = spawn_server(Config::default()).await;
        let mut a = Client::connect(addr).await;
        let mut b = Client::connect(addr).await;

        b.join("bob", "r1").await;
        a.join("ada", "r1").await;
        b.recv().await;

        assert_eq!(participants(&a.join("ada", "r2").await), vec!["ada"]);
        assert!(matches!(
            b.recv().await,
            ServerMessage::UserLeft { user_id, .. } if user_id == "ada"
        ));
        assert_eq!(state.registry().snapshot("r1").participants(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_superseded_connection_is_closed() {
        let (addr, state) = spawn_server(Config::default()).await;
        let mut old = Client::connect(addr).await;
        let mut new = Client::connect(addr).await;
        let mut bob = Client::connect(addr).await;

        bob.join("bob", "r1").await;
        old.join("ada", "r1").await;
        bob.recv().await;
        new.join("ada", "r1").await;
        bob.recv().await;

        loop {
            match old.next_raw().await {
                Some(WsMessage::Close(_)) | None => break,
                Some(_) => continue,
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The old connection's teardown must not evict its successor.
        assert!(state.registry().snapshot("r1").contains("ada"));
        bob.send(&ClientMessage::chat("bob", "r1", "still here?"))
            .await;
        assert!(matches!(new.recv().await, ServerMessage::Chat { .. }));
    }

    #[tokio::test]
    async fn test_timer_update_reaches_sender() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut a = Client::connect(addr).await;
        a.join("ada", "r1").await;

        let timer_state = json!({"remaining": 1500, "paused": false});
        a.send(&ClientMessage::PomodoroUpdate {
            timer_state: timer_state.clone(),
        })
        .await;
        match a.recv().await {
            ServerMessage::PomodoroUpdate {
                timer_state: received,
                ..
            } => assert_eq!(received, timer_state),
            other => panic!("Expected pomodoro_update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let mut config = Config::default();
        config.limits.max_connections = 1;
        let (addr, _state) = spawn_server(config).await;

        let _a = Client::connect(addr).await;
        assert!(connect_async(format!("ws://{}/ws", addr)).await.is_err());
    }

    #[tokio::test]
    async fn test_health() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut a = Client::connect(addr).await;
        a.join("ada", "r1").await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let health: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["rooms"], 1);
        assert_eq!(health["connections"], 1);
    }
}
