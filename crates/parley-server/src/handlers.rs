//! Connection handlers for the Parley server.
//!
//! This module is the transport side of the coordinator: it decodes
//! WebSocket frames into events, feeds them to the core router one at a
//! time, and fans the resulting events out through the [`Hub`].

use crate::config::Config;
use crate::hub::Hub;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
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
use bytes::BytesMut;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parley_core::{Command, EventRouter};
use parley_protocol::{codec, InboundEvent, OutboundEvent, ProtocolError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::{interval_at, sleep_until, Instant as Deadline};
use tracing::{debug, error, info, warn};

/// Source of connection ids.
static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Shared server state.
pub struct AppState {
    /// The room coordinator. Locked for the whole of one event so that
    /// events are applied and fanned out strictly one after another.
    pub router: Mutex<EventRouter>,
    /// Open connections and their room subscriptions.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            router: Mutex::new(EventRouter::new()),
            hub: Hub::new(),
            config,
        }
    }
}

/// Frame encoding used for replies to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Json,
    MessagePack,
}

/// Per-connection session.
#[derive(Debug)]
struct Session {
    connection_id: String,
    /// The `(room, identity)` this connection currently speaks for.
    binding: Option<(String, String)>,
    format: WireFormat,
}

impl Session {
    fn new(connection_id: String) -> Self {
        Self {
            connection_id,
            binding: None,
            format: WireFormat::Json,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
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
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rooms = state.router.lock().await.stats().room_count;
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": rooms,
        "connections": state.hub.connection_count(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.hub.connection_count() >= state.config.limits.max_connections {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached, refusing upgrade"
        );
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    serve_connection(&state, sender, receiver).await;
}

/// Drive one connection until it closes, errors or goes idle.
async fn serve_connection<S, R>(state: &AppState, mut sender: S, mut receiver: R)
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = format!("conn_{}", NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
    let mut session = Session::new(connection_id.clone());
    let mut outbound = state.hub.register(&connection_id);

    debug!(connection = %connection_id, "WebSocket connected");

    let heartbeat = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
    state
        .hub
        .send_to(&connection_id, OutboundEvent::connected(&connection_id, heartbeat));

    // Protocol-level pings keep browsers, which never ping on their own,
    // inside the idle timeout: their automatic pongs count as activity.
    let ping_period = Duration::from_millis(state.config.heartbeat.interval_ms.max(1));
    let mut ping_tick = interval_at(Deadline::now() + ping_period, ping_period);
    let idle_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut deadline = Deadline::now() + idle_timeout;
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            Some(event) = outbound.recv() => {
                if send_event(&mut sender, session.format, &event).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                deadline = Deadline::now() + idle_timeout;
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if oversized(&session, text.len(), state.config.limits.max_message_size) {
                            continue;
                        }
                        session.format = WireFormat::Json;
                        match codec::decode_json::<InboundEvent>(&text) {
                            Ok(event) => process_event(state, &mut session, event).await,
                            Err(e) => drop_frame(&session, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if oversized(&session, data.len(), state.config.limits.max_message_size) {
                            continue;
                        }
                        session.format = WireFormat::MessagePack;
                        read_buffer.extend_from_slice(&data);
                        loop {
                            match codec::decode_from::<InboundEvent>(&mut read_buffer) {
                                Ok(Some(event)) => process_event(state, &mut session, event).await,
                                Ok(None) => break,
                                Err(e) => {
                                    drop_frame(&session, &e);
                                    if matches!(e, ProtocolError::FrameTooLarge(_)) {
                                        read_buffer.clear();
                                        break;
                                    }
                                }
                            }
                        }
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

            _ = ping_tick.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            () = sleep_until(deadline) => {
                debug!(connection = %connection_id, "Idle timeout");
                break;
            }
        }
    }

    disconnect(state, &mut session).await;
}

/// Leave whatever the connection speaks for and forget the connection.
///
/// The leave is skipped while another open connection still speaks for the
/// same identity in the same room.
async fn disconnect(state: &AppState, session: &mut Session) {
    let connection_id = session.connection_id.as_str();

    if let Some((room, identity)) = session.binding.take() {
        state.hub.unsubscribe(connection_id, &room);
        if state.hub.release(connection_id, &room, &identity) {
            let mut router = state.router.lock().await;
            route(
                &mut router,
                &state.hub,
                connection_id,
                Command::Leave { room, identity },
            );
        } else {
            debug!(
                connection = %connection_id,
                room = %room,
                identity = %identity,
                "Identity still held by another connection"
            );
        }
    }

    state.hub.unregister(connection_id);
    debug!(connection = %connection_id, "WebSocket disconnected");
}

fn oversized(session: &Session, len: usize, limit: usize) -> bool {
    if len <= limit {
        return false;
    }
    warn!(
        connection = %session.connection_id,
        size = len,
        max = limit,
        "Frame too large, dropped"
    );
    metrics::record_dropped();
    true
}

fn drop_frame(session: &Session, error: &ProtocolError) {
    debug!(connection = %session.connection_id, error = %error, "Undecodable frame dropped");
    metrics::record_dropped();
}

/// Handle one decoded inbound event.
async fn process_event(state: &AppState, session: &mut Session, event: InboundEvent) {
    if let InboundEvent::Ping(ping) = event {
        state
            .hub
            .send_to(&session.connection_id, OutboundEvent::Pong(ping));
        return;
    }

    let name = event.name();
    let Some(command) = Command::parse(event) else {
        debug!(connection = %session.connection_id, event = name, "Dropped malformed event");
        metrics::record_dropped();
        return;
    };

    let start = Instant::now();
    let mut router = state.router.lock().await;
    let hub = &state.hub;
    let connection_id = session.connection_id.as_str();

    match &command {
        Command::Join { room, identity } => {
            let rebinding = session
                .binding
                .as_ref()
                .is_some_and(|(r, i)| r != room || i != identity);
            if rebinding {
                if let Some((old_room, old_identity)) = session.binding.take() {
                    if old_room != *room {
                        hub.unsubscribe(connection_id, &old_room);
                    }
                    if hub.release(connection_id, &old_room, &old_identity) {
                        route(
                            &mut router,
                            hub,
                            connection_id,
                            Command::Leave {
                                room: old_room,
                                identity: old_identity,
                            },
                        );
                    }
                }
            }
            hub.subscribe(connection_id, room);
            hub.bind(connection_id, room, identity);
            session.binding = Some((room.clone(), identity.clone()));
        }
        Command::Leave { room, identity } => {
            // Only leaving its own binding changes what this connection hears.
            let own = session
                .binding
                .as_ref()
                .is_some_and(|(r, i)| r == room && i == identity);
            if own {
                hub.unsubscribe(connection_id, room);
                hub.release(connection_id, room, identity);
                session.binding = None;
            }
        }
        _ => {}
    }

    route(&mut router, hub, connection_id, command);
    metrics::record_dispatch(start.elapsed().as_secs_f64());
}

/// Route one command and fan its outbound events out.
///
/// The caller holds the router lock.
fn route(router: &mut EventRouter, hub: &Hub, origin: &str, command: Command) {
    let name = command.name();
    let out = router.dispatch(command);
    metrics::record_event(name);

    for outbound in &out {
        let recipients = hub.deliver(origin, outbound);
        metrics::record_outbound(outbound.event.name(), recipients);
        if outbound.announces_persistence() {
            metrics::record_persistence_enabled();
        }
    }

    metrics::set_active_rooms(router.stats().room_count);
}

/// Encode and send one event in the connection's wire format.
async fn send_event<S>(sender: &mut S, format: WireFormat, event: &OutboundEvent) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let message = match format {
        WireFormat::Json => Message::Text(codec::encode_json(event)?),
        WireFormat::MessagePack => Message::Binary(codec::encode(event)?.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::OutboundReceiver;
    use futures_util::{sink, stream};
    use parley_protocol::{ChatMessage, MembershipPayload, PersistenceState, SendMessagePayload};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn drain(rx: &mut OutboundReceiver) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    fn join(room: &str, user: &str) -> InboundEvent {
        InboundEvent::Join(MembershipPayload::new(room, user))
    }

    fn leave(room: &str, user: &str) -> InboundEvent {
        InboundEvent::Leave(MembershipPayload::new(room, user))
    }

    fn departure(remaining: &[&str], who: &str, votes: usize) -> Vec<OutboundEvent> {
        vec![
            OutboundEvent::UserList(remaining.iter().map(|m| m.to_string()).collect()),
            OutboundEvent::system_message(format!("{who} has left.")),
            OutboundEvent::PersistenceState(PersistenceState {
                enabled: false,
                votes,
                total: remaining.len(),
            }),
        ]
    }

    async fn members(state: &AppState, room: &str) -> Vec<String> {
        let router = state.router.lock().await;
        router
            .store()
            .members(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn start_server(config: Config) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(config));
        tokio::spawn(async move { axum::serve(listener, app(state)).await });
        addr
    }

    async fn upgrade_status(addr: SocketAddr) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /ws HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = vec![0u8; 1024];
        let n = stream.read(&mut response).await.unwrap();
        let head = String::from_utf8_lossy(&response[..n]);
        head.lines().next().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_join_reaches_room_including_sender() {
        let state = AppState::new(Config::default());
        let mut rx_a = state.hub.register("a");
        let mut rx_b = state.hub.register("b");
        let mut alice = Session::new("a".into());
        let mut bob = Session::new("b".into());

        process_event(&state, &mut alice, join("r", "alice")).await;
        process_event(&state, &mut bob, join("r", "bob")).await;

        let seen_by_alice = drain(&mut rx_a);
        assert_eq!(seen_by_alice.len(), 6);
        assert_eq!(
            seen_by_alice[3],
            OutboundEvent::UserList(vec!["alice".into(), "bob".into()])
        );

        let seen_by_bob = drain(&mut rx_b);
        assert_eq!(seen_by_bob.len(), 3);
        assert_eq!(
            seen_by_bob[2],
            OutboundEvent::PersistenceState(PersistenceState {
                enabled: false,
                votes: 0,
                total: 2
            })
        );
    }

    #[tokio::test]
    async fn test_leaver_does_not_hear_own_departure() {
        let state = AppState::new(Config::default());
        let mut rx_a = state.hub.register("a");
        let mut rx_b = state.hub.register("b");
        let mut alice = Session::new("a".into());
        let mut bob = Session::new("b".into());

        process_event(&state, &mut alice, join("r", "alice")).await;
        process_event(&state, &mut bob, join("r", "bob")).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        process_event(
            &state,
            &mut alice,
            InboundEvent::Leave(MembershipPayload::new("r", "alice")),
        )
        .await;

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 3);
        assert!(alice.binding.is_none());
    }

    #[tokio::test]
    async fn test_leave_for_someone_else_keeps_delivery() {
        let state = AppState::new(Config::default());
        let mut rx_a = state.hub.register("a");
        let mut rx_b = state.hub.register("b");
        let mut alice = Session::new("a".into());
        let mut bob = Session::new("b".into());

        process_event(&state, &mut alice, join("r", "alice")).await;
        process_event(&state, &mut bob, join("r", "bob")).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        process_event(&state, &mut alice, leave("r", "ghost")).await;
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(alice.binding, Some(("r".into(), "alice".into())));
        assert!(state.hub.is_subscribed("a", "r"));

        let hello = SendMessagePayload {
            room: Some("r".into()),
            username: Some("bob".into()),
            message: Some("hello".into()),
            ..Default::default()
        };
        process_event(&state, &mut bob, InboundEvent::SendMessage(hello)).await;

        assert_eq!(members(&state, "r").await, ["alice", "bob"]);
        assert_eq!(
            drain(&mut rx_a),
            vec![OutboundEvent::Message(ChatMessage {
                user: "bob".into(),
                message: "hello".into(),
                effect: None,
                enc: None,
                iv: None,
            })]
        );
    }

    #[tokio::test]
    async fn test_disconnect_leaves_bound_room() {
        let state = AppState::new(Config::default());
        let _rx_a = state.hub.register("a");
        let mut rx_b = state.hub.register("b");
        let mut alice = Session::new("a".into());
        let mut bob = Session::new("b".into());

        process_event(&state, &mut alice, join("r", "alice")).await;
        process_event(&state, &mut bob, join("r", "bob")).await;
        process_event(
            &state,
            &mut alice,
            InboundEvent::VotePersistence(MembershipPayload::new("r", "alice")),
        )
        .await;
        drain(&mut rx_b);

        disconnect(&state, &mut alice).await;

        assert_eq!(drain(&mut rx_b), departure(&["bob"], "alice", 0));
        assert_eq!(members(&state, "r").await, ["bob"]);
        assert_eq!(state.hub.connection_count(), 1);
        assert!(alice.binding.is_none());

        disconnect(&state, &mut bob).await;

        assert!(state.router.lock().await.store().is_empty());
        assert_eq!(state.hub.connection_count(), 0);
        assert_eq!(state.hub.room_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_without_binding_routes_nothing() {
        let state = AppState::new(Config::default());
        let _rx_a = state.hub.register("a");
        let mut rx_b = state.hub.register("b");
        let mut idle = Session::new("a".into());
        let mut bob = Session::new("b".into());

        process_event(&state, &mut bob, join("r", "bob")).await;
        drain(&mut rx_b);

        disconnect(&state, &mut idle).await;

        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(members(&state, "r").await, ["bob"]);
    }

    #[tokio::test]
    async fn test_identity_stays_while_another_connection_holds_it() {
        let state = AppState::new(Config::default());
        let _rx_1 = state.hub.register("a1");
        let mut rx_2 = state.hub.register("a2");
        let mut rx_b = state.hub.register("b");
        let mut first = Session::new("a1".into());
        let mut second = Session::new("a2".into());
        let mut bob = Session::new("b".into());

        process_event(&state, &mut first, join("r", "alice")).await;
        process_event(&state, &mut second, join("r", "alice")).await;
        process_event(&state, &mut bob, join("r", "bob")).await;
        drain(&mut rx_2);
        drain(&mut rx_b);

        disconnect(&state, &mut first).await;

        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(members(&state, "r").await, ["alice", "bob"]);
        assert!(state.hub.is_subscribed("a2", "r"));

        disconnect(&state, &mut second).await;

        assert_eq!(drain(&mut rx_b), departure(&["bob"], "alice", 0));
        assert_eq!(members(&state, "r").await, ["bob"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_is_closed_and_left() {
        let mut config = Config::default();
        config.heartbeat.interval_ms = 60_000;
        config.heartbeat.timeout_ms = 100;
        let state = AppState::new(config);
        let mut rx_b = state.hub.register("b");
        let mut bob = Session::new("b".into());
        process_event(&state, &mut bob, join("r", "bob")).await;

        let frames = stream::iter(vec![Ok::<_, axum::Error>(Message::Text(
            r#"{"event":"join","data":{"room":"r","username":"alice"}}"#.to_string(),
        ))])
        .chain(stream::pending());

        serve_connection(&state, sink::drain::<Message>(), frames).await;

        let seen_by_bob = drain(&mut rx_b);
        assert_eq!(seen_by_bob.len(), 9);
        assert_eq!(seen_by_bob[6..], departure(&["bob"], "alice", 0)[..]);
        assert_eq!(members(&state, "r").await, ["bob"]);
        assert_eq!(state.hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_accepted_under_connection_limit() {
        let addr = start_server(Config::default()).await;
        assert!(upgrade_status(addr).await.starts_with("HTTP/1.1 101"));
    }

    #[tokio::test]
    async fn test_upgrade_refused_over_connection_limit() {
        let mut config = Config::default();
        config.limits.max_connections = 0;
        let addr = start_server(config).await;
        assert!(upgrade_status(addr).await.starts_with("HTTP/1.1 503"));
    }

    #[tokio::test]
    async fn test_rejoin_elsewhere_leaves_previous_room() {
        let state = AppState::new(Config::default());
        let _rx = state.hub.register("a");
        let mut alice = Session::new("a".into());

        process_event(&state, &mut alice, join("r1", "alice")).await;
        process_event(&state, &mut alice, join("r2", "alice")).await;

        let router = state.router.lock().await;
        assert!(!router.store().contains("r1"));
        assert!(router.store().contains("r2"));
        assert!(!state.hub.is_subscribed("a", "r1"));
        assert_eq!(alice.binding, Some(("r2".into(), "alice".into())));
    }

    #[tokio::test]
    async fn test_ping_answered_to_sender_only() {
        let state = AppState::new(Config::default());
        let mut rx = state.hub.register("a");
        let mut session = Session::new("a".into());

        process_event(
            &state,
            &mut session,
            InboundEvent::Ping(parley_protocol::PingPayload { timestamp: Some(7) }),
        )
        .await;

        assert_eq!(
            drain(&mut rx),
            vec![OutboundEvent::Pong(parley_protocol::PingPayload {
                timestamp: Some(7)
            })]
        );
        assert!(state.router.lock().await.store().is_empty());
    }
}
