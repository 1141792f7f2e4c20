//! WebSocket connection lifecycle.
//!
//! One persistent duplex connection per user session. The handle spawns a
//! connection task on `connect()`; commands flow in over a channel, typed
//! events fan out over a broadcast channel. Error closes reconnect with
//! capped exponential backoff; clean closes (explicit `disconnect()`) do not.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use threadkit_client_common::types::{TypingUser, UserPublic, now_millis};
use threadkit_client_common::wire::WireComment;
use threadkit_client_common::{ClientConfig, Error, Result};

use crate::backoff::Backoff;
use crate::messages::{ClientFrame, RpcFrame, ServerEvent};
use crate::presence::PresenceTracker;
use crate::typing::TypingTracker;

/// Supplies the bearer token at (re)connect time, so reconnects after a
/// login/logout pick up the current session.
pub type TokenSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Connection tunables.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Ping cadence.
    pub heartbeat_interval: Duration,
    /// No inbound frame for this long forces an error close.
    pub idle_timeout: Duration,
    /// Max pages one connection may subscribe to.
    pub max_subscriptions: usize,
    /// Max outbound messages per second; excess is dropped.
    pub rate_limit_per_sec: u32,
    /// Min gap between outbound typing frames per page.
    pub typing_debounce: Duration,
    /// Typing expiry sweep cadence.
    pub sweep_interval: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            max_subscriptions: 10,
            rate_limit_per_sec: 10,
            typing_debounce: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Backoff,
    Closed,
}

/// Events observed by consumers, in arrival order.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    StateChanged(ConnectionState),
    Connected {
        user_id: Option<Uuid>,
    },
    Presence {
        page_id: Uuid,
        users: Vec<UserPublic>,
    },
    UserJoined {
        page_id: Uuid,
        user: UserPublic,
    },
    UserLeft {
        page_id: Uuid,
        user_id: Uuid,
    },
    TypingChanged {
        page_id: Uuid,
        users: Vec<TypingUser>,
    },
    CommentAdded {
        page_id: Uuid,
        comment: WireComment,
    },
    CommentEdited {
        page_id: Uuid,
        comment_id: Uuid,
        text: String,
        text_html: String,
    },
    CommentDeleted {
        page_id: Uuid,
        comment_id: Uuid,
    },
    VoteUpdated {
        page_id: Uuid,
        comment_id: Uuid,
        upvotes: i64,
        downvotes: i64,
    },
    PinUpdated {
        page_id: Uuid,
        comment_id: Uuid,
        pinned: bool,
        pinned_at: Option<i64>,
    },
    Notification {
        payload: serde_json::Value,
    },
    Error {
        code: String,
        message: String,
    },
}

enum Command {
    Send(ClientFrame),
    Disconnect,
}

enum CloseReason {
    Clean,
    Error,
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct Core {
    config: SocketConfig,
    ws_url: String,
    project_id: String,
    token: TokenSource,
    state: Mutex<ConnectionState>,
    subscriptions: Mutex<HashSet<Uuid>>,
    presence: Mutex<PresenceTracker>,
    typing: Mutex<TypingTracker>,
    user_id: Mutex<Option<Uuid>>,
    events: broadcast::Sender<SocketEvent>,
}

pub struct SocketClient {
    core: Arc<Core>,
    commands: mpsc::UnboundedSender<Command>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    last_typing_sent: Mutex<HashMap<Uuid, Instant>>,
}

impl SocketClient {
    pub fn new(config: &ClientConfig, socket_config: SocketConfig, token: TokenSource) -> Self {
        let (events, _) = broadcast::channel(256);
        let (commands, command_rx) = mpsc::unbounded_channel();
        Self {
            core: Arc::new(Core {
                config: socket_config,
                ws_url: config.ws_url.clone(),
                project_id: config.project_id.clone(),
                token,
                state: Mutex::new(ConnectionState::Idle),
                subscriptions: Mutex::new(HashSet::new()),
                presence: Mutex::new(PresenceTracker::new()),
                typing: Mutex::new(TypingTracker::new()),
                user_id: Mutex::new(None),
                events,
            }),
            commands,
            command_rx: Mutex::new(Some(command_rx)),
            task: Mutex::new(None),
            last_typing_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<SocketEvent> {
        self.core.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.core.state.lock().expect("state lock")
    }

    /// Server-assigned identity from the `connected` frame, when
    /// authenticated.
    pub fn user_id(&self) -> Option<Uuid> {
        *self.core.user_id.lock().expect("user lock")
    }

    pub fn subscriptions(&self) -> HashSet<Uuid> {
        self.core.subscriptions.lock().expect("subs lock").clone()
    }

    pub fn presence_on(&self, page_id: Uuid) -> Vec<UserPublic> {
        self.core
            .presence
            .lock()
            .expect("presence lock")
            .users_on(page_id)
    }

    pub fn typing_on(&self, page_id: Uuid) -> Vec<TypingUser> {
        self.core
            .typing
            .lock()
            .expect("typing lock")
            .typing_on(page_id)
    }

    /// Spawn the connection task. Idempotent.
    pub fn connect(&self) {
        let mut task = self.task.lock().expect("task lock");
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let Some(command_rx) = self.command_rx.lock().expect("rx lock").take() else {
            return;
        };
        let core = Arc::clone(&self.core);
        *task = Some(tokio::spawn(core.run(command_rx)));
    }

    /// Clean close: no reconnect.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Add a page to the subscription set and, when the connection is open,
    /// send the subscribe frame. Fails client-side at the subscription cap
    /// without altering the set.
    pub fn subscribe(&self, page_id: Uuid) -> Result<()> {
        {
            let mut subs = self.core.subscriptions.lock().expect("subs lock");
            if subs.contains(&page_id) {
                return Ok(());
            }
            if subs.len() >= self.core.config.max_subscriptions {
                return Err(Error::validation(format!(
                    "subscription limit of {} reached",
                    self.core.config.max_subscriptions
                )));
            }
            subs.insert(page_id);
        }
        if self.state() == ConnectionState::Open {
            let _ = self
                .commands
                .send(Command::Send(ClientFrame::subscribe(page_id)));
        }
        Ok(())
    }

    pub fn unsubscribe(&self, page_id: Uuid) {
        let removed = self
            .core
            .subscriptions
            .lock()
            .expect("subs lock")
            .remove(&page_id);
        if !removed {
            return;
        }
        self.core
            .presence
            .lock()
            .expect("presence lock")
            .clear_page(page_id);
        self.core
            .typing
            .lock()
            .expect("typing lock")
            .clear_page(page_id);
        if self.state() == ConnectionState::Open {
            let _ = self
                .commands
                .send(Command::Send(ClientFrame::unsubscribe(page_id)));
        }
    }

    /// Announce the viewer is typing; debounced per page.
    pub fn typing(&self, page_id: Uuid, reply_to: Option<Uuid>) {
        {
            let mut last = self.last_typing_sent.lock().expect("typing debounce lock");
            if let Some(sent) = last.get(&page_id) {
                if sent.elapsed() < self.core.config.typing_debounce {
                    return;
                }
            }
            last.insert(page_id, Instant::now());
        }
        if self.state() == ConnectionState::Open {
            let _ = self
                .commands
                .send(Command::Send(ClientFrame::typing(page_id, reply_to)));
        }
    }
}

impl Core {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("state lock") = state;
        let _ = self.events.send(SocketEvent::StateChanged(state));
    }

    fn connect_url(&self) -> String {
        let mut url = match url::Url::parse(&self.ws_url) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(%err, ws_url = %self.ws_url, "unparseable ws_url");
                return self.ws_url.clone();
            }
        };
        url.query_pairs_mut()
            .append_pair("project_id", &self.project_id);
        if let Some(token) = (self.token)() {
            url.query_pairs_mut().append_pair("token", &token);
        }
        url.to_string()
    }

    fn typing_on(&self, page_id: Uuid) -> Vec<TypingUser> {
        self.typing.lock().expect("typing lock").typing_on(page_id)
    }

    async fn run(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut backoff = Backoff::default();
        loop {
            self.set_state(ConnectionState::Connecting);
            match connect_async(self.connect_url()).await {
                Ok((stream, _)) => {
                    backoff.reset();
                    self.set_state(ConnectionState::Open);
                    tracing::info!("websocket open");

                    let reason = self.run_connection(stream, &mut commands).await;

                    self.presence.lock().expect("presence lock").clear();
                    self.typing.lock().expect("typing lock").clear();

                    if matches!(reason, CloseReason::Clean) {
                        self.set_state(ConnectionState::Closed);
                        tracing::info!("websocket closed");
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "websocket connect failed");
                }
            }

            self.set_state(ConnectionState::Backoff);
            let delay = backoff.next_delay();
            tracing::debug!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                disconnect = wait_for_disconnect(&mut commands) => {
                    if disconnect {
                        self.set_state(ConnectionState::Closed);
                        return;
                    }
                }
            }
        }
    }

    async fn run_connection(
        &self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> CloseReason {
        let (mut sink, mut stream) = stream.split();
        let mut limiter = RateWindow::new(self.config.rate_limit_per_sec);

        // Re-establish every subscription on (re)open.
        let pages: Vec<Uuid> = self
            .subscriptions
            .lock()
            .expect("subs lock")
            .iter()
            .copied()
            .collect();
        for page_id in pages {
            self.send_frame(&mut sink, ClientFrame::subscribe(page_id), &mut limiter)
                .await;
        }

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        self.handle_frame(text.as_str(), &mut limiter);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_inbound = Instant::now();
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_inbound = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!("websocket closed by server");
                        return CloseReason::Error;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(%err, "websocket read error");
                        return CloseReason::Error;
                    }
                    _ => {}
                },

                cmd = commands.recv() => match cmd {
                    Some(Command::Send(frame)) => {
                        self.send_frame(&mut sink, frame, &mut limiter).await;
                    }
                    Some(Command::Disconnect) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return CloseReason::Clean;
                    }
                },

                _ = heartbeat.tick() => {
                    if last_inbound.elapsed() >= self.config.idle_timeout {
                        tracing::warn!("websocket idle timeout");
                        return CloseReason::Error;
                    }
                    self.send_frame(&mut sink, ClientFrame::ping(), &mut limiter).await;
                }

                _ = sweep.tick() => {
                    if last_inbound.elapsed() >= self.config.idle_timeout {
                        tracing::warn!("websocket idle timeout");
                        return CloseReason::Error;
                    }
                    let changed = self
                        .typing
                        .lock()
                        .expect("typing lock")
                        .sweep(now_millis());
                    for page_id in changed {
                        let users = self.typing_on(page_id);
                        let _ = self.events.send(SocketEvent::TypingChanged { page_id, users });
                    }
                }
            }
        }
    }

    async fn send_frame(&self, sink: &mut WsSink, frame: ClientFrame, limiter: &mut RateWindow) {
        if !limiter.allow() {
            tracing::warn!(method = frame.method(), "outbound frame dropped by rate limit");
            return;
        }
        match frame.to_json() {
            Ok(json) => {
                if let Err(err) = sink.send(Message::Text(json.into())).await {
                    tracing::warn!(%err, "websocket send failed");
                }
            }
            Err(err) => tracing::warn!(%err, "failed to serialize frame"),
        }
    }

    fn handle_frame(&self, text: &str, limiter: &mut RateWindow) {
        let frame: RpcFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%err, "unparseable frame ignored");
                return;
            }
        };
        let event = match ServerEvent::from_rpc(frame) {
            Ok(event) => event,
            Err(reason) => {
                tracing::warn!(reason, "unhandled frame ignored");
                return;
            }
        };

        match event {
            ServerEvent::Connected { user_id } => {
                *self.user_id.lock().expect("user lock") = user_id;
                let _ = self.events.send(SocketEvent::Connected { user_id });
            }
            ServerEvent::Presence { page_id, users } => {
                self.presence
                    .lock()
                    .expect("presence lock")
                    .replace(page_id, users.clone());
                let _ = self.events.send(SocketEvent::Presence { page_id, users });
            }
            ServerEvent::UserJoined { page_id, user } => {
                self.presence
                    .lock()
                    .expect("presence lock")
                    .join(page_id, user.clone());
                let _ = self.events.send(SocketEvent::UserJoined { page_id, user });
            }
            ServerEvent::UserLeft { page_id, user_id } => {
                self.presence
                    .lock()
                    .expect("presence lock")
                    .leave(page_id, user_id);
                let _ = self.events.send(SocketEvent::UserLeft { page_id, user_id });
            }
            ServerEvent::Typing {
                page_id,
                user,
                reply_to,
            } => {
                self.typing
                    .lock()
                    .expect("typing lock")
                    .insert(page_id, &user, reply_to, now_millis());
                let users = self.typing_on(page_id);
                let _ = self
                    .events
                    .send(SocketEvent::TypingChanged { page_id, users });
            }
            ServerEvent::CommentAdded { page_id, comment } => {
                let _ = self
                    .events
                    .send(SocketEvent::CommentAdded { page_id, comment });
            }
            ServerEvent::CommentEdited {
                page_id,
                comment_id,
                text,
                text_html,
            } => {
                let _ = self.events.send(SocketEvent::CommentEdited {
                    page_id,
                    comment_id,
                    text,
                    text_html,
                });
            }
            ServerEvent::CommentDeleted {
                page_id,
                comment_id,
            } => {
                let _ = self.events.send(SocketEvent::CommentDeleted {
                    page_id,
                    comment_id,
                });
            }
            ServerEvent::VoteUpdated {
                page_id,
                comment_id,
                upvotes,
                downvotes,
            } => {
                let _ = self.events.send(SocketEvent::VoteUpdated {
                    page_id,
                    comment_id,
                    upvotes,
                    downvotes,
                });
            }
            ServerEvent::PinUpdated {
                page_id,
                comment_id,
                pinned,
                pinned_at,
            } => {
                let _ = self.events.send(SocketEvent::PinUpdated {
                    page_id,
                    comment_id,
                    pinned,
                    pinned_at,
                });
            }
            ServerEvent::Notification { payload } => {
                let _ = self.events.send(SocketEvent::Notification { payload });
            }
            ServerEvent::Pong => {}
            ServerEvent::Error { code, message } => match code.as_str() {
                // Malformed-input complaints are ours to log, not surface.
                "invalid_json" | "invalid_method" => {
                    tracing::warn!(code, message, "server rejected a frame");
                }
                "rate_limit" => {
                    limiter.throttle(Duration::from_secs(1));
                    let _ = self.events.send(SocketEvent::Error { code, message });
                }
                _ => {
                    let _ = self.events.send(SocketEvent::Error { code, message });
                }
            },
        }
    }
}

/// Drain commands while disconnected; resolves `true` on disconnect (or a
/// dropped handle), pending otherwise.
async fn wait_for_disconnect(commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
    loop {
        match commands.recv().await {
            Some(Command::Disconnect) | None => return true,
            Some(Command::Send(_)) => {
                // Not open; resubscription on open covers it.
            }
        }
    }
}

/// Fixed-window outbound cap with a server-requested throttle override.
struct RateWindow {
    limit: u32,
    sent: u32,
    window_start: Instant,
    throttled_until: Option<Instant>,
}

impl RateWindow {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            sent: 0,
            window_start: Instant::now(),
            throttled_until: None,
        }
    }

    fn allow(&mut self) -> bool {
        if let Some(until) = self.throttled_until {
            if Instant::now() < until {
                return false;
            }
            self.throttled_until = None;
        }
        if self.window_start.elapsed() >= Duration::from_secs(1) {
            self.window_start = Instant::now();
            self.sent = 0;
        }
        if self.sent >= self.limit {
            return false;
        }
        self.sent += 1;
        true
    }

    fn throttle(&mut self, duration: Duration) {
        self.throttled_until = Some(Instant::now() + duration);
    }
}
