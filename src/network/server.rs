//! WebSocket Relay Server
//!
//! Async WebSocket server for two-player sessions.
//! Accepts connections, parses frames and feeds them to the relay loop,
//! which owns all session state. Wins are persisted by a separate
//! leaderboard task so disk I/O never stalls gameplay.
//!
//! ```text
//! conn task ─┐                      ┌─> conn writer (per connection)
//! conn task ─┼─> RelayCommand ─> relay loop
//! lb task ───┘                      └─> WinRecord ─> lb task (spawn_blocking)
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::ids::ConnectionId;
use crate::leaderboard::{Leaderboard, LeaderboardEntry, WinRecord};
use crate::network::connection::OUTBOUND_QUEUE_CAPACITY;
use crate::network::http;
use crate::network::protocol::{ClientMessage, CloseReason, ServerMessage};
use crate::network::relay::Relay;
use crate::network::session::SessionRegistry;

/// Relay command queue capacity.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// How long a closing connection may spend flushing queued messages.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address both listeners bind to.
    pub bind_host: IpAddr,
    /// WebSocket port.
    pub ws_port: u16,
    /// HTTP API port.
    pub http_port: u16,
    /// Browser origin allowed to connect; `*` allows any.
    pub allowed_origin: String,
    /// Leaderboard file. `None` keeps the leaderboard in memory.
    pub leaderboard_path: Option<PathBuf>,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Time allowed for the WebSocket handshake.
    pub connection_timeout: Duration,
    /// Sessions idle this long are closed. `None` disables reaping.
    pub idle_session_timeout: Option<Duration>,
    /// How often the reaper runs.
    pub reaper_interval: Duration,
    /// `paddleMove` and `ballSync` frames allowed per connection per
    /// second. `0` disables.
    pub max_messages_per_sec: u32,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ws_port: 8080,
            http_port: 8081,
            allowed_origin: "http://localhost:9002".to_string(),
            leaderboard_path: Some(PathBuf::from("leaderboard.json")),
            max_connections: 1000,
            connection_timeout: Duration::from_secs(10),
            idle_session_timeout: Some(Duration::from_secs(600)),
            reaper_interval: Duration::from_secs(30),
            max_messages_per_sec: 240,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Variable present but unparseable.
    #[error("invalid value {value:?} for {var}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Expected variables:
    /// - `PORT`, `HTTP_PORT`, `BIND_HOST`
    /// - `FRONTEND_URL`: allowed browser origin
    /// - `LEADERBOARD_PATH`: empty for an in-memory leaderboard
    /// - `MAX_CONNECTIONS`, `CONNECTION_TIMEOUT_SECS`
    /// - `IDLE_SESSION_TIMEOUT_SECS`, `MAX_MESSAGES_PER_SEC`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`; unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let allowed_origin = lookup("FRONTEND_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.allowed_origin);

        let leaderboard_path = match lookup("LEADERBOARD_PATH") {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => defaults.leaderboard_path,
        };

        let idle_session_timeout = match parse_var::<u64>(&lookup, "IDLE_SESSION_TIMEOUT_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.idle_session_timeout,
        };

        Ok(Self {
            bind_host: parse_var(&lookup, "BIND_HOST")?.unwrap_or(defaults.bind_host),
            ws_port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.ws_port),
            http_port: parse_var(&lookup, "HTTP_PORT")?.unwrap_or(defaults.http_port),
            allowed_origin,
            leaderboard_path,
            max_connections: parse_var(&lookup, "MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            connection_timeout: parse_var(&lookup, "CONNECTION_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.connection_timeout),
            idle_session_timeout,
            reaper_interval: defaults.reaper_interval,
            max_messages_per_sec: parse_var(&lookup, "MAX_MESSAGES_PER_SEC")?
                .unwrap_or(defaults.max_messages_per_sec),
            version: defaults.version,
        })
    }

    /// WebSocket listen address.
    pub fn ws_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.ws_port)
    }

    /// HTTP listen address.
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.http_port)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Work for the relay loop.
#[derive(Debug)]
pub enum RelayCommand {
    /// Handshake complete.
    Connect {
        /// New connection.
        id: ConnectionId,
        /// Its outbound queue.
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Parsed inbound event.
    Message {
        /// Sender.
        id: ConnectionId,
        /// Event.
        message: ClientMessage,
    },
    /// Connection closed.
    Disconnect {
        /// Closed connection.
        id: ConnectionId,
    },
    /// Leaderboard persisted a win.
    LeaderboardUpdated(Vec<LeaderboardEntry>),
}

/// Fixed one-second window counter for stream frames.
#[derive(Debug)]
struct RateLimiter {
    limit: u32,
    window_start: Instant,
    count: u32,
}

impl RateLimiter {
    fn new(limit: u32, now: Instant) -> Self {
        Self {
            limit,
            window_start: now,
            count: 0,
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }
        if self.count < self.limit {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

/// Holds one slot of the connection limit until dropped.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Whether a handshake `Origin` header is acceptable.
fn origin_allowed(allowed: &str, origin: Option<&str>) -> bool {
    match origin {
        // Non-browser clients send no Origin.
        None => true,
        Some(_) if allowed == "*" => true,
        Some(origin) => origin.trim_end_matches('/') == allowed,
    }
}

/// The relay server.
pub struct RelayServer {
    /// Server configuration.
    config: ServerConfig,
    /// Win persistence.
    leaderboard: Leaderboard,
    /// Live WebSocket connections.
    connection_count: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay server.
    pub fn new(config: ServerConfig, leaderboard: Leaderboard) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            leaderboard,
            connection_count: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind both listeners and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayServerError> {
        let ws_listener = TcpListener::bind(self.config.ws_addr()).await?;
        let http_listener = TcpListener::bind(self.config.http_addr()).await?;
        info!("Relay listening on ws://{}", self.config.ws_addr());
        info!("Leaderboard API on http://{}/api/leaderboard", self.config.http_addr());

        let app = http::router(self.leaderboard.clone(), &self.config.allowed_origin);
        let mut http_shutdown = self.shutdown_tx.subscribe();
        let http_handle = tokio::spawn(async move {
            let result = axum::serve(http_listener, app)
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown.recv().await;
                })
                .await;
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
        });

        let result = self.serve(ws_listener).await;
        let _ = http_handle.await;
        result
    }

    /// Serve WebSocket connections from `listener` until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayServerError> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (win_tx, win_rx) = mpsc::unbounded_channel();

        let relay = Relay::new(SessionRegistry::new());
        let relay_handle = tokio::spawn(Self::run_relay_loop(
            relay,
            command_rx,
            win_tx,
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let leaderboard_handle = tokio::spawn(Self::run_leaderboard_loop(
            self.leaderboard.clone(),
            win_rx,
            command_tx.clone(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let live = self.connection_count.load(Ordering::SeqCst);
                            if live >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            self.connection_count.fetch_add(1, Ordering::SeqCst);
                            let slot = ConnectionSlot(self.connection_count.clone());

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr, slot, command_tx.clone());
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(command_tx);
        let _ = relay_handle.await;
        let _ = leaderboard_handle.await;

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        slot: ConnectionSlot,
        commands: mpsc::Sender<RelayCommand>,
    ) {
        let allowed_origin = self.config.allowed_origin.clone();
        let max_messages_per_sec = self.config.max_messages_per_sec;
        let connection_timeout = self.config.connection_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;

            let check_origin = move |request: &Request, response: Response| {
                let origin = request
                    .headers()
                    .get("origin")
                    .map(|value| value.to_str().unwrap_or_default());
                if origin_allowed(&allowed_origin, origin) {
                    Ok(response)
                } else {
                    let mut rejection = ErrorResponse::new(Some("Origin not allowed".to_string()));
                    *rejection.status_mut() = StatusCode::FORBIDDEN;
                    Err(rejection)
                }
            };

            let handshake = timeout(connection_timeout, accept_hdr_async(stream, check_origin));
            let ws_stream = match handshake.await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
                Err(_) => {
                    debug!("Handshake timed out for {}", addr);
                    return;
                }
            };

            let id = ConnectionId::new_v4();
            info!("Connection {} established from {}", id.short(), addr);

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_CAPACITY);

            if commands
                .send(RelayCommand::Connect { id, sender: msg_tx })
                .await
                .is_err()
            {
                return;
            }

            // Ends once the relay drops this connection's sender.
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let mut limiter = RateLimiter::new(max_messages_per_sec, Instant::now());

            loop {
                tokio::select! {
                    frame = ws_receiver.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                let message = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", id.short(), e);
                                        continue;
                                    }
                                };
                                // Only the streams are limited; control events always pass.
                                if message.is_stream() && !limiter.allow(Instant::now()) {
                                    debug!("Rate limit hit for {}, dropping frame", id.short());
                                    continue;
                                }
                                let command = RelayCommand::Message { id, message };
                                if commands.send(command).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                debug!("Ignoring binary frame from {}", id.short());
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} closed the connection", id.short());
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", id.short(), e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            let _ = commands.send(RelayCommand::Disconnect { id }).await;

            let abort = sender_task.abort_handle();
            if timeout(WRITER_DRAIN_TIMEOUT, sender_task).await.is_err() {
                abort.abort();
            }

            info!("Connection {} cleaned up", id.short());
        });
    }

    /// Own the relay and apply commands in arrival order.
    async fn run_relay_loop(
        mut relay: Relay,
        mut commands: mpsc::Receiver<RelayCommand>,
        wins: mpsc::UnboundedSender<WinRecord>,
        config: ServerConfig,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut reaper = interval(config.reaper_interval);
        reaper.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    let closed = relay.close_all(CloseReason::Shutdown);
                    info!("Relay stopping, closed {} sessions", closed);
                    break;
                }
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    let win = match command {
                        RelayCommand::Connect { id, sender } => {
                            relay.connect(id, sender);
                            None
                        }
                        RelayCommand::Message { id, message } => relay.handle_message(id, message),
                        RelayCommand::Disconnect { id } => relay.disconnect(&id),
                        RelayCommand::LeaderboardUpdated(entries) => {
                            relay.broadcast_leaderboard(entries);
                            None
                        }
                    };
                    if let Some(win) = win {
                        if wins.send(win).is_err() {
                            error!("Leaderboard task is gone, win not recorded");
                        }
                    }
                }
                _ = reaper.tick(), if config.idle_session_timeout.is_some() => {
                    if let Some(idle_timeout) = config.idle_session_timeout {
                        let reaped = relay.reap_idle(Instant::now(), idle_timeout);
                        if reaped > 0 {
                            info!("Reaped {} idle sessions", reaped);
                        }
                    }
                }
            }
        }
    }

    /// Persist wins one at a time and report each new top list.
    async fn run_leaderboard_loop(
        leaderboard: Leaderboard,
        mut wins: mpsc::UnboundedReceiver<WinRecord>,
        commands: mpsc::Sender<RelayCommand>,
    ) {
        while let Some(win) = wins.recv().await {
            let name = win.name.clone();
            let board = leaderboard.clone();

            match tokio::task::spawn_blocking(move || board.record_win(&win)).await {
                Ok(Ok(entries)) => {
                    info!("Recorded win for {}", name);
                    if commands.send(RelayCommand::LeaderboardUpdated(entries)).await.is_err() {
                        break;
                    }
                }
                Ok(Err(e)) => error!("Failed to record win for {}: {}", name, e),
                Err(e) => error!("Leaderboard write task failed: {}", e),
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get live connection count.
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }
}
