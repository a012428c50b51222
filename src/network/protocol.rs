//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every text frame carries one JSON envelope:
//!
//! ```text
//! { "event": "paddleMove", "data": { "gameId": "AB12CD", "position": 1.5 } }
//! ```
//!
//! Events without a payload omit `data`. Field names are camelCase.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::code::SessionCode;
use crate::core::ids::ConnectionId;
use crate::leaderboard::LeaderboardEntry;

// =============================================================================
// SHARED PAYLOADS
// =============================================================================

/// A point or direction in the client's 3D arena.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Vec3 {
    /// Construct a vector.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Authoritative ball state, as asserted by the host.
///
/// Fields beyond position and velocity are kept and forwarded unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallState {
    /// Ball position.
    pub position: Vec3,
    /// Velocity per second.
    pub velocity: Vec3,
    /// Any other fields the host sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Scoreboard from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    /// Host's points.
    pub player: u32,
    /// Guest's points.
    pub opponent: u32,
}

/// A power-up placed in the arena by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Powerup {
    /// Host-assigned id.
    pub id: u32,
    /// Power-up type, opaque to the server.
    pub kind: String,
    /// Arena position.
    pub position: Vec3,
}

/// Session role. The creator is always the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Physics and scoring authority.
    Host,
    /// Second, non-authoritative member.
    Guest,
}

impl Role {
    /// Whether this is the host role.
    pub fn is_host(self) -> bool {
        matches!(self, Role::Host)
    }
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Open a new session and become its host.
    CreateGame(CreateGameRequest),
    /// Join a waiting session as guest.
    JoinGame(JoinGameRequest),
    /// Own paddle position.
    PaddleMove(PaddleMove),
    /// Ball state (host only).
    BallSync(BallSync),
    /// Score change (host only).
    ScoreUpdate(ScoreUpdate),
    /// Power-up appeared (host only).
    PowerupSpawn(PowerupSpawn),
    /// Power-up picked up (host only).
    PowerupCollect(PowerupCollect),
    /// Local pause.
    Pause(GameRef),
    /// Local resume.
    Resume(GameRef),
    /// Match finished (host only).
    GameOver(GameOverRequest),
    /// Latency check.
    Ping(Ping),
}

/// `createGame` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    /// Display name as typed.
    pub player_name: String,
    /// Persistent client identity.
    pub player_id: String,
}

/// `joinGame` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameRequest {
    /// Session code as typed by the client.
    pub game_id: String,
    /// Display name as typed.
    pub player_name: String,
    /// Persistent client identity.
    pub player_id: String,
}

/// `paddleMove` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddleMove {
    /// Session code as typed by the client.
    pub game_id: String,
    /// Paddle position along its axis.
    pub position: f64,
}

/// `ballSync` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallSync {
    /// Session code as typed by the client.
    pub game_id: String,
    /// Ball state.
    pub ball_state: BallState,
}

/// `scoreUpdate` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdate {
    /// Session code as typed by the client.
    pub game_id: String,
    /// New score.
    pub score: Score,
}

/// `powerupSpawn` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerupSpawn {
    /// Session code as typed by the client.
    pub game_id: String,
    /// Spawned power-up.
    pub powerup: Powerup,
}

/// `powerupCollect` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerupCollect {
    /// Session code as typed by the client.
    pub game_id: String,
    /// Id of the collected power-up.
    pub powerup_id: u32,
    /// Who picked it up.
    pub collector: Role,
}

/// Payload of events that only name their session (`pause`, `resume`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRef {
    /// Session code as typed by the client.
    pub game_id: String,
}

/// `gameOver` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverRequest {
    /// Session code as typed by the client.
    pub game_id: String,
    /// Connection id of the winner.
    pub winner_id: ConnectionId,
}

/// `ping` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Client clock, echoed back.
    pub timestamp: u64,
}

impl ClientMessage {
    /// Wire name of the event, for logs.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::CreateGame(_) => "createGame",
            ClientMessage::JoinGame(_) => "joinGame",
            ClientMessage::PaddleMove(_) => "paddleMove",
            ClientMessage::BallSync(_) => "ballSync",
            ClientMessage::ScoreUpdate(_) => "scoreUpdate",
            ClientMessage::PowerupSpawn(_) => "powerupSpawn",
            ClientMessage::PowerupCollect(_) => "powerupCollect",
            ClientMessage::Pause(_) => "pause",
            ClientMessage::Resume(_) => "resume",
            ClientMessage::GameOver(_) => "gameOver",
            ClientMessage::Ping(_) => "ping",
        }
    }

    /// Whether this event is a high-rate state stream, where each frame
    /// supersedes the previous one.
    pub fn is_stream(&self) -> bool {
        matches!(self, ClientMessage::PaddleMove(_) | ClientMessage::BallSync(_))
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Handshake complete; tells the client its connection id.
    Connected(ConnectedInfo),
    /// Session allocated; the payload is the code to share.
    GameCreated(SessionCode),
    /// Both members present; match is on.
    GameStarted(GameStartInfo),
    /// Join refused.
    JoinError(String),
    /// Opponent paddle position.
    OpponentMoved(f64),
    /// Ball state from the host.
    BallSynced(BallState),
    /// Score from the host.
    ScoreUpdated(Score),
    /// Power-up spawned by the host.
    PowerupSpawned(Powerup),
    /// Power-up collection reported by the host.
    PowerupCollected(PowerupCollected),
    /// Opponent paused locally.
    OpponentPaused,
    /// Opponent resumed locally.
    OpponentResumed,
    /// Match finished.
    GameOver(GameOverInfo),
    /// Opponent's connection dropped; the session is gone.
    OpponentDisconnected,
    /// Session closed by the server.
    SessionClosed(SessionClosedInfo),
    /// New leaderboard top list.
    LeaderboardUpdated(Vec<LeaderboardEntry>),
    /// Latency check response.
    Pong(PongInfo),
}

/// `connected` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedInfo {
    /// Id of this connection.
    pub connection_id: ConnectionId,
}

/// `gameStarted` payload, personalised per recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartInfo {
    /// Whether the recipient is the host.
    pub is_host: bool,
    /// Session code.
    pub game_id: SessionCode,
    /// Recipient's display name.
    pub player_name: String,
    /// Opponent's display name.
    pub opponent_name: String,
}

/// `powerupCollected` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerupCollected {
    /// Id of the collected power-up.
    pub powerup_id: u32,
    /// Who picked it up.
    pub collector: Role,
}

/// `gameOver` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverInfo {
    /// Connection id of the winner.
    pub winner_id: ConnectionId,
}

/// Why the server closed a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// No relayed activity for too long.
    Idle,
    /// Server is shutting down.
    Shutdown,
}

/// `sessionClosed` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosedInfo {
    /// Why the session closed.
    pub reason: CloseReason,
}

/// `pong` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongInfo {
    /// Client clock, echoed back.
    pub timestamp: u64,
    /// Server clock, ms since the Unix epoch.
    pub server_time: u64,
}

impl ServerMessage {
    /// Wire name of the event, for logs.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Connected(_) => "connected",
            ServerMessage::GameCreated(_) => "gameCreated",
            ServerMessage::GameStarted(_) => "gameStarted",
            ServerMessage::JoinError(_) => "joinError",
            ServerMessage::OpponentMoved(_) => "opponentMoved",
            ServerMessage::BallSynced(_) => "ballSynced",
            ServerMessage::ScoreUpdated(_) => "scoreUpdated",
            ServerMessage::PowerupSpawned(_) => "powerupSpawned",
            ServerMessage::PowerupCollected(_) => "powerupCollected",
            ServerMessage::OpponentPaused => "opponentPaused",
            ServerMessage::OpponentResumed => "opponentResumed",
            ServerMessage::GameOver(_) => "gameOver",
            ServerMessage::OpponentDisconnected => "opponentDisconnected",
            ServerMessage::SessionClosed(_) => "sessionClosed",
            ServerMessage::LeaderboardUpdated(_) => "leaderboardUpdated",
            ServerMessage::Pong(_) => "pong",
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    ///
    /// Missing fields, wrong types and unknown events are all errors.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
