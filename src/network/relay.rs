//! Relay Protocol Handler
//!
//! Every inbound event passes through [`Relay`], which decides who may send
//! what, when, and forwards accepted events to the sender's opponent only.
//!
//! Per-connection state, derived from the registry:
//!
//! ```text
//! Unpaired --createGame--> Waiting --guest joins--> Paired(Host)
//! Unpaired --joinGame----------------------------> Paired(Guest)
//! Paired --gameOver | disconnect | idle--> Unpaired / closed
//! ```
//!
//! The host is authoritative for ball physics, score, power-ups and the end
//! of the match. Events that break the rules are dropped and logged; the
//! opponent never hears about them.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::code::SessionCode;
use crate::core::ids::ConnectionId;
use crate::leaderboard::{LeaderboardEntry, WinRecord};
use crate::network::connection::ConnectionManager;
use crate::network::protocol::{
    ClientMessage, CloseReason, CreateGameRequest, GameOverInfo, GameOverRequest, GameStartInfo,
    JoinGameRequest, PongInfo, PowerupCollected, Role, ServerMessage, SessionClosedInfo,
};
use crate::network::session::{
    normalize_display_name, Participant, SessionError, SessionRegistry, SessionState,
};

/// Where a connection stands in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not in any session.
    Unpaired,
    /// Hosting a session nobody has joined yet.
    Waiting,
    /// In a running match.
    Paired(Role),
}

/// Protocol violations and join failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Sender is not a live connection.
    #[error("unknown connection")]
    UnknownConnection,

    /// Event requires a running match.
    #[error("not in a running match")]
    NotPaired,

    /// Event is reserved for the host.
    #[error("{event} is host-only")]
    NotHost {
        /// Offending event.
        event: &'static str,
    },

    /// Event names a different session than the sender's.
    #[error("event names game {got}, sender is in {expected}")]
    SessionMismatch {
        /// Sender's session.
        expected: SessionCode,
        /// Session named by the event.
        got: SessionCode,
    },

    /// Display name empty after trimming.
    #[error("Player name is required.")]
    InvalidName,

    /// Registry refused the operation.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Sender's view of its running match.
struct Pairing {
    code: SessionCode,
    role: Role,
    opponent: ConnectionId,
}

impl Pairing {
    fn require_host(&self, event: &'static str) -> Result<(), RelayError> {
        if self.role.is_host() {
            Ok(())
        } else {
            Err(RelayError::NotHost { event })
        }
    }
}

/// The relay: session registry plus live connections.
pub struct Relay {
    registry: SessionRegistry,
    connections: ConnectionManager,
}

impl Relay {
    /// Relay over `registry` with no connections.
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            connections: ConnectionManager::new(),
        }
    }

    /// Read access to the registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Read access to the live connections.
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// A connection finished its handshake.
    pub fn connect(&mut self, id: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.connections.register(id, sender);
        debug!("Connection {} registered ({} live)", id.short(), self.connections.len());
    }

    /// Lifecycle state of `id`.
    pub fn connection_state(&self, id: &ConnectionId) -> ConnectionState {
        match self.registry.session_of(id) {
            None => ConnectionState::Unpaired,
            Some(session) if session.state == SessionState::Waiting => ConnectionState::Waiting,
            Some(session) => session
                .role_of(id)
                .map_or(ConnectionState::Unpaired, ConnectionState::Paired),
        }
    }

    /// Handle one inbound event. Rejected events are logged and dropped.
    ///
    /// Returns a win to record when the event ended a match.
    pub fn handle_message(
        &mut self,
        from: ConnectionId,
        message: ClientMessage,
    ) -> Option<WinRecord> {
        let event = message.event_name();
        match self.dispatch(from, message) {
            Ok(win) => win,
            Err(e @ (RelayError::NotHost { .. } | RelayError::SessionMismatch { .. })) => {
                warn!("Dropped {} from {}: {}", event, from.short(), e);
                None
            }
            Err(e) => {
                debug!("Dropped {} from {}: {}", event, from.short(), e);
                None
            }
        }
    }

    /// Handle one inbound event, reporting why it was rejected.
    pub fn dispatch(
        &mut self,
        from: ConnectionId,
        message: ClientMessage,
    ) -> Result<Option<WinRecord>, RelayError> {
        if !self.connections.is_connected(&from) {
            return Err(RelayError::UnknownConnection);
        }

        match message {
            ClientMessage::CreateGame(req) => {
                self.create_game(from, req)?;
                Ok(None)
            }
            ClientMessage::JoinGame(req) => {
                if let Err(e) = self.join_game(from, req) {
                    self.connections.send(&from, ServerMessage::JoinError(e.to_string()));
                    return Err(e);
                }
                Ok(None)
            }
            ClientMessage::PaddleMove(m) => {
                let pairing = self.require_paired(&from, &m.game_id)?;
                self.forward(&pairing, ServerMessage::OpponentMoved(m.position));
                Ok(None)
            }
            ClientMessage::BallSync(m) => {
                let pairing = self.require_paired(&from, &m.game_id)?;
                pairing.require_host("ballSync")?;
                self.forward(&pairing, ServerMessage::BallSynced(m.ball_state));
                Ok(None)
            }
            ClientMessage::ScoreUpdate(m) => {
                let pairing = self.require_paired(&from, &m.game_id)?;
                pairing.require_host("scoreUpdate")?;
                // Echoed to the host too; both render from the same source.
                self.connections.send(&from, ServerMessage::ScoreUpdated(m.score));
                self.forward(&pairing, ServerMessage::ScoreUpdated(m.score));
                Ok(None)
            }
            ClientMessage::PowerupSpawn(m) => {
                let pairing = self.require_paired(&from, &m.game_id)?;
                pairing.require_host("powerupSpawn")?;
                self.forward(&pairing, ServerMessage::PowerupSpawned(m.powerup));
                Ok(None)
            }
            ClientMessage::PowerupCollect(m) => {
                let pairing = self.require_paired(&from, &m.game_id)?;
                pairing.require_host("powerupCollect")?;
                self.forward(
                    &pairing,
                    ServerMessage::PowerupCollected(PowerupCollected {
                        powerup_id: m.powerup_id,
                        collector: m.collector,
                    }),
                );
                Ok(None)
            }
            ClientMessage::Pause(m) => {
                let pairing = self.require_paired(&from, &m.game_id)?;
                self.forward(&pairing, ServerMessage::OpponentPaused);
                Ok(None)
            }
            ClientMessage::Resume(m) => {
                let pairing = self.require_paired(&from, &m.game_id)?;
                self.forward(&pairing, ServerMessage::OpponentResumed);
                Ok(None)
            }
            ClientMessage::GameOver(m) => self.game_over(from, m),
            ClientMessage::Ping(ping) => {
                let server_time = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                self.connections.send(
                    &from,
                    ServerMessage::Pong(PongInfo {
                        timestamp: ping.timestamp,
                        server_time,
                    }),
                );
                Ok(None)
            }
        }
    }

    fn create_game(
        &mut self,
        from: ConnectionId,
        req: CreateGameRequest,
    ) -> Result<(), RelayError> {
        let name = normalize_display_name(&req.player_name).ok_or(RelayError::InvalidName)?;
        let code = self.registry.create_session(Participant {
            connection_id: from,
            display_name: name.clone(),
            player_id: req.player_id,
        })?;

        info!("Game {} created by {} ({})", code, name, from.short());
        self.connections.send(&from, ServerMessage::GameCreated(code));
        Ok(())
    }

    fn join_game(&mut self, from: ConnectionId, req: JoinGameRequest) -> Result<(), RelayError> {
        let name = normalize_display_name(&req.player_name).ok_or(RelayError::InvalidName)?;
        let code = SessionCode::normalize(&req.game_id);

        let accepted = self.registry.join_session(&code, Participant {
            connection_id: from,
            display_name: name,
            player_id: req.player_id,
        })?;

        let host = &accepted.host;
        let guest = &accepted.guest;
        self.connections.send(
            &host.connection_id,
            ServerMessage::GameStarted(GameStartInfo {
                is_host: true,
                game_id: accepted.code.clone(),
                player_name: host.display_name.clone(),
                opponent_name: guest.display_name.clone(),
            }),
        );
        self.connections.send(
            &guest.connection_id,
            ServerMessage::GameStarted(GameStartInfo {
                is_host: false,
                game_id: accepted.code.clone(),
                player_name: guest.display_name.clone(),
                opponent_name: host.display_name.clone(),
            }),
        );

        info!(
            "{} ({}) joined game {}. Starting game.",
            guest.display_name,
            from.short(),
            accepted.code
        );
        Ok(())
    }

    fn game_over(
        &mut self,
        from: ConnectionId,
        m: GameOverRequest,
    ) -> Result<Option<WinRecord>, RelayError> {
        let pairing = self.require_paired(&from, &m.game_id)?;
        pairing.require_host("gameOver")?;

        // Peers hear about the result before anything else happens.
        let over = ServerMessage::GameOver(GameOverInfo {
            winner_id: m.winner_id,
        });
        self.connections.send(&from, over.clone());
        self.connections.send(&pairing.opponent, over);

        let Some(session) = self.registry.close_session(&pairing.code) else {
            return Ok(None);
        };

        match session.member(&m.winner_id) {
            Some(winner) => {
                info!("Game {} over. Winner: {}", session.code, winner.display_name);
                Ok(Some(WinRecord {
                    player_id: winner.player_id.clone(),
                    name: winner.display_name.clone(),
                }))
            }
            None => {
                warn!("Game {} over with non-member winner {}", session.code, m.winner_id);
                Ok(None)
            }
        }
    }

    /// A connection went away. Safe to call more than once.
    ///
    /// The opponent, if any, is told exactly once and is credited with the
    /// win when the match had started.
    pub fn disconnect(&mut self, id: &ConnectionId) -> Option<WinRecord> {
        if self.connections.unregister(id) {
            debug!("Connection {} disconnected", id.short());
        }

        let removed = self.registry.remove_member(id)?;
        info!("Game {} closed due to disconnect.", removed.code);

        let remaining = removed.remaining?;
        self.connections
            .send(&remaining.connection_id, ServerMessage::OpponentDisconnected);

        removed.was_playing.then(|| WinRecord {
            player_id: remaining.player_id,
            name: remaining.display_name,
        })
    }

    /// Close sessions idle for at least `timeout`. Returns how many.
    pub fn reap_idle(&mut self, now: Instant, timeout: Duration) -> usize {
        let idle = self.registry.idle_sessions(now, timeout);
        for code in &idle {
            self.close_with_notice(code, CloseReason::Idle);
        }
        idle.len()
    }

    /// Close every session, telling members why.
    pub fn close_all(&mut self, reason: CloseReason) -> usize {
        let codes = self.registry.codes();
        for code in &codes {
            self.close_with_notice(code, reason);
        }
        codes.len()
    }

    /// Push a new leaderboard to every live connection.
    pub fn broadcast_leaderboard(&self, entries: Vec<LeaderboardEntry>) -> usize {
        self.connections
            .broadcast(&ServerMessage::LeaderboardUpdated(entries))
    }

    fn close_with_notice(&mut self, code: &SessionCode, reason: CloseReason) {
        if let Some(session) = self.registry.close_session(code) {
            for member in session.members() {
                self.connections.send(
                    &member.connection_id,
                    ServerMessage::SessionClosed(SessionClosedInfo { reason }),
                );
            }
            info!("Game {} closed ({:?})", code, reason);
        }
    }

    fn require_paired(&self, from: &ConnectionId, game_id: &str) -> Result<Pairing, RelayError> {
        let session = self.registry.session_of(from).ok_or(RelayError::NotPaired)?;

        let named = SessionCode::normalize(game_id);
        if named != session.code {
            return Err(RelayError::SessionMismatch {
                expected: session.code.clone(),
                got: named,
            });
        }

        let opponent = session.opponent_of(from).ok_or(RelayError::NotPaired)?;
        let role = session.role_of(from).ok_or(RelayError::NotPaired)?;

        Ok(Pairing {
            code: session.code.clone(),
            role,
            opponent: opponent.connection_id,
        })
    }

    fn forward(&mut self, pairing: &Pairing, message: ServerMessage) {
        self.connections.send(&pairing.opponent, message);
        self.registry.touch(&pairing.code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{
        BallState, BallSync, GameRef, PaddleMove, Ping, Powerup, PowerupCollect, PowerupSpawn,
        Score, ScoreUpdate, Vec3,
    };

    struct Client {
        id: ConnectionId,
        rx: mpsc::Receiver<ServerMessage>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    fn connect(relay: &mut Relay) -> Client {
        let (tx, mut rx) = mpsc::channel(64);
        let id = ConnectionId::new_v4();
        relay.connect(id, tx);
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Connected(_))));
        Client { id, rx }
    }

    fn create(relay: &mut Relay, client: &mut Client, name: &str) -> SessionCode {
        relay.handle_message(
            client.id,
            ClientMessage::CreateGame(CreateGameRequest {
                player_name: name.to_string(),
                player_id: format!("player_{}", name),
            }),
        );
        match client.drain().as_slice() {
            [ServerMessage::GameCreated(code)] => code.clone(),
            other => panic!("expected gameCreated, got {:?}", other),
        }
    }

    fn join(relay: &mut Relay, client: &Client, code: &str, name: &str) {
        relay.handle_message(
            client.id,
            ClientMessage::JoinGame(JoinGameRequest {
                game_id: code.to_string(),
                player_name: name.to_string(),
                player_id: format!("player_{}", name),
            }),
        );
    }

    fn pair(relay: &mut Relay) -> (Client, Client, SessionCode) {
        let mut host = connect(relay);
        let mut guest = connect(relay);
        let code = create(relay, &mut host, "ann");
        join(relay, &guest, code.as_str(), "bob");
        host.drain();
        guest.drain();
        (host, guest, code)
    }

    fn ball() -> BallState {
        BallState {
            position: Vec3::new(1.0, 1.0, 0.0),
            velocity: Vec3::new(0.0, 0.0, -15.0),
            extra: Default::default(),
        }
    }

    fn ball_sync(code: &SessionCode) -> ClientMessage {
        ClientMessage::BallSync(BallSync {
            game_id: code.to_string(),
            ball_state: ball(),
        })
    }

    fn new_relay() -> Relay {
        Relay::new(SessionRegistry::with_seed(11))
    }

    #[test]
    fn test_create_and_join_assigns_roles() {
        let mut relay = new_relay();
        let mut host = connect(&mut relay);
        let mut guest = connect(&mut relay);

        let code = create(&mut relay, &mut host, "ann");
        assert!(code.is_well_formed());
        assert_eq!(relay.connection_state(&host.id), ConnectionState::Waiting);

        join(&mut relay, &guest, code.as_str(), "bob");

        assert_eq!(
            host.drain(),
            vec![ServerMessage::GameStarted(GameStartInfo {
                is_host: true,
                game_id: code.clone(),
                player_name: "ann".to_string(),
                opponent_name: "bob".to_string(),
            })]
        );
        assert_eq!(
            guest.drain(),
            vec![ServerMessage::GameStarted(GameStartInfo {
                is_host: false,
                game_id: code.clone(),
                player_name: "bob".to_string(),
                opponent_name: "ann".to_string(),
            })]
        );
        assert_eq!(relay.connection_state(&host.id), ConnectionState::Paired(Role::Host));
        assert_eq!(relay.connection_state(&guest.id), ConnectionState::Paired(Role::Guest));
    }

    #[test]
    fn test_join_normalizes_code() {
        let mut relay = new_relay();
        let mut host = connect(&mut relay);
        let mut guest = connect(&mut relay);
        let code = create(&mut relay, &mut host, "ann");

        join(&mut relay, &guest, &format!(" {} ", code.as_str().to_lowercase()), "bob");
        assert!(matches!(guest.drain().as_slice(), [ServerMessage::GameStarted(_)]));
    }

    #[test]
    fn test_join_unknown_code() {
        let mut relay = new_relay();
        let mut host = connect(&mut relay);
        let mut guest = connect(&mut relay);
        let code = create(&mut relay, &mut host, "ann");

        let other = if code.as_str() == "ZZZZZZ" { "YYYYYY" } else { "ZZZZZZ" };
        join(&mut relay, &guest, other, "bob");

        assert_eq!(guest.drain(), vec![ServerMessage::JoinError("Game not found.".to_string())]);
        assert!(host.drain().is_empty());
        assert_eq!(relay.registry().len(), 1);
        assert_eq!(relay.connection_state(&guest.id), ConnectionState::Unpaired);
    }

    #[test]
    fn test_join_full_session() {
        let mut relay = new_relay();
        let (mut host, mut guest, code) = pair(&mut relay);
        let mut third = connect(&mut relay);

        join(&mut relay, &third, code.as_str(), "cid");

        assert_eq!(third.drain(), vec![ServerMessage::JoinError("Game is full.".to_string())]);
        assert!(host.drain().is_empty());
        assert!(guest.drain().is_empty());
        assert_eq!(relay.registry().get_session(&code).unwrap().member_count(), 2);
    }

    #[test]
    fn test_join_requires_name() {
        let mut relay = new_relay();
        let mut host = connect(&mut relay);
        let mut guest = connect(&mut relay);
        let code = create(&mut relay, &mut host, "ann");

        join(&mut relay, &guest, code.as_str(), "   ");
        assert_eq!(
            guest.drain(),
            vec![ServerMessage::JoinError("Player name is required.".to_string())]
        );
        assert_eq!(relay.connection_state(&host.id), ConnectionState::Waiting);
    }

    #[test]
    fn test_create_while_in_session_is_dropped() {
        let mut relay = new_relay();
        let (mut host, _guest, _) = pair(&mut relay);

        let result = relay.dispatch(
            host.id,
            ClientMessage::CreateGame(CreateGameRequest {
                player_name: "ann".to_string(),
                player_id: "player_ann".to_string(),
            }),
        );
        assert_eq!(result, Err(RelayError::Session(SessionError::AlreadyInSession)));
        assert!(host.drain().is_empty());
        assert_eq!(relay.registry().len(), 1);
    }

    #[test]
    fn test_create_with_blank_name_is_dropped() {
        let mut relay = new_relay();
        let mut client = connect(&mut relay);
        let result = relay.dispatch(
            client.id,
            ClientMessage::CreateGame(CreateGameRequest {
                player_name: "".to_string(),
                player_id: "player_x".to_string(),
            }),
        );
        assert_eq!(result, Err(RelayError::InvalidName));
        assert!(client.drain().is_empty());
        assert!(relay.registry().is_empty());
    }

    #[test]
    fn test_ball_sync_forwarded_verbatim_without_dedup() {
        let mut relay = new_relay();
        let (mut host, mut guest, code) = pair(&mut relay);

        relay.handle_message(host.id, ball_sync(&code));
        relay.handle_message(host.id, ball_sync(&code));

        assert_eq!(
            guest.drain(),
            vec![ServerMessage::BallSynced(ball()), ServerMessage::BallSynced(ball())]
        );
        assert!(host.drain().is_empty());
    }

    #[test]
    fn test_guest_ball_sync_never_reaches_host() {
        let mut relay = new_relay();
        let (mut host, mut guest, code) = pair(&mut relay);

        let result = relay.dispatch(guest.id, ball_sync(&code));
        assert_eq!(result, Err(RelayError::NotHost { event: "ballSync" }));
        assert!(host.drain().is_empty());
        assert!(guest.drain().is_empty());
    }

    #[test]
    fn test_score_update_authority() {
        let mut relay = new_relay();
        let (mut host, mut guest, code) = pair(&mut relay);
        let score = Score {
            player: 2,
            opponent: 1,
        };
        let update = ClientMessage::ScoreUpdate(ScoreUpdate {
            game_id: code.to_string(),
            score,
        });

        relay.handle_message(guest.id, update.clone());
        assert!(host.drain().is_empty());
        assert!(guest.drain().is_empty());
        assert_eq!(relay.registry().get_session(&code).unwrap().member_count(), 2);

        relay.handle_message(host.id, update);
        assert_eq!(host.drain(), vec![ServerMessage::ScoreUpdated(score)]);
        assert_eq!(guest.drain(), vec![ServerMessage::ScoreUpdated(score)]);
    }

    #[test]
    fn test_paddle_and_pause_go_both_ways() {
        let mut relay = new_relay();
        let (mut host, mut guest, code) = pair(&mut relay);

        relay.handle_message(
            guest.id,
            ClientMessage::PaddleMove(PaddleMove {
                game_id: code.to_string(),
                position: -2.5,
            }),
        );
        relay.handle_message(
            host.id,
            ClientMessage::PaddleMove(PaddleMove {
                game_id: code.to_string(),
                position: 0.75,
            }),
        );
        relay.handle_message(
            guest.id,
            ClientMessage::Pause(GameRef {
                game_id: code.to_string(),
            }),
        );
        relay.handle_message(
            host.id,
            ClientMessage::Resume(GameRef {
                game_id: code.to_string(),
            }),
        );

        assert_eq!(
            host.drain(),
            vec![ServerMessage::OpponentMoved(-2.5), ServerMessage::OpponentPaused]
        );
        assert_eq!(
            guest.drain(),
            vec![ServerMessage::OpponentMoved(0.75), ServerMessage::OpponentResumed]
        );
    }

    #[test]
    fn test_powerups_are_host_only() {
        let mut relay = new_relay();
        let (mut host, mut guest, code) = pair(&mut relay);
        let powerup = Powerup {
            id: 4,
            kind: "wide_paddle".to_string(),
            position: Vec3::new(0.5, 1.0, -3.0),
        };
        let spawn = ClientMessage::PowerupSpawn(PowerupSpawn {
            game_id: code.to_string(),
            powerup: powerup.clone(),
        });
        let collect = |collector| {
            ClientMessage::PowerupCollect(PowerupCollect {
                game_id: code.to_string(),
                powerup_id: 4,
                collector,
            })
        };

        relay.handle_message(guest.id, spawn.clone());
        relay.handle_message(guest.id, collect(Role::Guest));
        assert!(host.drain().is_empty());

        relay.handle_message(host.id, spawn);
        relay.handle_message(host.id, collect(Role::Guest));
        assert_eq!(
            guest.drain(),
            vec![
                ServerMessage::PowerupSpawned(powerup),
                ServerMessage::PowerupCollected(PowerupCollected {
                    powerup_id: 4,
                    collector: Role::Guest,
                }),
            ]
        );
    }

    #[test]
    fn test_events_for_other_sessions_are_dropped() {
        let mut relay = new_relay();
        let (mut host_a, mut guest_a, code_a) = pair(&mut relay);
        let (mut host_b, mut guest_b, code_b) = pair(&mut relay);

        let result = relay.dispatch(host_a.id, ball_sync(&code_b));
        assert!(matches!(result, Err(RelayError::SessionMismatch { .. })));

        relay.handle_message(host_a.id, ball_sync(&code_a));
        assert_eq!(guest_a.drain(), vec![ServerMessage::BallSynced(ball())]);
        assert!(host_a.drain().is_empty());
        assert!(host_b.drain().is_empty());
        assert!(guest_b.drain().is_empty());
    }

    #[test]
    fn test_gameplay_before_pairing_is_dropped() {
        let mut relay = new_relay();
        let mut host = connect(&mut relay);
        let code = create(&mut relay, &mut host, "ann");

        let result = relay.dispatch(
            host.id,
            ClientMessage::PaddleMove(PaddleMove {
                game_id: code.to_string(),
                position: 1.0,
            }),
        );
        assert_eq!(result, Err(RelayError::NotPaired));

        let loner = connect(&mut relay);
        let result = relay.dispatch(loner.id, ball_sync(&code));
        assert_eq!(result, Err(RelayError::NotPaired));
        assert!(host.drain().is_empty());
    }

    #[test]
    fn test_game_over_broadcasts_and_closes() {
        let mut relay = new_relay();
        let (mut host, mut guest, code) = pair(&mut relay);

        let win = relay.handle_message(
            host.id,
            ClientMessage::GameOver(GameOverRequest {
                game_id: code.to_string(),
                winner_id: host.id,
            }),
        );

        let expected = ServerMessage::GameOver(GameOverInfo { winner_id: host.id });
        assert_eq!(host.drain(), vec![expected.clone()]);
        assert_eq!(guest.drain(), vec![expected]);
        assert!(relay.registry().get_session(&code).is_none());
        assert_eq!(
            win,
            Some(WinRecord {
                player_id: "player_ann".to_string(),
                name: "ann".to_string(),
            })
        );

        // Leaving afterwards notifies nobody.
        assert!(relay.disconnect(&guest.id).is_none());
        assert!(host.drain().is_empty());
        assert_eq!(relay.connection_state(&host.id), ConnectionState::Unpaired);
    }

    #[test]
    fn test_game_over_from_guest_is_ignored() {
        let mut relay = new_relay();
        let (mut host, mut guest, code) = pair(&mut relay);

        let win = relay.handle_message(
            guest.id,
            ClientMessage::GameOver(GameOverRequest {
                game_id: code.to_string(),
                winner_id: guest.id,
            }),
        );
        assert!(win.is_none());
        assert!(host.drain().is_empty());
        assert!(guest.drain().is_empty());
        assert!(relay.registry().get_session(&code).is_some());
    }

    #[test]
    fn test_game_over_with_stranger_winner() {
        let mut relay = new_relay();
        let (mut host, mut guest, code) = pair(&mut relay);
        let stranger = ConnectionId::new_v4();

        let win = relay.handle_message(
            host.id,
            ClientMessage::GameOver(GameOverRequest {
                game_id: code.to_string(),
                winner_id: stranger,
            }),
        );
        assert!(win.is_none());
        assert_eq!(host.drain().len(), 1);
        assert_eq!(guest.drain().len(), 1);
        assert!(relay.registry().is_empty());
    }

    #[test]
    fn test_guest_drop_notifies_host_once() {
        let mut relay = new_relay();
        let (mut host, guest, code) = pair(&mut relay);

        let win = relay.disconnect(&guest.id);
        assert_eq!(
            win,
            Some(WinRecord {
                player_id: "player_ann".to_string(),
                name: "ann".to_string(),
            })
        );
        assert!(relay.disconnect(&guest.id).is_none());
        assert_eq!(host.drain(), vec![ServerMessage::OpponentDisconnected]);

        let mut late = connect(&mut relay);
        join(&mut relay, &late, code.as_str(), "cid");
        assert_eq!(late.drain(), vec![ServerMessage::JoinError("Game not found.".to_string())]);
    }

    #[test]
    fn test_waiting_host_drop_credits_nobody() {
        let mut relay = new_relay();
        let mut host = connect(&mut relay);
        create(&mut relay, &mut host, "ann");

        assert!(relay.disconnect(&host.id).is_none());
        assert!(relay.registry().is_empty());
        assert!(relay.connections().is_empty());
    }

    #[test]
    fn test_reap_idle_sessions() {
        let mut relay = new_relay();
        let (mut host, mut guest, _) = pair(&mut relay);
        let timeout = Duration::from_secs(600);

        assert_eq!(relay.reap_idle(Instant::now(), timeout), 0);

        let later = Instant::now() + Duration::from_secs(601);
        assert_eq!(relay.reap_idle(later, timeout), 1);

        let closed = ServerMessage::SessionClosed(SessionClosedInfo {
            reason: CloseReason::Idle,
        });
        assert_eq!(host.drain(), vec![closed.clone()]);
        assert_eq!(guest.drain(), vec![closed]);
        assert!(relay.registry().is_empty());
    }

    #[test]
    fn test_close_all() {
        let mut relay = new_relay();
        let (mut host, _guest, _) = pair(&mut relay);
        let mut waiting = connect(&mut relay);
        create(&mut relay, &mut waiting, "cid");

        assert_eq!(relay.close_all(CloseReason::Shutdown), 2);
        assert!(relay.registry().is_empty());
        assert_eq!(
            host.drain(),
            vec![ServerMessage::SessionClosed(SessionClosedInfo {
                reason: CloseReason::Shutdown,
            })]
        );
        assert_eq!(waiting.drain().len(), 1);
    }

    #[test]
    fn test_ping_pong() {
        let mut relay = new_relay();
        let mut client = connect(&mut relay);

        relay.handle_message(client.id, ClientMessage::Ping(Ping { timestamp: 42 }));
        match client.drain().as_slice() {
            [ServerMessage::Pong(pong)] => {
                assert_eq!(pong.timestamp, 42);
                assert!(pong.server_time > 0);
            }
            other => panic!("expected pong, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_connection_rejected() {
        let mut relay = new_relay();
        let ping = ClientMessage::Ping(Ping { timestamp: 1 });
        let result = relay.dispatch(ConnectionId::new_v4(), ping);
        assert_eq!(result, Err(RelayError::UnknownConnection));
    }

    #[test]
    fn test_leaderboard_broadcast() {
        let mut relay = new_relay();
        let mut a = connect(&mut relay);
        let mut b = connect(&mut relay);

        let entries = vec![LeaderboardEntry {
            name: "ann".to_string(),
            wins: 1,
            player_id: "player_ann".to_string(),
        }];
        assert_eq!(relay.broadcast_leaderboard(entries.clone()), 2);
        assert_eq!(a.drain(), vec![ServerMessage::LeaderboardUpdated(entries.clone())]);
        assert_eq!(b.drain(), vec![ServerMessage::LeaderboardUpdated(entries)]);
    }
}
