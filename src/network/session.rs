//! Session Registry
//!
//! Owns every active session and enforces the membership invariants:
//!
//! - a session has one or two members, the first being the host;
//! - a connection is a member of at most one session;
//! - codes are unique among active sessions.
//!
//! Nothing outside this module mutates session membership.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::code::{generate_code, SessionCode};
use crate::core::ids::ConnectionId;
use crate::network::protocol::Role;

/// Maximum members per session.
pub const MAX_MEMBERS: usize = 2;

/// Display names longer than this are truncated (in characters).
pub const MAX_NAME_CHARS: usize = 20;

/// Trim and bound a display name. `None` if nothing is left.
pub fn normalize_display_name(raw: &str) -> Option<String> {
    let name: String = raw.trim().chars().take(MAX_NAME_CHARS).collect();
    let name = name.trim_end().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// One connected peer mapped to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Live connection of this member.
    pub connection_id: ConnectionId,
    /// Opaque label shown to the opponent.
    pub display_name: String,
    /// Client-chosen persistent identity. Only used for leaderboard attribution.
    pub player_id: String,
}

/// Session state. Terminal sessions are deleted rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Host alone, waiting for a guest.
    Waiting,
    /// Both members present.
    Playing,
}

/// A waiting or running match.
#[derive(Debug, Clone)]
pub struct Session {
    /// Shareable code, also the registry key.
    pub code: SessionCode,
    /// Current state.
    pub state: SessionState,
    /// `members[0]` is host, `members[1]` is guest.
    members: Vec<Participant>,
    /// Last relayed event.
    last_activity: Instant,
}

impl Session {
    fn new(code: SessionCode, host: Participant) -> Self {
        Self {
            code,
            state: SessionState::Waiting,
            members: vec![host],
            last_activity: Instant::now(),
        }
    }

    /// Members in authority order.
    pub fn members(&self) -> &[Participant] {
        &self.members
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// The creator.
    pub fn host(&self) -> &Participant {
        &self.members[0]
    }

    /// The joiner, once present.
    pub fn guest(&self) -> Option<&Participant> {
        self.members.get(1)
    }

    /// Member entry for `connection_id`.
    pub fn member(&self, connection_id: &ConnectionId) -> Option<&Participant> {
        self.members.iter().find(|m| m.connection_id == *connection_id)
    }

    /// Role of `connection_id` in this session.
    pub fn role_of(&self, connection_id: &ConnectionId) -> Option<Role> {
        match self.members.iter().position(|m| m.connection_id == *connection_id)? {
            0 => Some(Role::Host),
            _ => Some(Role::Guest),
        }
    }

    /// The other member, if there is one.
    pub fn opponent_of(&self, connection_id: &ConnectionId) -> Option<&Participant> {
        self.member(connection_id)?;
        self.members.iter().find(|m| m.connection_id != *connection_id)
    }

    /// When the session last relayed an event.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= timeout
    }
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinAccepted {
    /// Joined session.
    pub code: SessionCode,
    /// Role assigned to the joiner (always guest).
    pub role: Role,
    /// The session's host.
    pub host: Participant,
    /// The joiner.
    pub guest: Participant,
}

/// Result of removing a departing member.
#[derive(Debug, Clone)]
pub struct RemovedMember {
    /// Destroyed session.
    pub code: SessionCode,
    /// The departing member.
    pub removed: Participant,
    /// The member left behind, to be notified.
    pub remaining: Option<Participant>,
    /// Whether the match had started.
    pub was_playing: bool,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session with that code.
    #[error("Game not found.")]
    NotFound,

    /// Session already has two members.
    #[error("Game is full.")]
    Full,

    /// Connection is already a member of a session.
    #[error("Already in a game.")]
    AlreadyInSession,

    /// No free code after repeated attempts.
    #[error("No free session code available")]
    CodeSpaceExhausted,
}

// =============================================================================
// SESSION REGISTRY
// =============================================================================

/// Table of active sessions.
pub struct SessionRegistry {
    /// Active sessions by code.
    sessions: HashMap<SessionCode, Session>,
    /// Connection to session mapping.
    member_sessions: HashMap<ConnectionId, SessionCode>,
    /// Code generator.
    rng: StdRng,
}

impl SessionRegistry {
    /// Create an empty registry with an entropy-seeded code generator.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create an empty registry with a fixed seed (reproducible codes).
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            sessions: HashMap::new(),
            member_sessions: HashMap::new(),
            rng,
        }
    }

    /// Allocate a session with `host` as its only member.
    pub fn create_session(&mut self, host: Participant) -> Result<SessionCode, SessionError> {
        if self.member_sessions.contains_key(&host.connection_id) {
            return Err(SessionError::AlreadyInSession);
        }

        let sessions = &self.sessions;
        let code = generate_code(&mut self.rng, |c| sessions.contains_key(c))
            .ok_or(SessionError::CodeSpaceExhausted)?;

        self.member_sessions.insert(host.connection_id, code.clone());
        self.sessions.insert(code.clone(), Session::new(code.clone(), host));

        Ok(code)
    }

    /// Add `guest` to a waiting session. Failures leave the registry untouched.
    pub fn join_session(
        &mut self,
        code: &SessionCode,
        guest: Participant,
    ) -> Result<JoinAccepted, SessionError> {
        if self.member_sessions.contains_key(&guest.connection_id) {
            return Err(SessionError::AlreadyInSession);
        }

        let session = self.sessions.get_mut(code).ok_or(SessionError::NotFound)?;
        if session.members.len() >= MAX_MEMBERS {
            return Err(SessionError::Full);
        }

        session.members.push(guest.clone());
        session.state = SessionState::Playing;
        session.last_activity = Instant::now();
        let host = session.host().clone();

        self.member_sessions.insert(guest.connection_id, code.clone());

        Ok(JoinAccepted {
            code: code.clone(),
            role: Role::Guest,
            host,
            guest,
        })
    }

    /// Remove a departing connection. The whole session is destroyed; the
    /// other member (if any) is returned so the caller can notify them.
    ///
    /// Returns `None` if the connection is not in any session, which makes
    /// repeated calls harmless.
    pub fn remove_member(&mut self, connection_id: &ConnectionId) -> Option<RemovedMember> {
        let code = self.member_sessions.get(connection_id)?.clone();
        let session = self.close_session(&code)?;
        let was_playing = session.state == SessionState::Playing;

        let mut removed = None;
        let mut remaining = None;
        for member in session.members {
            if member.connection_id == *connection_id {
                removed = Some(member);
            } else {
                remaining = Some(member);
            }
        }

        Some(RemovedMember {
            code,
            removed: removed?,
            remaining,
            was_playing,
        })
    }

    /// Delete a session and forget all of its members.
    pub fn close_session(&mut self, code: &SessionCode) -> Option<Session> {
        let session = self.sessions.remove(code)?;
        for member in &session.members {
            self.member_sessions.remove(&member.connection_id);
        }
        Some(session)
    }

    /// Look up a session by code.
    pub fn get_session(&self, code: &SessionCode) -> Option<&Session> {
        self.sessions.get(code)
    }

    /// Session `connection_id` belongs to.
    pub fn session_of(&self, connection_id: &ConnectionId) -> Option<&Session> {
        let code = self.member_sessions.get(connection_id)?;
        self.sessions.get(code)
    }

    /// Record relayed activity on a session.
    pub fn touch(&mut self, code: &SessionCode) {
        if let Some(session) = self.sessions.get_mut(code) {
            session.last_activity = Instant::now();
        }
    }

    /// Sessions with no activity for at least `timeout` as of `now`.
    pub fn idle_sessions(&self, now: Instant, timeout: Duration) -> Vec<SessionCode> {
        self.sessions
            .values()
            .filter(|s| s.is_idle(now, timeout))
            .map(|s| s.code.clone())
            .collect()
    }

    /// Codes of every active session.
    pub fn codes(&self) -> Vec<SessionCode> {
        self.sessions.keys().cloned().collect()
    }

    /// Active session count.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is active.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
