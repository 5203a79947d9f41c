//! SessionRegistry: one record per connected peer.
//!
//! The registry is the server's in-memory table of everyone currently
//! connected.  Each entry tracks:
//!
//! - The transport's [`PeerId`] and the server-assigned [`SessionId`].
//! - The display name, once the client has announced one.
//! - The lobby the session belongs to and its [`Role`] inside it.
//!
//! # Session lifecycle (for beginners)
//!
//! ```text
//! connect ──► anonymous ──► named ──► in lobby (Player | Spectator)
//!                 │            │              │
//!                 └────────────┴──────────────┴──► disconnect
//! ```
//!
//! Lobbies refer to sessions by [`SessionId`] only and resolve them here, so
//! removing a session can never leave a dangling reference behind.

use std::collections::HashMap;

use kalah_core::Seat;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::application::dispatcher::PeerId;
use crate::application::lobby_manager::LobbyId;

/// Unique identifier assigned to a session when its peer connects.
pub type SessionId = Uuid;

/// Longest display name accepted, in characters.
pub const MAX_USERNAME_CHARS: usize = 32;

/// Errors returned by registry operations.  None of them mutate the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("peer {0} is already connected")]
    DuplicateConnection(PeerId),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("invalid username {name:?}: {reason}")]
    InvalidUsername { name: String, reason: &'static str },
}

/// Membership role inside a lobby.
///
/// A spectator has no turn flag at all, so it can never be told it is its
/// turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Player { seat: Seat, turn: bool },
    Spectator,
}

impl Role {
    /// Turn flag as sent on the wire.
    pub fn turn(self) -> bool {
        matches!(self, Role::Player { turn: true, .. })
    }

    pub fn is_spectator(self) -> bool {
        matches!(self, Role::Spectator)
    }

    /// The seat of a player, `None` for spectators.
    pub fn seat(self) -> Option<Seat> {
        match self {
            Role::Player { seat, .. } => Some(seat),
            Role::Spectator => None,
        }
    }
}

/// Server-side record of one connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub peer: PeerId,
    pub name: Option<String>,
    pub lobby: Option<LobbyId>,
    /// Set while `lobby` is set.
    pub role: Option<Role>,
    /// Last client clock reading from a Timestamp frame.
    pub last_timestamp: Option<u64>,
}

impl Session {
    fn new(peer: PeerId) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            name: None,
            lobby: None,
            role: None,
            last_timestamp: None,
        }
    }

    /// The chosen name, or a stand-in derived from the peer id.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("guest-{}", self.peer),
        }
    }

    /// Turn flag for outbound frames; `false` outside a lobby.
    pub fn turn(&self) -> bool {
        self.role.is_some_and(Role::turn)
    }

    /// Spectator flag for outbound frames; `false` outside a lobby.
    pub fn is_spectator(&self) -> bool {
        self.role.is_some_and(Role::is_spectator)
    }
}

/// In-memory table of all connected sessions.
///
/// # Two maps
///
/// Inbound traffic arrives tagged with a [`PeerId`], while lobbies hold
/// [`SessionId`]s.  Keeping `peers: PeerId → SessionId` next to
/// `sessions: SessionId → Session` makes both lookups O(1).
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    peers: HashMap<PeerId, SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly connected peer.
    ///
    /// # Errors
    ///
    /// [`SessionError::DuplicateConnection`] if `peer` is already registered.
    pub fn on_connect(&mut self, peer: PeerId) -> Result<SessionId, SessionError> {
        if self.peers.contains_key(&peer) {
            return Err(SessionError::DuplicateConnection(peer));
        }
        let session = Session::new(peer);
        let id = session.id;
        self.peers.insert(peer, id);
        self.sessions.insert(id, session);
        debug!(%peer, session = %id, "session created");
        Ok(id)
    }

    /// Removes the session of `peer` and returns it.
    ///
    /// Lobby bookkeeping must already have happened; the registry only drops
    /// the record.
    ///
    /// # Errors
    ///
    /// [`SessionError::UnknownPeer`] if `peer` is not registered.
    pub fn on_disconnect(&mut self, peer: PeerId) -> Result<Session, SessionError> {
        let id = self
            .peers
            .remove(&peer)
            .ok_or(SessionError::UnknownPeer(peer))?;
        let session = self
            .sessions
            .remove(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        debug!(%peer, session = %id, "session removed");
        Ok(session)
    }

    /// Resolves the session of an inbound peer.
    ///
    /// # Errors
    ///
    /// [`SessionError::UnknownPeer`] if `peer` is not registered.
    pub fn lookup(&self, peer: PeerId) -> Result<SessionId, SessionError> {
        self.peers
            .get(&peer)
            .copied()
            .ok_or(SessionError::UnknownPeer(peer))
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Sets the display name of `id` and returns the stored (trimmed) name.
    ///
    /// # Errors
    ///
    /// - [`SessionError::UnknownSession`] if `id` is not registered.
    /// - [`SessionError::InvalidUsername`] if the trimmed name is empty,
    ///   longer than [`MAX_USERNAME_CHARS`], or contains a `,`.
    pub fn set_username(&mut self, id: SessionId, name: &str) -> Result<String, SessionError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;

        let trimmed = name.trim();
        let reason = if trimmed.is_empty() {
            Some("name is empty")
        } else if trimmed.chars().count() > MAX_USERNAME_CHARS {
            Some("name is longer than 32 characters")
        } else if trimmed.contains(',') {
            Some("name contains a comma")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(SessionError::InvalidUsername {
                name: name.to_string(),
                reason,
            });
        }

        session.name = Some(trimmed.to_string());
        Ok(trimmed.to_string())
    }

    /// Names of every named session, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .values()
            .filter_map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every connected peer.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.peers.keys().copied().collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
