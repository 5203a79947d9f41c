//! LobbyManager: the fixed pool of game lobbies and their state machine.
//!
//! # Lobby lifecycle (for beginners)
//!
//! ```text
//!            first player          second player
//!   Idle ───────────────► Filling ───────────────► Started
//!    ▲                      │                      │    │
//!    │   sole player leaves │        game ends     │    │ player leaves
//!    ├──────────────────────┘         ┌────────────┘    │ or turn times out
//!    │                                ▼                 ▼
//!    └────────── recycle ──────── Finished           Aborted
//!                     ▲                                 │
//!                     └─────────────────────────────────┘
//! ```
//!
//! The first two sessions to join become players (South, then North); anyone
//! joining later is a spectator.  Every state change that other members must
//! hear about is broadcast here, through the [`Dispatcher`], to exactly the
//! lobby's current membership.

use std::fmt;
use std::time::{Duration, Instant};

use kalah_core::protocol::{ErrorCode, Frame};
use kalah_core::{Game, GameResult, MoveError, MoveOutcome, Seat, DEFAULT_STONES_PER_PIT};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::dispatcher::{Dispatcher, Transport};
use crate::application::session_registry::{Role, Session, SessionError, SessionId, SessionRegistry};

/// One-based lobby number as shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LobbyId(pub u8);

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a lobby is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyState {
    Idle,
    Filling,
    Started,
    Finished,
    Aborted,
}

impl LobbyState {
    /// Finished or Aborted: waiting to be recycled.
    pub fn is_closed(self) -> bool {
        matches!(self, LobbyState::Finished | LobbyState::Aborted)
    }
}

impl fmt::Display for LobbyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LobbyState::Idle => "idle",
            LobbyState::Filling => "waiting for opponent",
            LobbyState::Started => "in game",
            LobbyState::Finished => "finished",
            LobbyState::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Errors returned by lobby operations.  A failed operation changes nothing
/// and broadcasts nothing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LobbyError {
    #[error("lobby {requested} does not exist; choose a lobby between 1 and {max}")]
    InvalidLobby { requested: u8, max: u8 },

    #[error("already in lobby {0}")]
    AlreadyInLobby(LobbyId),

    #[error("lobby {0} is closed until its game is cleared")]
    LobbyClosed(LobbyId),

    #[error("not in a lobby")]
    NotInLobby,

    #[error("the game in lobby {0} is not running")]
    GameNotStarted(LobbyId),

    #[error("spectators cannot move")]
    NotAPlayer,

    #[error("it is not your turn")]
    NotYourTurn,

    #[error("invalid move: {0}")]
    InvalidMove(#[from] MoveError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl LobbyError {
    /// Error frame code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            LobbyError::InvalidLobby { .. } => ErrorCode::InvalidLobby,
            LobbyError::AlreadyInLobby(_) => ErrorCode::AlreadyInLobby,
            LobbyError::LobbyClosed(_) => ErrorCode::LobbyClosed,
            LobbyError::NotInLobby => ErrorCode::NotInLobby,
            LobbyError::GameNotStarted(_)
            | LobbyError::NotAPlayer
            | LobbyError::NotYourTurn
            | LobbyError::InvalidMove(_) => ErrorCode::InvalidMove,
            LobbyError::Session(SessionError::InvalidUsername { .. }) => ErrorCode::InvalidUsername,
            LobbyError::Session(_) => ErrorCode::NotInLobby,
        }
    }
}

/// Sizing of the lobby pool and of each new game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobbySettings {
    pub lobby_count: u8,
    pub stones_per_pit: u8,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            lobby_count: 4,
            stones_per_pit: DEFAULT_STONES_PER_PIT,
        }
    }
}

/// One game instance with its own board and membership.
#[derive(Debug, Clone)]
pub struct Lobby {
    id: LobbyId,
    state: LobbyState,
    /// Join order.
    members: Vec<SessionId>,
    south: Option<SessionId>,
    north: Option<SessionId>,
    game: Option<Game>,
    turn_started: Option<Instant>,
}

impl Lobby {
    fn new(id: LobbyId) -> Self {
        Self {
            id,
            state: LobbyState::Idle,
            members: Vec::new(),
            south: None,
            north: None,
            game: None,
            turn_started: None,
        }
    }

    pub fn id(&self) -> LobbyId {
        self.id
    }

    pub fn state(&self) -> LobbyState {
        self.state
    }

    pub fn members(&self) -> &[SessionId] {
        &self.members
    }

    pub fn game(&self) -> Option<&Game> {
        self.game.as_ref()
    }

    /// The session seated at `seat`, if any.
    pub fn player(&self, seat: Seat) -> Option<SessionId> {
        match seat {
            Seat::South => self.south,
            Seat::North => self.north,
        }
    }

    pub fn player_count(&self) -> usize {
        usize::from(self.south.is_some()) + usize::from(self.north.is_some())
    }

    pub fn spectator_count(&self) -> usize {
        self.members.len() - self.player_count()
    }

    fn seat_slot(&mut self, seat: Seat) -> &mut Option<SessionId> {
        match seat {
            Seat::South => &mut self.south,
            Seat::North => &mut self.north,
        }
    }

    fn reset(&mut self) {
        *self = Lobby::new(self.id);
    }
}

/// Result of a successful [`LobbyManager::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub lobby: LobbyId,
    pub role: Role,
    /// `true` if this join started the game.
    pub started: bool,
}

/// Result of a successful [`LobbyManager::leave`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub lobby: LobbyId,
    /// Lobby state after the departure (and any automatic recycle).
    pub state: LobbyState,
}

/// Result of a successful [`LobbyManager::play_move`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveReport {
    pub lobby: LobbyId,
    pub outcome: MoveOutcome,
    /// The seat holding the turn after the move.
    pub next_to_move: Seat,
}

impl MoveReport {
    /// Set when the move ended the game.
    pub fn result(&self) -> Option<GameResult> {
        self.outcome.result
    }
}

/// Owns every lobby in the pool.
#[derive(Debug)]
pub struct LobbyManager {
    settings: LobbySettings,
    lobbies: Vec<Lobby>,
}

impl LobbyManager {
    /// Creates `settings.lobby_count` idle lobbies numbered from 1.
    pub fn new(settings: LobbySettings) -> Self {
        let lobbies = (1..=settings.lobby_count)
            .map(|n| Lobby::new(LobbyId(n)))
            .collect();
        Self { settings, lobbies }
    }

    pub fn get(&self, id: LobbyId) -> Option<&Lobby> {
        self.index_of(id).map(|i| &self.lobbies[i])
    }

    pub fn lobbies(&self) -> &[Lobby] {
        &self.lobbies
    }

    fn index_of(&self, id: LobbyId) -> Option<usize> {
        (1..=self.settings.lobby_count)
            .contains(&id.0)
            .then(|| usize::from(id.0) - 1)
    }

    /// Adds `session` to lobby number `lobby_number`.
    ///
    /// The second player's join starts the game and sends every member a
    /// StartGame frame with its own turn and spectator flags.  A spectator
    /// joining a running game gets a StartGame snapshot addressed to it
    /// alone.
    ///
    /// # Errors
    ///
    /// - [`LobbyError::InvalidLobby`] if the number is outside the pool.
    /// - [`LobbyError::AlreadyInLobby`] if the session is already a member
    ///   somewhere.
    /// - [`LobbyError::LobbyClosed`] if the lobby is Finished or Aborted.
    pub fn join<T: Transport>(
        &mut self,
        registry: &mut SessionRegistry,
        dispatcher: &Dispatcher<T>,
        session: SessionId,
        lobby_number: u8,
    ) -> Result<JoinOutcome, LobbyError> {
        let index = self
            .index_of(LobbyId(lobby_number))
            .ok_or(LobbyError::InvalidLobby {
                requested: lobby_number,
                max: self.settings.lobby_count,
            })?;
        let member = registry
            .get(session)
            .ok_or(SessionError::UnknownSession(session))?;
        if let Some(current) = member.lobby {
            return Err(LobbyError::AlreadyInLobby(current));
        }

        let stones = self.settings.stones_per_pit;
        let lobby = &mut self.lobbies[index];
        if lobby.state.is_closed() {
            return Err(LobbyError::LobbyClosed(lobby.id));
        }

        let role = if lobby.south.is_none() {
            lobby.south = Some(session);
            lobby.state = LobbyState::Filling;
            Role::Player {
                seat: Seat::South,
                turn: false,
            }
        } else if lobby.north.is_none() {
            lobby.north = Some(session);
            Role::Player {
                seat: Seat::North,
                turn: false,
            }
        } else {
            Role::Spectator
        };

        lobby.members.push(session);
        if let Some(joined) = registry.get_mut(session) {
            joined.lobby = Some(lobby.id);
            joined.role = Some(role);
        }
        info!(lobby = %lobby.id, %session, ?role, "joined lobby");

        let started = lobby.state == LobbyState::Filling && lobby.player_count() == 2;
        if started {
            let game = Game::new(stones);
            let board = *game.board();
            lobby.game = Some(game);
            lobby.state = LobbyState::Started;
            lobby.turn_started = Some(Instant::now());
            set_turns(registry, lobby, Some(Seat::South));

            let sent = dispatcher.broadcast(registry, &lobby.members, None, |s| {
                vec![Frame::StartGame {
                    board,
                    turn: s.turn(),
                    spectator: s.is_spectator(),
                }]
            });
            info!(lobby = %lobby.id, recipients = sent, "game started");
        } else if role.is_spectator() && lobby.state == LobbyState::Started {
            if let (Some(game), Some(watcher)) = (&lobby.game, registry.get(session)) {
                dispatcher.send_to(
                    watcher,
                    &[Frame::StartGame {
                        board: *game.board(),
                        turn: false,
                        spectator: true,
                    }],
                );
            }
        }

        Ok(JoinOutcome {
            lobby: lobby.id,
            role: registry
                .get(session)
                .and_then(|s| s.role)
                .unwrap_or(role),
            started,
        })
    }

    /// Removes `session` from its lobby.
    ///
    /// A player leaving a running game aborts it and every remaining member
    /// gets an Error frame with [`ErrorCode::LobbyAborted`] mentioning
    /// `reason`.  A closed lobby whose last member leaves is recycled.
    ///
    /// # Errors
    ///
    /// [`LobbyError::NotInLobby`] if the session has no lobby.
    pub fn leave<T: Transport>(
        &mut self,
        registry: &mut SessionRegistry,
        dispatcher: &Dispatcher<T>,
        session: SessionId,
        reason: &str,
    ) -> Result<LeaveOutcome, LobbyError> {
        let member = registry
            .get_mut(session)
            .ok_or(SessionError::UnknownSession(session))?;
        let lobby_id = member.lobby.take().ok_or(LobbyError::NotInLobby)?;
        let role = member.role.take();
        let name = member.display_name();

        let index = self.index_of(lobby_id).ok_or(LobbyError::NotInLobby)?;
        let lobby = &mut self.lobbies[index];
        lobby.members.retain(|&id| id != session);

        if let Some(seat) = role.and_then(Role::seat) {
            *lobby.seat_slot(seat) = None;
            match lobby.state {
                LobbyState::Started => {
                    lobby.state = LobbyState::Aborted;
                    lobby.turn_started = None;
                    set_turns(registry, lobby, None);
                    let notice = format!("{name} left the game ({reason}); lobby {lobby_id} aborted");
                    dispatcher.broadcast(registry, &lobby.members, None, |_| {
                        vec![Frame::error(ErrorCode::LobbyAborted, notice.clone())]
                    });
                    warn!(lobby = %lobby_id, %session, reason, "game aborted");
                }
                LobbyState::Filling => {
                    lobby.state = LobbyState::Idle;
                    debug!(lobby = %lobby_id, "lobby back to idle");
                }
                _ => {}
            }
        }
        info!(lobby = %lobby_id, %session, reason, "left lobby");

        if lobby.state.is_closed() && lobby.members.is_empty() {
            lobby.reset();
            debug!(lobby = %lobby_id, "empty closed lobby recycled");
        }

        Ok(LeaveOutcome {
            lobby: lobby_id,
            state: lobby.state,
        })
    }

    /// Plays `pit` for `session` and broadcasts the new board.
    ///
    /// Every member receives UpdateGame with its own turn flag.  When the
    /// move ends the game the lobby becomes Finished and GameOver follows in
    /// the same datagram.
    ///
    /// # Errors
    ///
    /// [`LobbyError::NotInLobby`], [`LobbyError::GameNotStarted`],
    /// [`LobbyError::NotAPlayer`], [`LobbyError::NotYourTurn`] or
    /// [`LobbyError::InvalidMove`].  The board and turn are unchanged on
    /// error.
    pub fn play_move<T: Transport>(
        &mut self,
        registry: &mut SessionRegistry,
        dispatcher: &Dispatcher<T>,
        session: SessionId,
        pit: u8,
    ) -> Result<MoveReport, LobbyError> {
        let mover = registry
            .get(session)
            .ok_or(SessionError::UnknownSession(session))?;
        let lobby_id = mover.lobby.ok_or(LobbyError::NotInLobby)?;
        let role = mover.role;

        let index = self.index_of(lobby_id).ok_or(LobbyError::NotInLobby)?;
        let lobby = &mut self.lobbies[index];
        if lobby.state != LobbyState::Started {
            return Err(LobbyError::GameNotStarted(lobby_id));
        }
        let seat = match role {
            Some(Role::Player { seat, turn: true }) => seat,
            Some(Role::Player { turn: false, .. }) => return Err(LobbyError::NotYourTurn),
            _ => return Err(LobbyError::NotAPlayer),
        };
        let game = lobby
            .game
            .as_mut()
            .ok_or(LobbyError::GameNotStarted(lobby_id))?;

        let outcome = game.play(seat, pit)?;
        let next_to_move = game.to_move();
        let board = outcome.board;
        let result = outcome.result;
        debug!(
            lobby = %lobby_id,
            ?seat,
            pit,
            last_cell = outcome.last_cell,
            captured = outcome.captured,
            extra_turn = outcome.extra_turn,
            "move applied"
        );

        match result {
            None => {
                lobby.turn_started = Some(Instant::now());
                set_turns(registry, lobby, Some(next_to_move));
                dispatcher.broadcast(registry, &lobby.members, None, |s| {
                    vec![Frame::UpdateGame {
                        board,
                        turn: s.turn(),
                    }]
                });
            }
            Some(result) => {
                lobby.state = LobbyState::Finished;
                lobby.turn_started = None;
                set_turns(registry, lobby, None);
                dispatcher.broadcast(registry, &lobby.members, None, |_| {
                    vec![
                        Frame::UpdateGame { board, turn: false },
                        Frame::GameOver { board, result },
                    ]
                });
                info!(lobby = %lobby_id, ?result, "game finished");
            }
        }

        Ok(MoveReport {
            lobby: lobby_id,
            outcome,
            next_to_move,
        })
    }

    /// Returns a closed lobby to Idle and releases its members, whose ids
    /// are returned.  Lobbies in any other state are left alone.
    pub fn recycle(&mut self, registry: &mut SessionRegistry, lobby: LobbyId) -> Vec<SessionId> {
        let Some(index) = self.index_of(lobby) else {
            return Vec::new();
        };
        let target = &mut self.lobbies[index];
        if !target.state.is_closed() {
            debug!(%lobby, state = %target.state, "recycle ignored");
            return Vec::new();
        }

        let released = std::mem::take(&mut target.members);
        for &id in &released {
            if let Some(session) = registry.get_mut(id) {
                session.lobby = None;
                session.role = None;
            }
        }
        target.reset();
        info!(%lobby, released = released.len(), "lobby recycled");
        released
    }

    /// Aborts every running game whose current turn began more than
    /// `timeout` before `now`.  Returns the aborted lobbies.
    pub fn expire_turns<T: Transport>(
        &mut self,
        registry: &mut SessionRegistry,
        dispatcher: &Dispatcher<T>,
        now: Instant,
        timeout: Duration,
    ) -> Vec<LobbyId> {
        let mut expired = Vec::new();
        for lobby in &mut self.lobbies {
            let overdue = lobby.state == LobbyState::Started
                && lobby
                    .turn_started
                    .is_some_and(|start| now.saturating_duration_since(start) > timeout);
            if !overdue {
                continue;
            }

            let holder = lobby
                .game
                .as_ref()
                .and_then(|g| lobby.player(g.to_move()))
                .and_then(|id| registry.get(id))
                .map(Session::display_name)
                .unwrap_or_default();
            lobby.state = LobbyState::Aborted;
            lobby.turn_started = None;
            set_turns(registry, lobby, None);
            let notice = format!("turn timed out: {holder} did not move in time");
            dispatcher.broadcast(registry, &lobby.members, None, |_| {
                vec![Frame::error(ErrorCode::LobbyAborted, notice.clone())]
            });
            warn!(lobby = %lobby.id, "turn timed out");
            expired.push(lobby.id);
        }
        expired
    }

    /// Sends per-recipient frames to the members of `lobby`.
    pub fn broadcast<T, F>(
        &self,
        registry: &SessionRegistry,
        dispatcher: &Dispatcher<T>,
        lobby: LobbyId,
        exclude: Option<SessionId>,
        factory: F,
    ) -> usize
    where
        T: Transport,
        F: FnMut(&Session) -> Vec<Frame>,
    {
        match self.get(lobby) {
            Some(target) => dispatcher.broadcast(registry, &target.members, exclude, factory),
            None => 0,
        }
    }

    /// One line per lobby, e.g. `1: idle (0/2, 0 watching)`.
    pub fn summary(&self) -> String {
        self.lobbies
            .iter()
            .map(|l| {
                format!(
                    "{}: {} ({}/2, {} watching)",
                    l.id,
                    l.state,
                    l.player_count(),
                    l.spectator_count()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Gives the turn to `holder` and clears it everywhere else.
fn set_turns(registry: &mut SessionRegistry, lobby: &Lobby, holder: Option<Seat>) {
    for seat in [Seat::South, Seat::North] {
        let Some(id) = lobby.player(seat) else {
            continue;
        };
        if let Some(session) = registry.get_mut(id) {
            session.role = Some(Role::Player {
                seat,
                turn: holder == Some(seat),
            });
        }
    }
}
