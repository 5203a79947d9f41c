//! SessionLoop: the single task that owns every session, lobby and game.
//!
//! Transports push [`TransportEvent`]s into one channel; the loop takes them
//! out one at a time and handles each completely (decode, update state,
//! dispatch replies) before looking at the next.  Nothing here awaits while
//! holding state, so the registry and lobbies need no locks.
//!
//! # One datagram, many frames
//!
//! A client may pack several frames into one datagram, e.g.
//! `Timestamp + JoinUsername + LobbySelect`.  They are handled in wire order.
//! If the datagram is corrupt part way through, the frames before the damage
//! are still handled and the sender gets an Error frame with
//! [`ErrorCode::FrameCorruption`].

use std::future::Future;
use std::time::{Duration, Instant};

use kalah_core::protocol::{decode_frames, join_user_list, ErrorCode, Frame};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::application::dispatcher::{Dispatcher, PeerId, Transport, TransportEvent};
use crate::application::lobby_manager::{
    LobbyError, LobbyId, LobbyManager, LobbySettings, LobbyState,
};
use crate::application::session_registry::{Role, SessionId, SessionRegistry};

/// Runtime knobs of the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub lobbies: LobbySettings,
    /// Return Finished/Aborted lobbies to Idle right after the final
    /// broadcast.
    pub auto_recycle: bool,
    /// Abort a game when the turn holder takes longer than this.
    pub turn_timeout: Option<Duration>,
    /// How often turn deadlines are checked.
    pub tick: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            lobbies: LobbySettings::default(),
            auto_recycle: true,
            turn_timeout: None,
            tick: Duration::from_millis(100),
        }
    }
}

/// The orchestrator between the transport and the lobby state.
pub struct SessionLoop<T: Transport> {
    settings: LoopSettings,
    registry: SessionRegistry,
    lobbies: LobbyManager,
    dispatcher: Dispatcher<T>,
}

impl<T: Transport> SessionLoop<T> {
    pub fn new(transport: T, settings: LoopSettings) -> Self {
        Self {
            settings,
            registry: SessionRegistry::new(),
            lobbies: LobbyManager::new(settings.lobbies),
            dispatcher: Dispatcher::new(transport),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn lobbies(&self) -> &LobbyManager {
        &self.lobbies
    }

    pub fn transport(&self) -> &T {
        self.dispatcher.transport()
    }

    /// Handles one inbound transport event to completion.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(peer) => self.on_connected(peer),
            TransportEvent::Disconnected(peer) => self.on_disconnected(peer),
            TransportEvent::Datagram { peer, bytes } => self.handle_datagram(peer, &bytes),
        }
    }

    fn on_connected(&mut self, peer: PeerId) {
        match self.registry.on_connect(peer) {
            Ok(session) => info!(%peer, %session, "client connected"),
            Err(e) => warn!(%peer, "connect rejected: {e}"),
        }
    }

    fn on_disconnected(&mut self, peer: PeerId) {
        let session = match self.registry.lookup(peer) {
            Ok(session) => session,
            Err(e) => {
                warn!("disconnect ignored: {e}");
                return;
            }
        };

        let in_lobby = self
            .registry
            .get(session)
            .is_some_and(|s| s.lobby.is_some());
        if in_lobby {
            match self
                .lobbies
                .leave(&mut self.registry, &self.dispatcher, session, "disconnected")
            {
                Ok(outcome) => self.after_close(outcome.lobby, outcome.state),
                Err(e) => warn!(%peer, "lobby cleanup failed: {e}"),
            }
        }

        match self.registry.on_disconnect(peer) {
            Ok(gone) => info!(%peer, name = %gone.display_name(), "client disconnected"),
            Err(e) => warn!(%peer, "disconnect failed: {e}"),
        }
    }

    /// Decodes `bytes` from `peer` and handles every frame in order.
    pub fn handle_datagram(&mut self, peer: PeerId, bytes: &[u8]) {
        let session = match self.registry.lookup(peer) {
            Ok(session) => session,
            Err(e) => {
                warn!(len = bytes.len(), "datagram dropped: {e}");
                return;
            }
        };

        for item in decode_frames(bytes) {
            match item {
                Ok(frame) => self.handle_frame(session, peer, frame),
                Err(e) => {
                    warn!(%peer, "corrupt datagram: {e}");
                    self.reply_error(peer, ErrorCode::FrameCorruption, e.to_string());
                }
            }
        }
    }

    fn handle_frame(&mut self, session: SessionId, peer: PeerId, frame: Frame) {
        trace!(%peer, kind = ?frame.kind(), "frame");
        match frame {
            Frame::Timestamp(millis) => {
                if let Some(s) = self.registry.get_mut(session) {
                    s.last_timestamp = Some(millis);
                }
            }
            Frame::JoinUsername(name) => match self.registry.set_username(session, &name) {
                Ok(name) => {
                    info!(%peer, %name, "user announced");
                    let welcome = format!(
                        "Welcome, {name}! Choose a lobby:\n{}",
                        self.lobbies.summary()
                    );
                    self.reply(peer, &[Frame::ChatMessage(welcome), self.user_list()]);
                }
                Err(e) => self.reply_error(peer, ErrorCode::InvalidUsername, e.to_string()),
            },
            Frame::Username(name) => match self.registry.set_username(session, &name) {
                Ok(name) => {
                    debug!(%peer, %name, "user renamed");
                    self.reply(peer, &[Frame::Username(name)]);
                }
                Err(e) => self.reply_error(peer, ErrorCode::InvalidUsername, e.to_string()),
            },
            Frame::ChatMessage(text) => self.relay_chat(session, peer, &text),
            Frame::ConnectedUsersList(_) => self.reply(peer, &[self.user_list()]),
            Frame::LobbySelect(number) => {
                match self
                    .lobbies
                    .join(&mut self.registry, &self.dispatcher, session, number)
                {
                    Ok(outcome) if !outcome.started => {
                        if let Role::Player { seat, .. } = outcome.role {
                            let text = format!(
                                "Joined lobby {} as {seat:?}; waiting for an opponent",
                                outcome.lobby
                            );
                            self.reply(peer, &[Frame::ChatMessage(text)]);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => self.reply_lobby_error(peer, &e),
                }
            }
            Frame::Move(pit) => {
                match self
                    .lobbies
                    .play_move(&mut self.registry, &self.dispatcher, session, pit)
                {
                    Ok(report) if report.result().is_some() => {
                        self.after_close(report.lobby, LobbyState::Finished)
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(%peer, pit, "move rejected: {e}");
                        self.reply_lobby_error(peer, &e);
                    }
                }
            }
            Frame::Shutdown => {
                info!(%peer, "client requested disconnect");
                self.dispatcher.transport().disconnect(peer);
            }
            other => {
                let kind = other.kind();
                if kind.is_server_only() {
                    warn!(%peer, ?kind, "client sent a server-only frame");
                    self.reply_error(
                        peer,
                        ErrorCode::UnexpectedFrame,
                        format!("{kind:?} frames are only sent by the server"),
                    );
                } else {
                    debug!(%peer, ?kind, "frame ignored");
                }
            }
        }
    }

    fn relay_chat(&mut self, session: SessionId, peer: PeerId, text: &str) {
        let Some(sender) = self.registry.get(session) else {
            return;
        };
        let Some(lobby) = sender.lobby else {
            self.reply_error(peer, ErrorCode::NotInLobby, "join a lobby before chatting");
            return;
        };
        let line = format!("{}: {text}", sender.display_name());
        let relayed = self.lobbies.broadcast(
            &self.registry,
            &self.dispatcher,
            lobby,
            Some(session),
            |_| vec![Frame::ChatMessage(line.clone())],
        );
        trace!(%lobby, relayed, "chat relayed");
    }

    /// Aborts games whose turn holder ran out of time.
    pub fn expire(&mut self, now: Instant) {
        let Some(timeout) = self.settings.turn_timeout else {
            return;
        };
        let expired = self
            .lobbies
            .expire_turns(&mut self.registry, &self.dispatcher, now, timeout);
        for lobby in expired {
            self.after_close(lobby, LobbyState::Aborted);
        }
    }

    /// Tells every connected peer the server is going away.  Returns how
    /// many peers were reached.
    pub fn shutdown(&mut self) -> usize {
        let peers = self.registry.peers();
        self.dispatcher.announce_all(&peers, &[Frame::Shutdown])
    }

    /// Recycles a closed lobby when auto-recycle is on and sends the
    /// released members back to lobby selection.
    fn after_close(&mut self, lobby: LobbyId, state: LobbyState) {
        if !state.is_closed() || !self.settings.auto_recycle {
            return;
        }
        let released = self.lobbies.recycle(&mut self.registry, lobby);
        if released.is_empty() {
            return;
        }
        let text = format!(
            "Lobby {lobby} is closed. Choose a lobby:\n{}",
            self.lobbies.summary()
        );
        self.dispatcher.broadcast(&self.registry, &released, None, |_| {
            vec![Frame::ChatMessage(text.clone())]
        });
    }

    fn user_list(&self) -> Frame {
        Frame::ConnectedUsersList(join_user_list(&self.registry.usernames()))
    }

    fn reply(&self, peer: PeerId, frames: &[Frame]) {
        self.dispatcher.send_to_peer(peer, frames);
    }

    fn reply_error(&self, peer: PeerId, code: ErrorCode, description: impl Into<String>) {
        self.reply(peer, &[Frame::error(code, description)]);
    }

    fn reply_lobby_error(&self, peer: PeerId, error: &LobbyError) {
        let description = match error {
            LobbyError::InvalidLobby { max, .. } => format!(
                "choose a lobby between 1 and {max}\n{}",
                self.lobbies.summary()
            ),
            LobbyError::AlreadyInLobby(current) => format!(
                "already in lobby {current}; leave lobby {current} first\n{}",
                self.lobbies.summary()
            ),
            other => other.to_string(),
        };
        self.reply_error(peer, error.code(), description);
    }

    /// Runs until `shutdown` resolves or every event sender is dropped.
    ///
    /// All events already queued are handled in one pass per wake-up.  On
    /// shutdown every connected peer receives a Shutdown frame.  The loop is
    /// returned so callers can inspect the final state.
    pub async fn run<F>(mut self, mut events: mpsc::Receiver<TransportEvent>, shutdown: F) -> Self
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.settings.tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            lobbies = self.settings.lobbies.lobby_count,
            auto_recycle = self.settings.auto_recycle,
            "session loop running"
        );

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    let notified = self.shutdown();
                    info!(notified, "shutdown notice sent");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("transport closed; session loop stopping");
                        break;
                    };
                    self.handle_event(event);
                    while let Ok(event) = events.try_recv() {
                        self.handle_event(event);
                    }
                }
                _ = ticker.tick() => self.expire(Instant::now()),
            }
        }
        self
    }
}
