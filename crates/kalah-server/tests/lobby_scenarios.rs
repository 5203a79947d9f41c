//! End-to-end lobby scenarios driven through the session loop.
//!
//! Each test feeds raw datagrams into a [`SessionLoop`] exactly as the TCP
//! transport would, and inspects the decoded frames every peer received.

use std::sync::Mutex;

use kalah_core::protocol::{decode_datagram, encode_datagram, ErrorCode, Frame};
use kalah_core::Board;
use kalah_server::application::dispatcher::{PeerId, Transport, TransportError, TransportEvent};
use kalah_server::application::session_loop::{LoopSettings, SessionLoop};

// ── Recording transport ───────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(PeerId, Vec<Frame>)>>,
}

impl Recorder {
    /// Drains and returns every datagram sent to `peer` so far.
    fn take_for(&self, peer: PeerId) -> Vec<Vec<Frame>> {
        let mut sent = self.sent.lock().unwrap();
        let (mine, rest): (Vec<_>, Vec<_>) = sent.drain(..).partition(|(p, _)| *p == peer);
        *sent = rest;
        mine.into_iter().map(|(_, frames)| frames).collect()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for Recorder {
    fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
        let decoded = decode_datagram(&bytes);
        assert!(decoded.error.is_none(), "server sent a corrupt datagram");
        self.sent.lock().unwrap().push((peer, decoded.frames));
        Ok(())
    }

    fn disconnect(&self, _peer: PeerId) {}
}

// ── Helpers ───────────────────────────────────────────────────────────────────

const SOUTH: PeerId = PeerId(1);
const NORTH: PeerId = PeerId(2);
const WATCHER: PeerId = PeerId(3);

fn server(auto_recycle: bool) -> SessionLoop<Recorder> {
    let settings = LoopSettings {
        auto_recycle,
        ..LoopSettings::default()
    };
    SessionLoop::new(Recorder::default(), settings)
}

fn send(server: &mut SessionLoop<Recorder>, peer: PeerId, frames: &[Frame]) {
    let bytes = encode_datagram(frames).unwrap();
    server.handle_event(TransportEvent::Datagram { peer, bytes });
}

fn hello(server: &mut SessionLoop<Recorder>, peer: PeerId, name: &str, lobby: u8) {
    server.handle_event(TransportEvent::Connected(peer));
    send(
        server,
        peer,
        &[
            Frame::Timestamp(1),
            Frame::JoinUsername(name.to_string()),
            Frame::LobbySelect(lobby),
        ],
    );
}

/// Two players in lobby 1 with a game running; outbox cleared.
fn started_game(auto_recycle: bool) -> SessionLoop<Recorder> {
    let mut server = server(auto_recycle);
    hello(&mut server, SOUTH, "alice", 1);
    hello(&mut server, NORTH, "bob", 1);
    server.transport().clear();
    server
}

fn error_codes(datagrams: &[Vec<Frame>]) -> Vec<ErrorCode> {
    datagrams
        .iter()
        .flatten()
        .filter_map(|f| match f {
            Frame::Error(e) => Some(e.code),
            _ => None,
        })
        .collect()
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn test_second_player_starts_game_with_south_to_move() {
    // Arrange
    let mut server = server(true);
    hello(&mut server, SOUTH, "alice", 1);
    server.transport().clear();

    // Act
    hello(&mut server, NORTH, "bob", 1);

    // Assert
    let initial = Board::new(4);
    let south = server.transport().take_for(SOUTH);
    assert_eq!(
        south,
        vec![vec![Frame::StartGame {
            board: initial,
            turn: true,
            spectator: false
        }]]
    );
    let north = server.transport().take_for(NORTH);
    assert_eq!(
        north.last(),
        Some(&vec![Frame::StartGame {
            board: initial,
            turn: false,
            spectator: false
        }])
    );
}

#[test]
fn test_late_spectator_gets_snapshot_only() {
    // Arrange
    let mut server = started_game(true);

    // Act
    hello(&mut server, WATCHER, "carol", 1);

    // Assert: players hear nothing, the watcher gets a spectator start
    assert!(server.transport().take_for(SOUTH).is_empty());
    assert!(server.transport().take_for(NORTH).is_empty());
    let watcher = server.transport().take_for(WATCHER);
    assert_eq!(
        watcher.last(),
        Some(&vec![Frame::StartGame {
            board: Board::new(4),
            turn: false,
            spectator: true
        }])
    );
}

#[test]
fn test_move_is_broadcast_to_players_and_spectators() {
    // Arrange
    let mut server = started_game(true);
    hello(&mut server, WATCHER, "carol", 1);
    server.transport().clear();

    // Act
    send(&mut server, SOUTH, &[Frame::Move(3)]);

    // Assert
    let expected = Board::from_cells([4, 4, 4, 0, 5, 5, 1, 5, 4, 4, 4, 4, 4, 0]);
    for (peer, turn) in [(SOUTH, false), (NORTH, true), (WATCHER, false)] {
        assert_eq!(
            server.transport().take_for(peer),
            vec![vec![Frame::UpdateGame {
                board: expected,
                turn
            }]],
            "peer {peer}"
        );
    }
}

#[test]
fn test_out_of_turn_move_is_rejected_privately() {
    // Arrange
    let mut server = started_game(true);

    // Act
    send(&mut server, NORTH, &[Frame::Move(9)]);

    // Assert
    assert_eq!(
        error_codes(&server.transport().take_for(NORTH)),
        vec![ErrorCode::InvalidMove]
    );
    assert!(server.transport().take_for(SOUTH).is_empty());
    let game = server.lobbies().lobbies()[0].game().unwrap();
    assert_eq!(*game.board(), Board::new(4));
}

#[test]
fn test_disconnect_aborts_game_and_keeps_lobby_closed_without_recycle() {
    // Arrange
    let mut server = started_game(false);
    hello(&mut server, WATCHER, "carol", 1);
    server.transport().clear();

    // Act
    server.handle_event(TransportEvent::Disconnected(SOUTH));

    // Assert: both remaining members are told, a later move is refused
    for peer in [NORTH, WATCHER] {
        let datagrams = server.transport().take_for(peer);
        assert_eq!(error_codes(&datagrams), vec![ErrorCode::LobbyAborted], "peer {peer}");
    }
    send(&mut server, NORTH, &[Frame::Move(7)]);
    assert_eq!(
        error_codes(&server.transport().take_for(NORTH)),
        vec![ErrorCode::InvalidMove]
    );
}

#[test]
fn test_disconnect_with_recycle_returns_members_to_selection() {
    // Arrange
    let mut server = started_game(true);

    // Act
    server.handle_event(TransportEvent::Disconnected(SOUTH));

    // Assert: abort notice then a lobby menu
    let north = server.transport().take_for(NORTH);
    assert_eq!(error_codes(&north), vec![ErrorCode::LobbyAborted]);
    assert!(north.iter().flatten().any(
        |f| matches!(f, Frame::ChatMessage(text) if text.starts_with("Lobby 1 is closed"))
    ));

    // Act: the survivor is no longer in a lobby
    send(&mut server, NORTH, &[Frame::Move(7)]);

    // Assert
    assert_eq!(
        error_codes(&server.transport().take_for(NORTH)),
        vec![ErrorCode::NotInLobby]
    );

    // Act: and can start over
    send(&mut server, NORTH, &[Frame::LobbySelect(1)]);
    assert!(server.transport().take_for(NORTH).iter().flatten().any(
        |f| matches!(f, Frame::ChatMessage(text) if text.contains("waiting for an opponent"))
    ));
}

#[test]
fn test_chat_stays_inside_the_lobby() {
    // Arrange: a third user waits in lobby 2
    let mut server = started_game(true);
    hello(&mut server, WATCHER, "carol", 2);
    server.transport().clear();

    // Act
    send(&mut server, SOUTH, &[Frame::ChatMessage("good luck".into())]);

    // Assert
    assert_eq!(
        server.transport().take_for(NORTH),
        vec![vec![Frame::ChatMessage("alice: good luck".into())]]
    );
    assert!(server.transport().take_for(SOUTH).is_empty());
    assert!(server.transport().take_for(WATCHER).is_empty());
}

#[test]
fn test_shutdown_reaches_every_connected_peer() {
    let mut server = started_game(true);
    server.handle_event(TransportEvent::Connected(WATCHER));

    let reached = server.shutdown();

    assert_eq!(reached, 3);
    for peer in [SOUTH, NORTH, WATCHER] {
        assert_eq!(server.transport().take_for(peer), vec![vec![Frame::Shutdown]]);
    }
}
