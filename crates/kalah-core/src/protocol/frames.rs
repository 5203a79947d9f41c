//! All application frame types carried inside a datagram.
//!
//! A datagram is a plain concatenation of frames.  Each frame starts with a
//! one-byte kind tag; the payload that follows is either a fixed size looked
//! up from [`FrameKind::layout`] or preceded by an explicit big-endian `u16`
//! length.  The tag `0x00` ends the datagram early and carries no payload.

use serde::{Deserialize, Serialize};

use crate::domain::board::{Board, GameResult, BOARD_CELLS};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Tag that terminates a datagram.  Bytes after it are ignored.
pub const TERMINAL_TAG: u8 = 0x00;

/// Size of the explicit length field of variable-length frames.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Encoded size of a board snapshot: one byte per cell.
pub const BOARD_SNAPSHOT_SIZE: usize = BOARD_CELLS;

// ── Kind tags ─────────────────────────────────────────────────────────────────

/// Kind tag of every frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameKind {
    Timestamp = 0x01,
    Username = 0x02,
    JoinUsername = 0x03,
    ChatMessage = 0x04,
    ConnectedUsersList = 0x05,
    LobbySelect = 0x06,
    StartGame = 0x07,
    UpdateGame = 0x08,
    Move = 0x09,
    Shutdown = 0x0A,
    Error = 0x0B,
    GameOver = 0x0C,
}

impl TryFrom<u8> for FrameKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(FrameKind::Timestamp),
            0x02 => Ok(FrameKind::Username),
            0x03 => Ok(FrameKind::JoinUsername),
            0x04 => Ok(FrameKind::ChatMessage),
            0x05 => Ok(FrameKind::ConnectedUsersList),
            0x06 => Ok(FrameKind::LobbySelect),
            0x07 => Ok(FrameKind::StartGame),
            0x08 => Ok(FrameKind::UpdateGame),
            0x09 => Ok(FrameKind::Move),
            0x0A => Ok(FrameKind::Shutdown),
            0x0B => Ok(FrameKind::Error),
            0x0C => Ok(FrameKind::GameOver),
            _ => Err(()),
        }
    }
}

/// How the payload size of a frame kind is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLayout {
    /// Always exactly this many bytes.
    Fixed(usize),
    /// A `u16` length field follows the tag and covers the whole payload.
    LengthPrefixed,
}

impl FrameKind {
    /// Size table for every kind.
    pub fn layout(self) -> PayloadLayout {
        match self {
            FrameKind::Timestamp => PayloadLayout::Fixed(8),
            FrameKind::LobbySelect | FrameKind::Move => PayloadLayout::Fixed(1),
            FrameKind::StartGame => PayloadLayout::Fixed(BOARD_SNAPSHOT_SIZE + 2),
            FrameKind::UpdateGame | FrameKind::GameOver => {
                PayloadLayout::Fixed(BOARD_SNAPSHOT_SIZE + 1)
            }
            FrameKind::Shutdown => PayloadLayout::Fixed(0),
            FrameKind::Username
            | FrameKind::JoinUsername
            | FrameKind::ChatMessage
            | FrameKind::ConnectedUsersList
            | FrameKind::Error => PayloadLayout::LengthPrefixed,
        }
    }

    /// Returns `true` for kinds only the server is allowed to send.
    pub fn is_server_only(self) -> bool {
        matches!(
            self,
            FrameKind::StartGame | FrameKind::UpdateGame | FrameKind::GameOver | FrameKind::Error
        )
    }
}

// ── Error frame ───────────────────────────────────────────────────────────────

/// Error codes carried by [`Frame::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    InvalidLobby = 0x01,
    AlreadyInLobby = 0x02,
    InvalidMove = 0x03,
    NotInLobby = 0x04,
    LobbyAborted = 0x05,
    InvalidUsername = 0x06,
    UnexpectedFrame = 0x07,
    LobbyClosed = 0x08,
    FrameCorruption = 0x09,
}

impl TryFrom<u8> for ErrorCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ErrorCode::InvalidLobby),
            0x02 => Ok(ErrorCode::AlreadyInLobby),
            0x03 => Ok(ErrorCode::InvalidMove),
            0x04 => Ok(ErrorCode::NotInLobby),
            0x05 => Ok(ErrorCode::LobbyAborted),
            0x06 => Ok(ErrorCode::InvalidUsername),
            0x07 => Ok(ErrorCode::UnexpectedFrame),
            0x08 => Ok(ErrorCode::LobbyClosed),
            0x09 => Ok(ErrorCode::FrameCorruption),
            _ => Err(()),
        }
    }
}

/// ERROR (0x0B): rejection or notice sent to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub code: ErrorCode,
    /// Human-readable text shown by the client.
    pub description: String,
}

// ── Top-level frame enum ──────────────────────────────────────────────────────

/// One decoded application message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Milliseconds since the Unix epoch at the sender.
    Timestamp(u64),
    /// Rename request from a client, echoed back as acknowledgement.
    Username(String),
    /// First name a client announces after connecting.
    JoinUsername(String),
    ChatMessage(String),
    /// Comma-separated display names; empty from a client means "send me the list".
    ConnectedUsersList(String),
    /// One-based lobby number.
    LobbySelect(u8),
    /// Game start (or late-join snapshot) for one recipient.
    StartGame {
        board: Board,
        turn: bool,
        spectator: bool,
    },
    /// Board after a move, with the recipient's own turn flag.
    UpdateGame { board: Board, turn: bool },
    /// Absolute board index of the pit to sow from.
    Move(u8),
    Shutdown,
    Error(ErrorFrame),
    /// Final board and result.
    GameOver { board: Board, result: GameResult },
}

impl Frame {
    /// Returns the [`FrameKind`] tag for this frame.
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Timestamp(_) => FrameKind::Timestamp,
            Frame::Username(_) => FrameKind::Username,
            Frame::JoinUsername(_) => FrameKind::JoinUsername,
            Frame::ChatMessage(_) => FrameKind::ChatMessage,
            Frame::ConnectedUsersList(_) => FrameKind::ConnectedUsersList,
            Frame::LobbySelect(_) => FrameKind::LobbySelect,
            Frame::StartGame { .. } => FrameKind::StartGame,
            Frame::UpdateGame { .. } => FrameKind::UpdateGame,
            Frame::Move(_) => FrameKind::Move,
            Frame::Shutdown => FrameKind::Shutdown,
            Frame::Error(_) => FrameKind::Error,
            Frame::GameOver { .. } => FrameKind::GameOver,
        }
    }

    /// Convenience constructor for [`Frame::Error`].
    pub fn error(code: ErrorCode, description: impl Into<String>) -> Self {
        Frame::Error(ErrorFrame {
            code,
            description: description.into(),
        })
    }
}

/// Joins display names into a [`Frame::ConnectedUsersList`] payload.
pub fn join_user_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(",")
}

/// Splits a [`Frame::ConnectedUsersList`] payload back into names.
pub fn split_user_list(list: &str) -> Vec<&str> {
    list.split(',').filter(|name| !name.is_empty()).collect()
}
