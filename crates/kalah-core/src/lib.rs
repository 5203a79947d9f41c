//! # kalah-core
//!
//! Shared library for the Kalah lobby server containing the datagram codec
//! and the game rules.
//!
//! It has no dependencies on sockets, async runtimes, or configuration, so a
//! client or a bot can link it without pulling in the server.
//!
//! # Architecture overview (for beginners)
//!
//! The server hosts a small fixed pool of lobbies.  Two players join a lobby
//! and play Kalah (a mancala variant); anyone who joins after them watches as
//! a spectator.  Every message on the wire is a *frame*, and one network
//! datagram may carry several frames back to back.
//!
//! This crate (`kalah-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – The frame kinds and how they are encoded.  Decoding is
//!   lazy and stops at the first corrupt frame, keeping whatever came before.
//!
//! - **`domain`** – The 14-cell board, the sowing rules (store skipping,
//!   capture, extra turn) and end-of-game sweep.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `kalah_core::Board` instead of `kalah_core::domain::board::Board`.
pub use domain::board::{
    apply_move, Board, Game, GameResult, MoveError, MoveOutcome, Seat, BOARD_CELLS,
    DEFAULT_STONES_PER_PIT, MAX_STONES_PER_PIT,
};
pub use protocol::codec::{decode_datagram, decode_frames, encode_datagram, FrameError};
pub use protocol::frames::{ErrorCode, Frame, FrameKind};
