//! Domain entities for the Kalah lobby server.
//!
//! Nothing in here touches sockets, threads, or configuration files.  The
//! board and its rules can be exercised from a plain unit test.
//!
//! # Why keep the rules separate? (for beginners)
//!
//! The server has to enforce the game rules, but so could a bot or a local
//! two-player front end.  Keeping sowing, capture, and end-of-game detection
//! in a pure module means every caller shares the same rules and the lobby
//! code only decides *who* may move, never *what* a move does.

/// Kalah board, sowing rules, and the per-lobby [`board::Game`] wrapper.
pub mod board;
