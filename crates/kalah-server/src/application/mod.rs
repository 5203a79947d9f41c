//! Application layer of the lobby server.
//!
//! # What is the "application" layer? (for beginners)
//!
//! The application layer sits between the domain (the Kalah rules in
//! `kalah_core`) and the infrastructure (sockets, files).  Code here decides
//! who may do what and who hears about it, but never opens a socket: all
//! outbound traffic goes through the [`dispatcher::Transport`] trait.
//!
//! # Sub-modules
//!
//! - **`session_registry`** – One record per connected peer; O(1) lookup by
//!   peer id.
//!
//! - **`lobby_manager`** – The fixed pool of lobbies, seat assignment, the
//!   lobby state machine and move arbitration.
//!
//! - **`dispatcher`** – The `Transport` seam and per-recipient broadcast.
//!
//! - **`session_loop`** – The single task that owns all of the above and
//!   handles inbound events one at a time.

pub mod dispatcher;
pub mod lobby_manager;
pub mod session_loop;
pub mod session_registry;
