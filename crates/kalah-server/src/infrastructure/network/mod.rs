//! Network infrastructure for the lobby server.
//!
//! # Sub-modules
//!
//! - **`tcp_transport`** – Listens for TCP connections, frames datagrams with
//!   a `u32` length prefix, and implements the application's `Transport`
//!   trait so the session loop can send without knowing about sockets.

pub mod tcp_transport;

pub use tcp_transport::{NetworkError, TcpServer, TcpTransport};
