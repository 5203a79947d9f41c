//! Infrastructure layer for the lobby server.
//!
//! Contains OS-facing adapters: the TCP listener and the configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `kalah_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
