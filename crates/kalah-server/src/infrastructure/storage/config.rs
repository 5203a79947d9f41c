//! TOML configuration for the lobby server.
//!
//! The file is read from `--config <path>` when given, otherwise from the
//! platform-appropriate location:
//! - Windows:  `%APPDATA%\KalahLobby\config.toml`
//! - Linux:    `~/.config/kalah-lobby/config.toml` (or `$XDG_CONFIG_HOME`)
//! - macOS:    `~/Library/Application Support/KalahLobby/config.toml`
//!
//! A missing file is not an error: every field has a default, so the server
//! runs out of the box.  Example:
//!
//! ```toml
//! [server]
//! log_level = "info"
//!
//! [network]
//! bind_address = "0.0.0.0"
//! port = 60000
//!
//! [game]
//! lobby_count = 4
//! stones_per_pit = 4
//! turn_timeout_secs = 120
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the file, and whole sections
//! fall back to their `Default` impl when absent.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use kalah_core::{DEFAULT_STONES_PER_PIT, MAX_STONES_PER_PIT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::lobby_manager::LobbySettings;
use crate::application::session_loop::LoopSettings;
use crate::infrastructure::network::tcp_transport::DEFAULT_MAX_DATAGRAM_BYTES;

/// Largest lobby pool accepted.
pub const MAX_LOBBY_COUNT: u8 = 16;

/// Smallest datagram limit accepted.
pub const MIN_DATAGRAM_BYTES: usize = 16;

/// Error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is outside its allowed range.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub game: GameSection,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSection {
    /// `tracing` filter used when `RUST_LOG` is unset, e.g. `"info"` or
    /// `"kalah_server=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkSection {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connections announcing a larger datagram are closed.
    #[serde(default = "default_max_datagram_bytes")]
    pub max_datagram_bytes: usize,
    /// Period of the turn-deadline check.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

/// Lobby pool and game settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameSection {
    #[serde(default = "default_lobby_count")]
    pub lobby_count: u8,
    #[serde(default = "default_stones_per_pit")]
    pub stones_per_pit: u8,
    /// Reopen a lobby as soon as its game ends or is aborted.
    #[serde(default = "default_true")]
    pub auto_recycle: bool,
    /// Abort a game when the turn holder is idle this long.  Unset means no
    /// limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_timeout_secs: Option<u64>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    60000
}
fn default_max_datagram_bytes() -> usize {
    DEFAULT_MAX_DATAGRAM_BYTES
}
fn default_tick_millis() -> u64 {
    100
}
fn default_lobby_count() -> u8 {
    4
}
fn default_stones_per_pit() -> u8 {
    DEFAULT_STONES_PER_PIT
}
fn default_true() -> bool {
    true
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_datagram_bytes: default_max_datagram_bytes(),
            tick_millis: default_tick_millis(),
        }
    }
}

impl Default for GameSection {
    fn default() -> Self {
        Self {
            lobby_count: default_lobby_count(),
            stones_per_pit: default_stones_per_pit(),
            auto_recycle: default_true(),
            turn_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_LOBBY_COUNT).contains(&self.game.lobby_count) {
            return Err(ConfigError::Invalid {
                field: "game.lobby_count",
                reason: format!("{} is outside 1..={MAX_LOBBY_COUNT}", self.game.lobby_count),
            });
        }
        if !(1..=MAX_STONES_PER_PIT).contains(&self.game.stones_per_pit) {
            return Err(ConfigError::Invalid {
                field: "game.stones_per_pit",
                reason: format!(
                    "{} is outside 1..={MAX_STONES_PER_PIT}",
                    self.game.stones_per_pit
                ),
            });
        }
        if self.game.turn_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "game.turn_timeout_secs",
                reason: "must be at least 1 when set".to_string(),
            });
        }
        if self.network.max_datagram_bytes < MIN_DATAGRAM_BYTES {
            return Err(ConfigError::Invalid {
                field: "network.max_datagram_bytes",
                reason: format!(
                    "{} is below the minimum of {MIN_DATAGRAM_BYTES}",
                    self.network.max_datagram_bytes
                ),
            });
        }
        if self.network.tick_millis == 0 {
            return Err(ConfigError::Invalid {
                field: "network.tick_millis",
                reason: "must be at least 1".to_string(),
            });
        }
        self.bind_addr()?;
        Ok(())
    }

    /// The socket address to listen on.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `network.bind_address` is not an IP
    /// address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr =
            self.network
                .bind_address
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                    field: "network.bind_address",
                    reason: format!("{:?}: {e}", self.network.bind_address),
                })?;
        Ok(SocketAddr::new(ip, self.network.port))
    }

    /// Settings for the session loop and its lobby pool.
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            lobbies: LobbySettings {
                lobby_count: self.game.lobby_count,
                stones_per_pit: self.game.stones_per_pit,
            },
            auto_recycle: self.game.auto_recycle,
            turn_timeout: self.game.turn_timeout_secs.map(Duration::from_secs),
            tick: Duration::from_millis(self.network.tick_millis),
        }
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Serialize`] if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path of the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the configuration from `path`, or from [`config_file_path`] when
/// `path` is `None`.  A missing file yields [`ServerConfig::default`].
///
/// The result is not validated; call [`ServerConfig::validate`] after
/// applying command-line overrides.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_file_path() {
            Ok(p) => p,
            Err(ConfigError::NoPlatformConfigDir) => return Ok(ServerConfig::default()),
            Err(e) => return Err(e),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

/// Resolves the platform config directory including the `KalahLobby`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("KalahLobby"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("kalah-lobby"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("KalahLobby")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
