//! Kalah lobby server: entry point.
//!
//! Accepts TCP connections from game clients, lets them pick a username and a
//! lobby, and referees two-player Kalah games that any number of spectators
//! may watch.
//!
//! # Usage
//!
//! ```text
//! kalah-server [OPTIONS]
//!
//! Options:
//!   --config  <PATH>   TOML config file [default: platform config dir]
//!   --bind    <IP>     Listen address, overrides network.bind_address
//!   --port    <PORT>   Listen port, overrides network.port
//!   --lobbies <N>      Lobby count, overrides game.lobby_count
//!   --print-config     Print the effective configuration and exit
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present; both take precedence over
//! the config file.
//!
//! | Variable        | Overrides               |
//! |-----------------|-------------------------|
//! | `KALAH_CONFIG`  | config file path        |
//! | `KALAH_BIND`    | `network.bind_address`  |
//! | `KALAH_PORT`    | `network.port`          |
//! | `KALAH_LOBBIES` | `game.lobby_count`      |
//! | `RUST_LOG`      | `server.log_level`      |
//!
//! # Architecture overview
//!
//! ```text
//! Game clients  ([u32 length][frames...] over TCP)
//!       ↕
//! infrastructure/network  TcpServer: one reader + one writer task per peer
//!       ↕  TransportEvent (mpsc)          ↑ Transport::send
//! application/session_loop  single task owning sessions and lobbies
//!       ↕
//! kalah-core  frame codec + Kalah rules
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kalah_server::application::session_loop::SessionLoop;
use kalah_server::infrastructure::network::TcpServer;
use kalah_server::infrastructure::storage::config::{load_config, ServerConfig};

/// Capacity of the transport → session loop event queue.
const EVENT_QUEUE_CAPACITY: usize = 1024;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Kalah lobby server.
#[derive(Debug, Parser)]
#[command(
    name = "kalah-server",
    about = "Lobby server for networked two-player Kalah with spectators",
    version
)]
struct Cli {
    /// Path of the TOML config file.
    ///
    /// When absent the platform config directory is used; a missing file
    /// means built-in defaults.
    #[arg(long, env = "KALAH_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to listen on.
    #[arg(long, env = "KALAH_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "KALAH_PORT")]
    port: Option<u16>,

    /// Number of lobbies offered to clients.
    #[arg(long, env = "KALAH_LOBBIES")]
    lobbies: Option<u8>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Loads the config file and applies the command-line overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// merged configuration fails validation.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = load_config(self.config.as_deref()).with_context(|| match &self.config {
            Some(path) => format!("failed to load config from {}", path.display()),
            None => "failed to load config from the platform config dir".to_string(),
        })?;

        if let Some(bind) = self.bind {
            config.network.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(lobbies) = self.lobbies {
            config.game.lobby_count = lobbies;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and merged over the config file.
/// 2. `tracing_subscriber` is initialised; `RUST_LOG` wins over
///    `server.log_level`.
/// 3. The listener is bound and its accept loop spawned.
/// 4. The session loop runs on the main task until Ctrl+C, then every client
///    receives a Shutdown frame and the connections are closed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let print_config = cli.print_config;
    let config = cli.into_server_config()?;

    if print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    let addr = config.bind_addr()?;
    info!(
        "Kalah lobby server starting: bind={addr}, lobbies={}, stones={}",
        config.game.lobby_count, config.game.stones_per_pit
    );

    // ── Listener ──────────────────────────────────────────────────────────────
    let server = TcpServer::bind(addr, config.network.max_datagram_bytes)
        .await
        .with_context(|| format!("failed to start listener on {addr}"))?;
    let transport = server.transport();

    let running = Arc::new(AtomicBool::new(true));
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let accept_task = tokio::spawn(server.run(events_tx, Arc::clone(&running)));

    // ── Session loop ──────────────────────────────────────────────────────────
    let shutdown_flag = Arc::clone(&running);
    let shutdown = async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, initiating graceful shutdown"),
            Err(e) => {
                // Without a signal handler the server runs until killed.
                error!("failed to listen for Ctrl+C signal: {e}");
                std::future::pending::<()>().await;
            }
        }
        shutdown_flag.store(false, Ordering::Relaxed);
    };

    let session_loop = SessionLoop::new(transport.clone(), config.loop_settings());
    let session_loop = session_loop.run(events_rx, shutdown).await;

    // ── Teardown ──────────────────────────────────────────────────────────────
    running.store(false, Ordering::Relaxed);
    transport.close_all();
    if let Err(e) = accept_task.await {
        error!("accept loop ended abnormally: {e}");
    }

    info!(
        sessions = session_loop.registry().len(),
        "Kalah lobby server stopped"
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn missing_config() -> PathBuf {
        PathBuf::from("/nonexistent/kalah/config.toml")
    }

    #[test]
    fn test_cli_defaults_leave_overrides_unset() {
        // Arrange / Act
        let cli = Cli::parse_from(["kalah-server"]);

        // Assert
        assert!(cli.bind.is_none());
        assert!(cli.port.is_none());
        assert!(cli.lobbies.is_none());
        assert!(!cli.print_config);
    }

    #[test]
    fn test_cli_port_override() {
        let cli = Cli::parse_from(["kalah-server", "--port", "9999"]);
        assert_eq!(cli.port, Some(9999));
    }

    #[test]
    fn test_cli_lobbies_override() {
        let cli = Cli::parse_from(["kalah-server", "--lobbies", "8"]);
        assert_eq!(cli.lobbies, Some(8));
    }

    #[test]
    fn test_cli_rejects_non_numeric_port() {
        let result = Cli::try_parse_from(["kalah-server", "--port", "sixty"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_into_server_config_missing_file_gives_defaults() {
        let cli = Cli::parse_from(["kalah-server", "--config", "/nonexistent/kalah/config.toml"]);

        let config = cli.into_server_config().unwrap();

        assert_eq!(config.network.port, 60000);
        assert_eq!(config.game.lobby_count, 4);
    }

    #[test]
    fn test_into_server_config_applies_overrides() {
        // Arrange
        let cli = Cli {
            config: Some(missing_config()),
            bind: Some("127.0.0.1".to_string()),
            port: Some(7000),
            lobbies: Some(2),
            print_config: false,
        };

        // Act
        let config = cli.into_server_config().unwrap();

        // Assert
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:7000");
        assert_eq!(config.game.lobby_count, 2);
        assert_eq!(config.loop_settings().tick, Duration::from_millis(100));
    }

    #[test]
    fn test_into_server_config_invalid_bind_returns_error() {
        // Arrange: an address that is not an IP
        let cli = Cli {
            config: Some(missing_config()),
            bind: Some("not.an.ip".to_string()),
            port: None,
            lobbies: None,
            print_config: false,
        };

        // Act
        let result = cli.into_server_config();

        // Assert: must return an error, not panic
        assert!(result.is_err());
    }

    #[test]
    fn test_into_server_config_zero_lobbies_returns_error() {
        let cli = Cli {
            config: Some(missing_config()),
            bind: None,
            port: None,
            lobbies: Some(0),
            print_config: false,
        };
        assert!(cli.into_server_config().is_err());
    }
}
