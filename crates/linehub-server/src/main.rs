//! LineHub hub — entry point.
//!
//! Binds the broadcast hub, prints its lifecycle events, and drives it from
//! an interactive stdin loop:
//!
//! - any line typed at the console is broadcast to every connected client as
//!   `From Server: <line>`;
//! - `/quit` (or Ctrl-C) stops the hub and exits once every connection has
//!   fully torn down.
//!
//! Configuration comes from the platform config file (see [`config`]); any
//! command-line argument overrides the corresponding file value.
//!
//! ```text
//! linehub-server [OPTIONS]
//!
//! Options:
//!   --bind <ADDR>             IP address to bind [config file, default 0.0.0.0]
//!   --port <PORT>             TCP port to listen on [config file, default 10000]
//!   --max-connections <N>     Admission limit [config file, default 2]
//! ```

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use linehub_server::config::{self, AppConfig};
use linehub_server::hub::{Hub, HubConfig, HubEvent};

/// LineHub broadcast hub.
///
/// Accepts TCP clients up to the admission limit and relays every line one
/// client sends to all the others.
#[derive(Debug, Parser)]
#[command(name = "linehub-server", about = "LineHub broadcast hub", version)]
struct Cli {
    /// IP address to bind the listener to.
    ///
    /// Use `0.0.0.0` to accept connections from any interface, or
    /// `127.0.0.1` for local-only.  Overrides the config file.
    #[arg(long, env = "LINEHUB_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.  Overrides the config file.
    #[arg(long, env = "LINEHUB_PORT")]
    port: Option<u16>,

    /// Maximum number of simultaneously connected clients.  Further clients
    /// wait in the OS backlog until a slot frees up.  Overrides the config
    /// file.
    #[arg(long, env = "LINEHUB_MAX_CONNECTIONS")]
    max_connections: Option<usize>,
}

impl Cli {
    /// Merges the CLI arguments over the file config into a [`HubConfig`].
    fn into_hub_config(self, file: AppConfig) -> anyhow::Result<HubConfig> {
        let bind_address = self.bind.unwrap_or(file.network.bind_address);
        let port = self.port.unwrap_or(file.network.port);
        let max_connections = self.max_connections.unwrap_or(file.network.max_connections);

        let bind_addr: SocketAddr = format!("{bind_address}:{port}")
            .parse()
            .with_context(|| format!("invalid bind address: '{bind_address}:{port}'"))?;

        Ok(HubConfig {
            bind_addr,
            max_connections,
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The file config supplies both the hub settings and the default log
    // level; a malformed file is worth failing on rather than masking.
    let file_config = config::load_config().context("failed to load config file")?;

    // Initialise structured logging.  `RUST_LOG` overrides the file value.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(file_config.server.log_level.clone())
        }))
        .init();

    let hub_config = cli.into_hub_config(file_config)?;

    let (hub, mut events) = Hub::start(hub_config)
        .await
        .context("failed to start hub")?;
    info!("type a line to broadcast it, /quit to exit");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("failed to listen for Ctrl-C: {e}");
                }
                break;
            }
            event = events.recv() => {
                match event {
                    Some(HubEvent::ClientConnected { peer, active, .. }) => {
                        info!("connected from {peer}; active connections: {active}");
                    }
                    Some(HubEvent::ClientDisconnected { peer, active, .. }) => {
                        info!("{peer} disconnected; active connections: {active}");
                    }
                    Some(HubEvent::Message { peer, text, .. }) => {
                        info!("from {peer}: {text}");
                    }
                    None => break,
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim() == "/quit" => break,
                    Ok(Some(line)) => {
                        hub.send(&format!("From Server: {line}")).await;
                    }
                    // stdin closed (piped input ran out); keep serving.
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("failed to read stdin: {e}");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    hub.stop().await;
    info!("linehub-server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
