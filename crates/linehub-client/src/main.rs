//! LineHub client — entry point.
//!
//! Connects to a hub, prints every relayed line, and sends whatever is typed
//! on stdin.  `/quit` (or Ctrl-C) closes the connection and exits; exhausting
//! the connect attempt budget exits with an error.
//!
//! ```text
//! linehub-client [OPTIONS]
//!
//! Options:
//!   --host <HOST>             Hub IP address [default: 127.0.0.1]
//!   --port <PORT>             Hub TCP port [default: 10000]
//!   --connect-timeout <SECS>  Per-attempt connect timeout [default: 5]
//!   --max-attempts <N>        Connect attempts before giving up; 0 retries
//!                             until interrupted [default: 8]
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use linehub_client::{Client, ClientConfig, ClientEvent};

/// LineHub client.
///
/// Connects to a LineHub hub and exchanges delimiter-framed text lines
/// with the other connected clients.
#[derive(Debug, Parser)]
#[command(name = "linehub-client", about = "LineHub messaging client", version)]
struct Cli {
    /// IP address of the hub.
    #[arg(long, default_value = "127.0.0.1", env = "LINEHUB_HOST")]
    host: String,

    /// TCP port of the hub.
    #[arg(long, default_value_t = 10000, env = "LINEHUB_PORT")]
    port: u16,

    /// Per-attempt connect timeout in seconds.
    #[arg(long, default_value_t = 5, env = "LINEHUB_CONNECT_TIMEOUT")]
    connect_timeout: u64,

    /// Number of connect attempts before giving up.  `0` retries until
    /// interrupted.
    #[arg(long, default_value_t = 8, env = "LINEHUB_MAX_ATTEMPTS")]
    max_attempts: u32,
}

impl Cli {
    fn hub_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid hub address: '{}:{}'", self.host, self.port))
    }

    fn into_client_config(self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            max_attempts: match self.max_attempts {
                0 => None,
                n => Some(n),
            },
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let addr = cli.hub_addr()?;

    let (client, mut events) = Client::new(cli.into_client_config());
    client.connect(addr);
    info!("type a line to send it, /quit to exit");

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
                    Some(ClientEvent::Connected { peer }) => {
                        info!("connected to {peer}");
                    }
                    Some(ClientEvent::Received { .. }) => {
                        while let Some(text) = client.pop_received() {
                            info!("{text}");
                        }
                    }
                    Some(ClientEvent::Disconnected { peer }) => {
                        info!("disconnected from {peer}");
                        break;
                    }
                    Some(ClientEvent::ConnectFailed { attempts }) => {
                        anyhow::bail!("could not reach {addr} after {attempts} attempts");
                    }
                    None => break,
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim() == "/quit" => break,
                    Ok(Some(line)) => client.send(line),
                    // stdin closed (piped input ran out); keep receiving.
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("failed to read stdin: {e}");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    client.close().await;
    info!("linehub-client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
