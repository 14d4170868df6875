//! The broadcast hub: accept loop, connection registry, and relay logic.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Admitting incoming connections up to `max_connections`; beyond that
//!    the listener is simply not polled, so surplus clients wait in the OS
//!    accept backlog until a slot frees up.
//! 3. Wrapping each accepted socket in a [`Connection`] and tracking it in
//!    the registry — the one piece of state shared across tasks, guarded by
//!    a mutex (inserted by the accept loop, removed by the event pump,
//!    iterated by `send`).
//! 4. Relaying every inbound frame to every *other* registered connection,
//!    prefixed with the sender's address.  A frame is never echoed back to
//!    its origin.
//! 5. Reporting lifecycle through [`HubEvent`]s on the channel returned by
//!    [`Hub::start`].
//! 6. Shutting down on [`Hub::stop`]: no new connections, every existing
//!    connection disconnected *and fully torn down* before the call returns.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use linehub_core::{Connection, ConnectionConfig, ConnectionEvent, ConnectionId};

/// Error type for hub operations.  Everything that can go wrong after a
/// successful bind is reported through events, not `Err` values.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address and port the listener binds to.
    pub bind_addr: SocketAddr,
    /// Admission limit; connections beyond this wait in the OS backlog.
    pub max_connections: usize,
    /// Upper bound on one `accept()` wait; also how quickly the accept loop
    /// notices shutdown and freed capacity.
    pub accept_timeout: Duration,
    /// Settings applied to every accepted connection.
    pub connection: ConnectionConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:10000".parse().unwrap(),
            max_connections: 2,
            accept_timeout: Duration::from_millis(200),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Events emitted by the hub to the application layer.
#[derive(Debug)]
pub enum HubEvent {
    /// A client completed the handshake and joined the registry.
    /// `active` is the registry size after the addition.
    ClientConnected {
        id: ConnectionId,
        peer: SocketAddr,
        active: usize,
    },
    /// A client left the registry.  `active` is the size after the removal.
    ClientDisconnected {
        id: ConnectionId,
        peer: SocketAddr,
        active: usize,
    },
    /// A frame arrived from `peer` and was relayed to the other clients.
    Message {
        id: ConnectionId,
        peer: SocketAddr,
        text: String,
    },
}

type Registry = Arc<Mutex<HashMap<ConnectionId, Arc<Connection>>>>;

/// The running hub.  Dropping it does not stop the background tasks; call
/// [`Hub::stop`] for an orderly shutdown.
pub struct Hub {
    local_addr: SocketAddr,
    registry: Registry,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    pump_task: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    /// Binds the listener and starts the accept loop and event pump.
    ///
    /// Returns the hub handle together with the receiver for [`HubEvent`]s.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::BindFailed`] if the listener cannot be bound
    /// (port in use, insufficient privileges).  This is the only fatal
    /// construction error.
    pub async fn start(config: HubConfig) -> Result<(Self, mpsc::Receiver<HubEvent>), HubError> {
        let listener =
            TcpListener::bind(config.bind_addr)
                .await
                .map_err(|source| HubError::BindFailed {
                    addr: config.bind_addr,
                    source,
                })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| HubError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;

        info!("hub listening on {local_addr}");

        let (hub_tx, hub_rx) = mpsc::channel(64);
        let (conn_tx, conn_rx) = mpsc::channel(128);
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            config,
            Arc::clone(&registry),
            conn_tx,
            hub_tx.clone(),
            shutdown.clone(),
        ));
        let pump_task = tokio::spawn(event_pump(conn_rx, Arc::clone(&registry), hub_tx));

        Ok((
            Self {
                local_addr,
                registry,
                shutdown,
                accept_task: Mutex::new(Some(accept_task)),
                pump_task: Mutex::new(Some(pump_task)),
            },
            hub_rx,
        ))
    }

    /// Address the listener actually bound — useful when configured with
    /// port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently registered connections.
    pub async fn connection_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Fans `text` out to every registered connection.
    pub async fn send(&self, text: &str) {
        let connections: Vec<_> = self.registry.lock().await.values().cloned().collect();
        for conn in connections {
            conn.send(text);
        }
    }

    /// Stops the hub: no new connections are accepted, every registered
    /// connection is disconnected, and the call returns only once all of
    /// them have fully torn down and both background tasks have exited.
    pub async fn stop(&self) {
        info!("hub stopping");
        self.shutdown.cancel();

        let connections: Vec<_> = self.registry.lock().await.values().cloned().collect();
        for conn in &connections {
            conn.disconnect();
        }
        for conn in &connections {
            conn.closed().await;
        }

        if let Some(task) = self.accept_task.lock().await.take() {
            let _ = task.await;
        }
        // The pump runs dry on its own: the accept loop dropped its event
        // sender above and every connection released its clone in teardown.
        if let Some(task) = self.pump_task.lock().await.take() {
            let _ = task.await;
        }
        info!("hub stopped");
    }
}

/// Accepts connections until shutdown, respecting the admission limit.
async fn accept_loop(
    listener: TcpListener,
    config: HubConfig,
    registry: Registry,
    conn_tx: mpsc::Sender<ConnectionEvent>,
    hub_tx: mpsc::Sender<HubEvent>,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        // At capacity: park for one interval instead of accepting, leaving
        // further clients in the OS backlog until a slot frees up.
        if registry.lock().await.len() >= config.max_connections {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = time::sleep(config.accept_timeout) => continue,
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = time::timeout(config.accept_timeout, listener.accept()) => {
                match result {
                    Ok(Ok((stream, peer))) => {
                        let conn =
                            Connection::new(stream, peer, conn_tx.clone(), config.connection.clone());
                        let active = {
                            let mut registry = registry.lock().await;
                            registry.insert(conn.id(), Arc::clone(&conn));
                            registry.len()
                        };
                        info!(peer = %peer, active, "client connected");
                        if active == config.max_connections {
                            info!("connection limit reached");
                        }
                        let _ = hub_tx
                            .send(HubEvent::ClientConnected { id: conn.id(), peer, active })
                            .await;
                        conn.start_receiving();
                    }
                    Ok(Err(e)) => {
                        // Transient accept error; keep the hub alive.
                        error!("accept error: {e}");
                    }
                    Err(_) => {
                        // Timeout — no connection attempt in this interval.
                    }
                }
            }
        }
    }
    debug!("accept loop ended");
}

/// Consumes connection events: relays inbound frames and maintains the
/// registry on teardown.  Ends when every event sender is gone.
async fn event_pump(
    mut conn_rx: mpsc::Receiver<ConnectionEvent>,
    registry: Registry,
    hub_tx: mpsc::Sender<HubEvent>,
) {
    while let Some(event) = conn_rx.recv().await {
        match event {
            ConnectionEvent::Received { id } => {
                let (origin, others) = {
                    let registry = registry.lock().await;
                    let origin = registry.get(&id).cloned();
                    let others: Vec<_> = registry
                        .values()
                        .filter(|conn| conn.id() != id)
                        .cloned()
                        .collect();
                    (origin, others)
                };
                let Some(origin) = origin else { continue };

                while let Some(text) = origin.pop_received() {
                    let peer = origin.peer_addr();
                    debug!(from = %peer, "relaying frame");
                    let relayed = format!("From {peer}: {text}");
                    for conn in &others {
                        conn.send(relayed.clone());
                    }
                    let _ = hub_tx.send(HubEvent::Message { id, peer, text }).await;
                }
            }
            ConnectionEvent::Closed { id } => {
                let (removed, active) = {
                    let mut registry = registry.lock().await;
                    let removed = registry.remove(&id);
                    (removed, registry.len())
                };
                if let Some(conn) = removed {
                    let peer = conn.peer_addr();
                    info!(peer = %peer, active, "client disconnected");
                    let _ = hub_tx
                        .send(HubEvent::ClientDisconnected { id, peer, active })
                        .await;
                }
            }
        }
    }
    debug!("event pump ended");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_config_default_limit_is_two() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.max_connections, 2);
    }

    #[test]
    fn test_hub_config_default_port() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.bind_addr.port(), 10000);
    }

    #[tokio::test]
    async fn test_start_reports_bound_address() {
        let config = HubConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let (hub, _events) = Hub::start(config).await.unwrap();
        assert_ne!(hub.local_addr().port(), 0);
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let config = HubConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let (hub, _events) = Hub::start(config).await.unwrap();

        // Binding the same address again must fail with BindFailed.
        let clash = HubConfig {
            bind_addr: hub.local_addr(),
            ..Default::default()
        };
        let result = Hub::start(clash).await;
        assert!(matches!(result, Err(HubError::BindFailed { .. })));
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_send_on_empty_registry_is_a_no_op() {
        let config = HubConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let (hub, _events) = Hub::start(config).await.unwrap();
        hub.send("nobody is listening").await;
        assert_eq!(hub.connection_count().await, 0);
        hub.stop().await;
    }
}
