//! The reconnecting client: background connector, backoff, one live connection.
//!
//! A [`Client`] owns at most one [`Connection`] at a time.  [`Client::connect`]
//! launches a background connector that attempts the TCP connect with a
//! bounded per-attempt timeout, sleeping an exponentially growing backoff
//! between failures.  When the optional attempt budget runs out the connector
//! gives up and reports the terminal [`ClientEvent::ConnectFailed`] instead of
//! retrying forever.
//!
//! Once a socket is established it is wrapped in the same [`Connection`] the
//! hub uses, so framing, ordered sends, and teardown behave identically on
//! both sides of the wire.
//!
//! [`Client::close`] cancellation is best-effort: an attempt already blocked
//! inside the connect call is not interrupted mid-attempt, only checked after
//! it returns — a socket that arrives after `close()` is dropped and no
//! `Connected` event fires.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use linehub_core::{Connection, ConnectionConfig, ConnectionEvent};

/// What the client is currently doing.
///
/// Unlike a connection's lifecycle this is not forward-only: a disconnect or
/// an exhausted attempt budget returns the client to `Idle`, from where
/// [`Client::connect`] may be called again.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No connection and no connector running.
    Idle = 0,
    /// The background connector is attempting to establish a socket.
    Connecting = 1,
    /// A live connection exists; `send` delegates to it.
    Connected = 2,
}

impl ClientState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ClientState::Connecting,
            2 => ClientState::Connected,
            _ => ClientState::Idle,
        }
    }
}

/// Tunables for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on one TCP connect attempt.
    pub connect_timeout: Duration,
    /// Delay before the second attempt; doubles after every failure.
    pub initial_backoff: Duration,
    /// Ceiling the backoff delay grows towards.
    pub max_backoff: Duration,
    /// Attempt budget.  `None` retries until [`Client::close`]; `Some(n)`
    /// gives up after `n` failures with [`ClientEvent::ConnectFailed`].
    pub max_attempts: Option<u32>,
    /// Settings applied to the established connection.
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            max_attempts: Some(8),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Events emitted by the client to the channel returned by [`Client::new`].
#[derive(Debug)]
pub enum ClientEvent {
    /// A socket was established and the connection is live.
    Connected { peer: SocketAddr },
    /// The connection ended; local `close()` and remote teardown are
    /// indistinguishable here.
    Disconnected { peer: SocketAddr },
    /// A frame was appended to the connection's inbound queue; pull it with
    /// [`Client::pop_received`].
    Received { peer: SocketAddr },
    /// The connector exhausted its attempt budget and gave up.  Terminal for
    /// this `connect` call; the client is `Idle` again.
    ConnectFailed { attempts: u32 },
}

/// Doubles the backoff delay, clamped to `max`.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// State shared between the client handle and its background tasks.
struct Shared {
    state: AtomicU8,
    /// The live (or most recently closed) connection.  Kept after teardown so
    /// undrained inbound frames stay reachable; replaced on the next connect.
    conn: Mutex<Option<Arc<Connection>>>,
    /// Token for the current connector; replaced on every `connect` call.
    cancel: Mutex<CancellationToken>,
}

impl Shared {
    fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ClientState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// The reconnecting client endpoint.
pub struct Client {
    config: ClientConfig,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<ClientEvent>,
}

impl Client {
    /// Creates a new client and returns it together with the event receiver.
    pub fn new(config: ClientConfig) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let client = Self {
            config,
            shared: Arc::new(Shared {
                state: AtomicU8::new(ClientState::Idle as u8),
                conn: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
            }),
            events_tx: tx,
        };
        (client, rx)
    }

    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ClientState::Connected
    }

    /// Launches the background connector towards `addr`.
    ///
    /// Does nothing unless the client is `Idle`; the connector runs until a
    /// socket is established, the attempt budget runs out, or [`close`]
    /// cancels it.
    ///
    /// [`close`]: Client::close
    pub fn connect(&self, addr: SocketAddr) {
        if self
            .shared
            .state
            .compare_exchange(
                ClientState::Idle as u8,
                ClientState::Connecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!(%addr, "connect ignored: client is not idle");
            return;
        }

        let cancel = CancellationToken::new();
        *self.shared.cancel.lock().unwrap() = cancel.clone();

        info!(%addr, "connecting");
        tokio::spawn(connector_loop(
            addr,
            self.config.clone(),
            Arc::clone(&self.shared),
            self.events_tx.clone(),
            cancel,
        ));
    }

    /// Queues `text` on the live connection; a silent no-op when there is
    /// none.
    pub fn send(&self, text: impl Into<String>) {
        if self.shared.state() != ClientState::Connected {
            debug!("send while not connected dropped");
            return;
        }
        let conn = self.shared.conn.lock().unwrap().clone();
        if let Some(conn) = conn {
            conn.send(text);
        }
    }

    /// Removes the oldest undelivered frame from the connection's inbound
    /// queue.  One frame per [`ClientEvent::Received`] notification.
    pub fn pop_received(&self) -> Option<String> {
        let conn = self.shared.conn.lock().unwrap().clone();
        conn.and_then(|conn| conn.pop_received())
    }

    /// Cancels any in-flight connector and tears down the live connection.
    ///
    /// Returns once the connection (if any) has fully closed.  Cancellation
    /// of the connector is best-effort: an attempt already inside the connect
    /// call finishes first, then observes the cancellation and drops its
    /// socket without reporting `Connected`.
    pub async fn close(&self) {
        self.shared.cancel.lock().unwrap().cancel();
        let conn = self.shared.conn.lock().unwrap().clone();
        if let Some(conn) = conn {
            conn.disconnect();
            conn.closed().await;
        }
        self.shared.set_state(ClientState::Idle);
        debug!("client closed");
    }
}

/// Attempts to establish the socket, then pumps the connection's events.
async fn connector_loop(
    addr: SocketAddr,
    config: ClientConfig,
    shared: Arc<Shared>,
    events: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
) {
    let mut backoff = config.initial_backoff;
    let mut attempts: u32 = 0;

    loop {
        // close() owns the transition back to Idle on cancellation; writing
        // it here too could clobber the state of a newer connect call.
        if cancel.is_cancelled() {
            return;
        }

        attempts += 1;
        match time::timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                // A close() issued while this attempt was in flight wins: the
                // late socket is dropped and no Connected event fires.
                if cancel.is_cancelled() {
                    debug!(%addr, "connect succeeded after close; dropping socket");
                    return;
                }
                let peer = stream.peer_addr().unwrap_or(addr);
                info!(%peer, attempts, "connected");

                let (conn_tx, conn_rx) = mpsc::channel(64);
                let conn = Connection::new(stream, peer, conn_tx, config.connection.clone());
                *shared.conn.lock().unwrap() = Some(Arc::clone(&conn));
                shared.set_state(ClientState::Connected);
                conn.start_receiving();

                let _ = events.send(ClientEvent::Connected { peer }).await;
                pump_connection(conn_rx, &shared, &events, peer).await;
                return;
            }
            Ok(Err(e)) => {
                warn!(%addr, attempt = attempts, "connect failed: {e}");
            }
            Err(_) => {
                warn!(%addr, attempt = attempts, "connect attempt timed out");
            }
        }

        // A close() issued during the attempt beats the budget check; the
        // caller asked for silence, not a ConnectFailed report.
        if cancel.is_cancelled() {
            return;
        }

        if let Some(max) = config.max_attempts {
            if attempts >= max {
                error!(%addr, attempts, "giving up on connecting");
                shared.set_state(ClientState::Idle);
                let _ = events.send(ClientEvent::ConnectFailed { attempts }).await;
                return;
            }
        }

        debug!(%addr, delay = ?backoff, "retrying");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = time::sleep(backoff) => {}
        }
        backoff = next_backoff(backoff, config.max_backoff);
    }
}

/// Forwards connection events to the client's channel until teardown.
async fn pump_connection(
    mut conn_rx: mpsc::Receiver<ConnectionEvent>,
    shared: &Shared,
    events: &mpsc::Sender<ClientEvent>,
    peer: SocketAddr,
) {
    while let Some(event) = conn_rx.recv().await {
        match event {
            ConnectionEvent::Received { .. } => {
                let _ = events.send(ClientEvent::Received { peer }).await;
            }
            ConnectionEvent::Closed { .. } => {
                info!(%peer, "disconnected");
                // Only the Connected → Idle edge: if close() already moved
                // the state on (and possibly a new connect is under way),
                // this late notification must not touch it.
                let _ = shared.state.compare_exchange(
                    ClientState::Connected as u8,
                    ClientState::Idle as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                let _ = events.send(ClientEvent::Disconnected { peer }).await;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
