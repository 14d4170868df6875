//! One live TCP connection: receive loop, ordered writer, lifecycle events.
//!
//! A [`Connection`] is created by whichever side obtained the socket (the hub
//! on accept, the client on connect) and behaves identically for both.
//!
//! Architecture:
//! - A reader task performs bounded-timeout reads and reassembles frames
//!   through [`FrameBuffer`](crate::framing::FrameBuffer); each decoded frame
//!   is pushed onto the inbound queue and announced with a payload-free
//!   [`ConnectionEvent::Received`] for the consumer to drain.
//! - A single writer task drains the outbound queue in FIFO order, so
//!   [`Connection::send`] never blocks and messages leave the socket in the
//!   order they were submitted.
//! - A supervisor joins both tasks, closes the socket, and fires
//!   [`ConnectionEvent::Closed`] exactly once — whether teardown was local
//!   (`disconnect`) or remote (EOF / read error).
//!
//! The lifecycle only moves forward: `Connecting → Connected → Disconnecting
//! → Closed`.  A connection that reached `Disconnecting` can never report
//! itself connected again, and the socket is closed at most once.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::framing::{self, FrameBuffer};

/// Process-local identifier for a connection; registry identity on the hub.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle states, in the only order they can be visited.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnState {
    /// Socket handed over, receive loop not yet running.
    Connecting = 0,
    /// Receive loop running; frames flowing.
    Connected = 1,
    /// Shutdown requested; loops are winding down.
    Disconnecting = 2,
    /// Socket closed, `Closed` event fired.  Terminal.
    Closed = 3,
}

impl ConnState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnState::Connecting,
            1 => ConnState::Connected,
            2 => ConnState::Disconnecting,
            _ => ConnState::Closed,
        }
    }
}

/// Atomic state cell whose transitions are strictly forward.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(ConnState::Connecting as u8))
    }

    fn get(&self) -> ConnState {
        ConnState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Advances to `next` if it is further along than the current state.
    /// Returns `true` only for the call that performed the transition.
    fn advance(&self, next: ConnState) -> bool {
        let prev = self.0.fetch_max(next as u8, Ordering::AcqRel);
        prev < next as u8
    }
}

/// Tunables for a single connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound on one blocking read; a timeout is a retry, not an error.
    /// This is also how quickly the receive loop notices `disconnect()`.
    pub read_timeout: Duration,
    /// Size of the scratch buffer handed to each `read()` call.
    pub read_buffer_size: usize,
    /// A peer that buffers more than this without ever sending the delimiter
    /// gets disconnected.
    pub max_frame_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(200),
            read_buffer_size: 4096,
            max_frame_len: 64 * 1024,
        }
    }
}

/// Notifications emitted by a connection to the channel given at construction.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A frame was appended to the inbound queue.  Carries no payload; the
    /// consumer pulls it with [`Connection::pop_received`].
    Received { id: ConnectionId },
    /// The connection finished tearing down.  Fired exactly once, for both
    /// locally and remotely initiated teardown.
    Closed { id: ConnectionId },
}

/// Exclusive owner of one live socket.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    config: ConnectionConfig,
    state: StateCell,
    // Held until start_receiving takes it for the reader/writer split.
    stream: Mutex<Option<TcpStream>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    // Held until start_receiving hands it to the writer task.
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    inbound: Mutex<VecDeque<String>>,
    // Taken by the supervisor when it emits Closed; reader tasks use a clone.
    events: Mutex<Option<mpsc::Sender<ConnectionEvent>>>,
    shutdown: CancellationToken,
    closed_tx: watch::Sender<bool>,
}

impl Connection {
    /// Wraps an established socket.  `events` is where this connection will
    /// report [`ConnectionEvent`]s for the rest of its life; there is no way
    /// to rebind it afterwards.
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        events: mpsc::Sender<ConnectionEvent>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: next_connection_id(),
            peer,
            config,
            state: StateCell::new(),
            stream: Mutex::new(Some(stream)),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            inbound: Mutex::new(VecDeque::new()),
            events: Mutex::new(Some(events)),
            shutdown: CancellationToken::new(),
            closed_tx,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state.get() == ConnState::Connected
    }

    /// Starts the receive loop, the writer task, and the supervisor.
    ///
    /// Expected to be called exactly once, right after construction; a second
    /// call finds the socket already taken and does nothing.
    pub fn start_receiving(self: &Arc<Self>) {
        let stream = match self.stream.lock().unwrap().take() {
            Some(stream) => stream,
            None => {
                warn!(id = self.id, "start_receiving called twice; ignoring");
                return;
            }
        };
        let outbound_rx = match self.outbound_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return,
        };
        let events = match self.events.lock().unwrap().clone() {
            Some(tx) => tx,
            None => return,
        };

        self.state.advance(ConnState::Connected);
        let (read_half, write_half) = stream.into_split();

        let reader = tokio::spawn({
            let conn = Arc::clone(self);
            async move { conn.read_loop(read_half, events).await }
        });
        let writer = tokio::spawn({
            let conn = Arc::clone(self);
            async move { conn.write_loop(write_half, outbound_rx).await }
        });

        tokio::spawn({
            let conn = Arc::clone(self);
            async move {
                // The reader decides when the connection is over (EOF, read
                // error, or cancellation); the writer follows.
                let _ = reader.await;
                conn.shutdown.cancel();
                let _ = writer.await;
                // Both halves are dropped at this point, which closes the
                // socket -- once, since the tasks ran once.
                conn.finalize().await;
            }
        });
    }

    /// Queues `text` for transmission.  Never blocks; messages are written by
    /// a single drainer in the order they were submitted.  Dropped silently
    /// once the connection is shutting down.
    pub fn send(&self, text: impl Into<String>) {
        if self.state.get() >= ConnState::Disconnecting {
            debug!(id = self.id, "send on closing connection dropped");
            return;
        }
        if self.outbound_tx.send(text.into()).is_err() {
            debug!(id = self.id, "send on closed connection dropped");
        }
    }

    /// Removes the oldest undelivered frame from the inbound queue.
    ///
    /// Each [`ConnectionEvent::Received`] notification corresponds to one
    /// queued frame.
    pub fn pop_received(&self) -> Option<String> {
        self.inbound.lock().unwrap().pop_front()
    }

    /// Requests teardown.  Safe to call from any task, any number of times;
    /// only the first call has an effect.  The receive loop observes the
    /// cancellation within one read timeout, closes the socket, and fires the
    /// `Closed` event.
    pub fn disconnect(&self) {
        if self.state.advance(ConnState::Disconnecting) {
            debug!(id = self.id, peer = %self.peer, "disconnect requested");
            self.shutdown.cancel();
        }
    }

    /// Resolves once the connection has fully torn down: socket closed,
    /// `Closed` event emitted.  Only meaningful after `start_receiving`.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    async fn read_loop(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        events: mpsc::Sender<ConnectionEvent>,
    ) {
        let mut frames = FrameBuffer::new();
        let mut chunk = vec![0u8; self.config.read_buffer_size];

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = time::timeout(self.config.read_timeout, read_half.read(&mut chunk)) => {
                    let n = match result {
                        // A read timeout is not an error; it bounds how long
                        // the loop waits between shutdown checks.
                        Err(_) => continue,
                        Ok(Ok(0)) => {
                            debug!(id = self.id, peer = %self.peer, "peer closed the connection");
                            break;
                        }
                        Ok(Ok(n)) => n,
                        Ok(Err(e)) => {
                            warn!(id = self.id, peer = %self.peer, "read failed: {e}");
                            break;
                        }
                    };

                    frames.extend(&chunk[..n]);
                    while let Some(frame) = frames.pop_frame() {
                        match framing::decode(frame) {
                            Ok(text) => {
                                self.inbound.lock().unwrap().push_back(text);
                                let _ = events
                                    .send(ConnectionEvent::Received { id: self.id })
                                    .await;
                            }
                            Err(e) => {
                                warn!(id = self.id, peer = %self.peer, "dropping frame: {e}");
                            }
                        }
                    }
                    if frames.pending() > self.config.max_frame_len {
                        warn!(
                            id = self.id,
                            peer = %self.peer,
                            pending = frames.pending(),
                            "peer exceeded frame size limit without a delimiter; disconnecting"
                        );
                        break;
                    }
                }
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        mut write_half: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                queued = outbound.recv() => {
                    match queued {
                        Some(text) => {
                            let bytes = framing::encode(&text);
                            if let Err(e) = write_half.write_all(&bytes).await {
                                warn!(id = self.id, peer = %self.peer, "write failed: {e}");
                                self.shutdown.cancel();
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    async fn finalize(&self) {
        self.state.advance(ConnState::Closed);
        // Taking the sender both delivers exactly one Closed event and lets
        // the owning channel close once every connection has torn down.
        let events = self.events.lock().unwrap().take();
        if let Some(events) = events {
            let _ = events.send(ConnectionEvent::Closed { id: self.id }).await;
        }
        let _ = self.closed_tx.send(true);
        debug!(id = self.id, peer = %self.peer, "connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state.get())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
