//! One TCP stream connection to a peer.
//!
//! Architecture:
//! - A [`Connection`] is created `Idle` and started exactly once with
//!   [`Connection::open`], either dialling an endpoint or adopting a stream the
//!   advertise role accepted.
//! - A background driver task performs the handshake, applies the socket
//!   options, then runs the receive loop: bytes go through a per-connection
//!   [`FrameParser`] and every complete frame is handed to the frame hook.
//! - All state changes go through one transition function backed by a
//!   `watch` channel, so observers see each state at most once and never see
//!   a transition out of `Failed`/`Cancelled`.
//! - Outbound frames are written under the write-half mutex, so frames from
//!   concurrent senders never interleave on the wire.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use realtime_core::{encode_frame, ConnectionState, Frame, FrameParser, MessageType, ProtocolError};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{watch, Mutex},
    time,
};
use tracing::{debug, info, warn};

use super::config::TransportConfig;
use super::socket_options::apply_stream_options;

/// Bytes requested from the socket per read.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Process-unique connection identifier, used in logs and to tell a replaced
/// connection's late events apart from the current one's.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Errors surfaced by the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection, or the connection is not `Ready` (or stopped being
    /// ready while the write was in flight).
    #[error("connection is not ready")]
    NotConnected,

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload could not be framed.
    #[error("framing error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Called once per complete inbound frame, in wire order.
pub type FrameHandler = Arc<dyn Fn(ConnectionId, Frame) + Send + Sync>;

/// Called after every applied state transition.
pub type StateHandler = Arc<dyn Fn(ConnectionId, &ConnectionState) + Send + Sync>;

/// Callbacks a connection reports to.  Invoked from the driver task (and, for
/// state changes, from whichever caller triggered the transition).
#[derive(Clone)]
pub struct ConnectionHooks {
    pub on_frame: FrameHandler,
    pub on_state: StateHandler,
}

impl ConnectionHooks {
    /// Hooks that discard everything.
    pub fn noop() -> Self {
        Self {
            on_frame: Arc::new(|_: ConnectionId, _: Frame| {}),
            on_state: Arc::new(|_: ConnectionId, _: &ConnectionState| {}),
        }
    }
}

/// Where the byte stream comes from.
pub enum StreamSource {
    /// Dial the address, bounded by the configured connect timeout.
    Dial(SocketAddr),
    /// Use a stream already accepted by the local listener.
    Accepted(TcpStream),
}

/// A single peer connection and its state machine.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    hooks: ConnectionHooks,
}

impl Connection {
    /// Creates an `Idle` connection to `peer`.  Nothing happens until
    /// [`open`](Self::open) is called.
    pub fn new(peer: SocketAddr, config: TransportConfig, hooks: ConnectionHooks) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            config,
            state,
            writer: Mutex::new(None),
            hooks,
        })
    }

    /// Moves to `Connecting` and spawns the driver task.
    ///
    /// Must be called from within a Tokio runtime.  Has no effect unless the
    /// connection is still `Idle`.
    pub fn open(self: &Arc<Self>, source: StreamSource) {
        if !self.transition(ConnectionState::Connecting) {
            warn!(
                "connection {}: open ignored in state {}",
                self.id,
                self.state()
            );
            return;
        }
        tokio::spawn(Arc::clone(self).drive(source));
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every subsequent state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Frames `payload` and writes it to the peer.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotConnected`] if the connection is not `Ready`, or
    ///   it is cancelled or fails before the write completes.
    /// - [`TransportError::Protocol`] if the payload is too large to frame.
    /// - [`TransportError::Io`] if the write fails; a dead socket also moves
    ///   the connection to `Failed`.
    pub async fn send(&self, payload: &[u8], message_type: MessageType) -> Result<(), TransportError> {
        if !self.state().is_ready() {
            return Err(TransportError::NotConnected);
        }
        let bytes = encode_frame(message_type, payload)?;

        let mut state_rx = self.state.subscribe();
        let write = async {
            let mut guard = self.writer.lock().await;
            match guard.as_mut() {
                Some(writer) => writer.write_all(&bytes).await.map_err(TransportError::Io),
                None => Err(TransportError::NotConnected),
            }
        };

        let result = tokio::select! {
            biased;
            _ = state_rx.wait_for(ConnectionState::is_terminal) => Err(TransportError::NotConnected),
            result = write => result,
        };

        if let Err(TransportError::Io(e)) = &result {
            if is_connection_lost(e) {
                self.fail(format!("send failed: {e}"));
            }
        }
        result
    }

    /// Cancels the connection.  Idempotent; terminal states are left as they
    /// are.  Delivery of inbound frames stops immediately.
    pub fn cancel(&self) {
        self.transition(ConnectionState::Cancelled);
    }

    fn fail(&self, reason: String) {
        self.transition(ConnectionState::Failed(reason));
    }

    /// Applies `next` if the state machine allows it, then notifies the state
    /// hook.  Returns whether the transition happened.
    fn transition(&self, next: ConnectionState) -> bool {
        let applied = self.state.send_if_modified(|current| {
            if current.can_transition_to(&next) {
                *current = next.clone();
                true
            } else {
                false
            }
        });
        if applied {
            match &next {
                ConnectionState::Failed(reason) => {
                    warn!("connection {} to {}: failed: {reason}", self.id, self.peer)
                }
                state => info!("connection {} to {}: {state}", self.id, self.peer),
            }
            (self.hooks.on_state)(self.id, &next);
        }
        applied
    }

    // ── Driver ────────────────────────────────────────────────────────────────

    async fn drive(self: Arc<Self>, source: StreamSource) {
        let mut state_rx = self.state.subscribe();

        let stream = match source {
            StreamSource::Dial(addr) => {
                let attempt = time::timeout(self.config.connect_timeout, TcpStream::connect(addr));
                tokio::select! {
                    biased;
                    _ = state_rx.wait_for(ConnectionState::is_terminal) => return,
                    result = attempt => match result {
                        Ok(Ok(stream)) => stream,
                        Ok(Err(e)) => {
                            self.fail(format!("connect to {addr} failed: {e}"));
                            return;
                        }
                        Err(_) => {
                            self.fail(format!(
                                "connect to {addr} timed out after {:?}",
                                self.config.connect_timeout
                            ));
                            return;
                        }
                    },
                }
            }
            StreamSource::Accepted(stream) => stream,
        };

        if let Err(e) = apply_stream_options(&stream, &self.config) {
            warn!("connection {}: could not tune socket: {e}", self.id);
        }

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);

        if self.transition(ConnectionState::Ready) {
            self.receive_loop(reader, state_rx).await;
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("connection {}: shutdown failed: {e}", self.id);
            }
        }
        debug!("connection {}: driver finished", self.id);
    }

    async fn receive_loop(&self, mut reader: OwnedReadHalf, mut state_rx: watch::Receiver<ConnectionState>) {
        let mut parser = FrameParser::new();
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let read = tokio::select! {
                biased;
                _ = state_rx.wait_for(ConnectionState::is_terminal) => return,
                read = reader.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    if parser.has_partial_frame() {
                        debug!(
                            "connection {}: stream ended mid-frame, discarding {} buffered byte(s) short",
                            self.id,
                            parser.bytes_needed()
                        );
                        parser.reset();
                    }
                    info!("connection {}: peer closed the stream", self.id);
                    self.cancel();
                    return;
                }
                Ok(n) => {
                    parser.push(&buf[..n]);
                    for frame in parser.frames() {
                        if self.state().is_terminal() {
                            return;
                        }
                        (self.hooks.on_frame)(self.id, frame);
                    }
                }
                Err(e) => {
                    self.fail(format!("receive failed: {e}"));
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// Errors after which the socket can no longer carry data.
fn is_connection_lost(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected | UnexpectedEof
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
