//! Session manager: the single entry point applications talk to.
//!
//! A [`SessionManager`] owns at most one current [`Connection`], an optional
//! browse session, and an optional advertise session, and fans every inbound
//! message out to any number of consumers.
//!
//! # Rules
//!
//! - At most one connection is ever `Ready`.  A new connection (dialled or
//!   accepted) is only installed when the current one is not ready; the one
//!   it replaces is cancelled before the new one starts.
//! - `is_connected` is derived from the current connection's state on every
//!   transition and is the only thing that writes the connectivity flag.
//! - Browse results are evaluated whenever they change: if no connection is
//!   ready, the first-seen endpoint is dialled.
//! - Inbound streams accepted by the advertise role are adopted only when no
//!   connection is ready; otherwise they are closed.
//!
//! All methods that start work (`start_browsing`, `start_advertising`,
//! `open_connection`, `attempt_to_reconnect`) must be called from within a
//! Tokio runtime.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use realtime_core::{ConnectionState, DiscoveryState, Endpoint, Frame, MessageType};
use thiserror::Error;
use tokio::{net::TcpStream, sync::watch};
use tracing::{debug, info, trace};

use crate::application::fanout::{Broadcaster, Subscription};
use crate::infrastructure::network::{
    connection::{Connection, ConnectionHooks, ConnectionId, StreamSource, TransportError},
    discovery::{select_candidate, AcceptHandler, Advertiser, Browser, ResultsHandler},
    TransportConfig,
};

/// Error type for session operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The current connection is ready; it must be disconnected first.
    #[error("a connection is already ready")]
    AlreadyConnected,
}

/// One inbound message as handed to consumers.
///
/// Every consumer of the same message shares one payload buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub payload: Bytes,
    pub message_type: MessageType,
}

/// Anything that can put a typed payload on the wire.
///
/// Implemented by [`SessionManager`]; producers depend on this trait so they
/// can be tested without sockets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, payload: &[u8], message_type: MessageType) -> Result<(), TransportError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheaply cloneable handle; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: TransportConfig,
    connection: Mutex<Option<Arc<Connection>>>,
    connected: watch::Sender<bool>,
    received: Broadcaster<ReceivedMessage>,
    browser: Mutex<Option<Browser>>,
    advertiser: Mutex<Option<Advertiser>>,
}

impl SessionManager {
    pub fn new(config: TransportConfig) -> Self {
        let (connected, _) = watch::channel(false);
        let received = Broadcaster::new(config.subscriber_buffer);
        Self {
            inner: Arc::new(SessionInner {
                config,
                connection: Mutex::new(None),
                connected,
                received,
                browser: Mutex::new(None),
                advertiser: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    // ── Connectivity ──────────────────────────────────────────────────────────

    /// `true` exactly while the current connection is `Ready`.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Receiver notified on every connectivity change.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// State of the current connection, if there is one.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.inner.current().map(|c| c.state())
    }

    /// Remote address of the current connection, if there is one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.current().map(|c| c.peer())
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    /// Registers a new consumer of inbound messages.
    pub fn received_messages(&self) -> Subscription<ReceivedMessage> {
        self.inner.received.subscribe()
    }

    /// Number of live message consumers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.received.subscriber_count()
    }

    /// Sends one framed payload on the current connection.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] when there is no ready connection;
    /// otherwise whatever [`Connection::send`] reports.
    pub async fn send(&self, payload: &[u8], message_type: MessageType) -> Result<(), TransportError> {
        let connection = self.inner.current().ok_or(TransportError::NotConnected)?;
        connection.send(payload, message_type).await
    }

    // ── Connection control ────────────────────────────────────────────────────

    /// Dials `endpoint`, replacing a current connection that is not ready.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyConnected`] if the current connection is ready.
    pub fn open_connection(&self, endpoint: &Endpoint) -> Result<(), SessionError> {
        self.inner.open_connection(endpoint)
    }

    /// Cancels the current connection, if any.
    pub fn disconnect(&self) {
        if let Some(connection) = self.inner.current() {
            info!("disconnecting from {}", connection.peer());
            connection.cancel();
        }
    }

    /// Re-evaluates the latest browse results as if they had just arrived.
    pub fn attempt_to_reconnect(&self) {
        let results = lock(&self.inner.browser)
            .as_ref()
            .map(Browser::latest_results)
            .unwrap_or_default();
        debug!("reconnect requested; {} candidate(s)", results.len());
        self.inner.on_browse_results(&results);
    }

    // ── Browse role ───────────────────────────────────────────────────────────

    /// Starts browsing for `service_id`.  No-op while a browse session is
    /// searching or ready; a failed or cancelled one is replaced.
    pub fn start_browsing(&self, service_id: &str) {
        let mut slot = lock(&self.inner.browser);
        if let Some(browser) = slot.as_ref() {
            if browser.state().is_active() {
                debug!("already browsing for {}", browser.service_id());
                return;
            }
        }
        if let Some(previous) = slot.take() {
            previous.cancel();
        }

        let weak = Arc::downgrade(&self.inner);
        let on_results: ResultsHandler = Arc::new(move |results: &[Endpoint]| {
            if let Some(inner) = weak.upgrade() {
                inner.on_browse_results(results);
            }
        });
        *slot = Some(Browser::start(service_id, &self.inner.config, on_results));
    }

    pub fn stop_browsing(&self) {
        if let Some(browser) = lock(&self.inner.browser).take() {
            browser.cancel();
        }
    }

    pub fn browse_state(&self) -> DiscoveryState {
        lock(&self.inner.browser)
            .as_ref()
            .map_or(DiscoveryState::Idle, Browser::state)
    }

    /// Latest browse results in first-seen order, without our own offer.
    pub fn browse_results(&self) -> Vec<Endpoint> {
        let results = lock(&self.inner.browser)
            .as_ref()
            .map(Browser::latest_results)
            .unwrap_or_default();
        self.inner.without_own_offer(&results)
    }

    // ── Advertise role ────────────────────────────────────────────────────────

    /// Advertises `service_id` and accepts inbound streams.  No-op while an
    /// advertisement is already ready.
    pub fn start_advertising(&self, service_id: &str) {
        let mut slot = lock(&self.inner.advertiser);
        if let Some(advertiser) = slot.as_ref() {
            if advertiser.state() == DiscoveryState::Ready {
                debug!("already advertising {}", advertiser.service_id());
                return;
            }
        }
        if let Some(previous) = slot.take() {
            previous.cancel();
        }

        let weak = Arc::downgrade(&self.inner);
        let on_connection: AcceptHandler = Arc::new(move |stream: TcpStream, peer: SocketAddr| {
            if let Some(inner) = weak.upgrade() {
                inner.adopt_inbound(stream, peer);
            }
        });
        *slot = Some(Advertiser::start(service_id, &self.inner.config, on_connection));
    }

    /// Withdraws the advertisement.  Idempotent.
    pub fn stop_advertising(&self) {
        if let Some(advertiser) = lock(&self.inner.advertiser).take() {
            advertiser.cancel();
        }
    }

    pub fn advertise_state(&self) -> DiscoveryState {
        lock(&self.inner.advertiser)
            .as_ref()
            .map_or(DiscoveryState::Idle, Advertiser::state)
    }

    /// Address inbound streams are accepted on, once advertising is ready.
    pub fn advertised_addr(&self) -> Option<SocketAddr> {
        lock(&self.inner.advertiser)
            .as_ref()
            .and_then(Advertiser::local_addr)
    }
}

#[async_trait]
impl MessageSender for SessionManager {
    async fn send(&self, payload: &[u8], message_type: MessageType) -> Result<(), TransportError> {
        SessionManager::send(self, payload, message_type).await
    }
}

impl SessionInner {
    fn current(&self) -> Option<Arc<Connection>> {
        lock(&self.connection).clone()
    }

    /// Recomputes the connectivity flag from the current connection.  The
    /// slot lock is held while publishing so concurrent updates cannot land
    /// out of order.
    fn publish_connectivity(&self) {
        let slot = lock(&self.connection);
        let ready = slot.as_ref().is_some_and(|c| c.state().is_ready());
        let changed = self.connected.send_if_modified(|connected| {
            if *connected == ready {
                return false;
            }
            *connected = ready;
            true
        });
        drop(slot);
        if changed {
            info!("peer {}", if ready { "connected" } else { "disconnected" });
        }
    }

    fn dispatch(&self, id: ConnectionId, frame: Frame) {
        if self.current().map(|c| c.id()) != Some(id) {
            trace!("dropping frame from replaced connection {id}");
            return;
        }
        let (payload, message_type) = frame.into_parts();
        let delivered = self.received.publish(ReceivedMessage {
            payload,
            message_type,
        });
        trace!("{message_type:?} message delivered to {delivered} consumer(s)");
    }

    fn hooks(self: &Arc<Self>) -> ConnectionHooks {
        let on_frame = Arc::downgrade(self);
        let on_state = Arc::downgrade(self);
        ConnectionHooks {
            on_frame: Arc::new(move |id: ConnectionId, frame: Frame| {
                if let Some(inner) = on_frame.upgrade() {
                    inner.dispatch(id, frame);
                }
            }),
            on_state: Arc::new(move |_: ConnectionId, _: &ConnectionState| {
                if let Some(inner) = on_state.upgrade() {
                    inner.publish_connectivity();
                }
            }),
        }
    }

    /// Makes a fresh connection to `peer` current, cancelling the one it
    /// replaces.  The new connection is returned `Idle`.
    fn install(self: &Arc<Self>, peer: SocketAddr) -> Result<Arc<Connection>, SessionError> {
        let connection = Connection::new(peer, self.config.clone(), self.hooks());
        let previous = {
            let mut slot = lock(&self.connection);
            if slot.as_ref().is_some_and(|c| c.state().is_ready()) {
                return Err(SessionError::AlreadyConnected);
            }
            slot.replace(Arc::clone(&connection))
        };
        if let Some(previous) = previous {
            debug!("connection {} replaced by {}", previous.id(), connection.id());
            previous.cancel();
        }
        self.publish_connectivity();
        Ok(connection)
    }

    fn open_connection(self: &Arc<Self>, endpoint: &Endpoint) -> Result<(), SessionError> {
        let connection = self.install(endpoint.addr)?;
        info!("connecting to {endpoint}");
        connection.open(StreamSource::Dial(endpoint.addr));
        Ok(())
    }

    fn adopt_inbound(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        match self.install(peer) {
            Ok(connection) => {
                info!("adopting inbound stream from {peer}");
                connection.open(StreamSource::Accepted(stream));
            }
            Err(e) => debug!("closing inbound stream from {peer}: {e}"),
        }
    }

    /// Drops the offer our own advertiser answered with, so a peer that both
    /// browses and advertises never dials itself.
    fn without_own_offer(&self, results: &[Endpoint]) -> Vec<Endpoint> {
        let own_port = lock(&self.advertiser)
            .as_ref()
            .and_then(Advertiser::local_addr)
            .map(|addr| addr.port());
        results
            .iter()
            .filter(|endpoint| {
                let own = endpoint.instance == self.config.instance_name
                    && Some(endpoint.addr.port()) == own_port;
                if own {
                    trace!("skipping our own offer {endpoint}");
                }
                !own
            })
            .cloned()
            .collect()
    }

    fn on_browse_results(self: &Arc<Self>, results: &[Endpoint]) {
        let results = self.without_own_offer(results);
        let Some(candidate) = select_candidate(&results) else {
            return;
        };
        if let Some(current) = self.current() {
            match current.state() {
                ConnectionState::Ready => {
                    debug!("ignoring {candidate}: connection already ready");
                    return;
                }
                ConnectionState::Connecting if current.peer() == candidate.addr => {
                    debug!("already connecting to {candidate}");
                    return;
                }
                _ => {}
            }
        }
        if let Err(e) = self.open_connection(candidate) {
            debug!("not connecting to {candidate}: {e}");
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let connection = self
            .connection
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connection) = connection {
            connection.cancel();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
