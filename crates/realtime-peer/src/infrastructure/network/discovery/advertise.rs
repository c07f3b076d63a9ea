//! Advertise role: accepts stream connections and answers discovery queries.
//!
//! On start the advertiser binds a TCP listener (`bind_address:listen_port`)
//! and a UDP socket on the discovery port.  Every `Query` for our service is
//! answered with an `Offer` carrying the listener's port; every accepted TCP
//! stream is handed to the accept callback, which decides whether to adopt it.
//!
//! After a transient restart the listener is re-bound to the same port it had
//! before, so offers already cached by browsers stay valid.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use realtime_core::DiscoveryState;
use tokio::{
    net::{TcpListener, TcpStream, UdpSocket},
    sync::watch,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{is_transient_io, packet::DiscoveryPacket, supervise, DiscoveryError, MAX_DATAGRAM_SIZE};
use crate::infrastructure::network::config::TransportConfig;

/// Receives each inbound stream together with the remote address.
pub type AcceptHandler = Arc<dyn Fn(TcpStream, SocketAddr) + Send + Sync>;

struct AdvertiseShared {
    state: watch::Sender<DiscoveryState>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl AdvertiseShared {
    fn set_state(&self, next: DiscoveryState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_local_addr(&self, addr: SocketAddr) {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
    }
}

/// A running advertise session.  Dropping it withdraws the advertisement
/// and closes the listener.
pub struct Advertiser {
    service_id: String,
    shared: Arc<AdvertiseShared>,
    task: JoinHandle<()>,
}

impl Advertiser {
    /// Starts advertising `service_id`.  Must be called from within a Tokio
    /// runtime.
    pub fn start(service_id: &str, config: &TransportConfig, on_connection: AcceptHandler) -> Self {
        Self::spawn(service_id, config, on_connection, advertise_session)
    }

    /// Starts advertising with `session` as the per-socket step.
    fn spawn<F, Fut>(
        service_id: &str,
        config: &TransportConfig,
        on_connection: AcceptHandler,
        session: F,
    ) -> Self
    where
        F: FnMut(AdvertiseTask) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DiscoveryError>> + Send + 'static,
    {
        let (state, _) = watch::channel(DiscoveryState::Advertising);
        let shared = Arc::new(AdvertiseShared {
            state,
            local_addr: Mutex::new(None),
        });
        info!("advertising {service_id} as {}", config.instance_name);
        let task = tokio::spawn(run(
            AdvertiseTask {
                shared: Arc::clone(&shared),
                service_id: service_id.to_string(),
                config: config.clone(),
                on_connection,
            },
            session,
        ));
        Self {
            service_id: service_id.to_string(),
            shared,
            task,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn state(&self) -> DiscoveryState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DiscoveryState> {
        self.shared.state.subscribe()
    }

    /// Address of the stream listener once it is bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr()
    }

    /// Withdraws the advertisement.  Idempotent.
    pub fn cancel(&self) {
        if !self.task.is_finished() {
            info!("stopped advertising {}", self.service_id);
        }
        self.task.abort();
        self.shared.set_state(DiscoveryState::Idle);
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Inputs of one advertise socket lifetime.  Every restart gets a clone.
#[derive(Clone)]
struct AdvertiseTask {
    shared: Arc<AdvertiseShared>,
    service_id: String,
    config: TransportConfig,
    on_connection: AcceptHandler,
}

async fn run<F, Fut>(task: AdvertiseTask, mut session: F)
where
    F: FnMut(AdvertiseTask) -> Fut,
    Fut: Future<Output = Result<(), DiscoveryError>>,
{
    let label = format!("advertisement of {}", task.service_id);
    supervise(
        &label,
        |state| task.shared.set_state(state),
        DiscoveryState::Advertising,
        |_| session(task.clone()),
    )
    .await;
}

/// One socket lifetime.  Only returns on error.
async fn advertise_session(task: AdvertiseTask) -> Result<(), DiscoveryError> {
    let AdvertiseTask {
        shared,
        service_id,
        config,
        on_connection,
    } = task;
    let service_id = service_id.as_str();

    let port = shared
        .local_addr()
        .map(|a| a.port())
        .unwrap_or(config.listen_port);
    let listen_addr = SocketAddr::new(config.bind_address, port);
    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|source| DiscoveryError::BindFailed { addr: listen_addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| DiscoveryError::Io { context: "read listener address", source })?;

    let discovery_addr = SocketAddr::new(config.bind_address, config.discovery_port);
    let udp = UdpSocket::bind(discovery_addr)
        .await
        .map_err(|source| DiscoveryError::BindFailed { addr: discovery_addr, source })?;

    let offer = DiscoveryPacket::Offer {
        service_id: service_id.to_string(),
        instance: config.instance_name.clone(),
        port: local_addr.port(),
    }
    .encode()?;

    shared.set_local_addr(local_addr);
    shared.set_state(DiscoveryState::Ready);
    info!("{service_id} advertised: streams on {local_addr}, queries on UDP {discovery_addr}");

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("inbound stream from {peer}");
                    on_connection(stream, peer);
                }
                // A connection that died during the handshake only affects itself.
                Err(e) if is_transient_io(&e) => debug!("inbound stream aborted: {e}"),
                Err(source) => return Err(DiscoveryError::Io { context: "accept stream", source }),
            },
            received = udp.recv_from(&mut buf) => {
                let (len, src) = received
                    .map_err(|source| DiscoveryError::Io { context: "receive query", source })?;
                match DiscoveryPacket::decode(&buf[..len]) {
                    Ok(DiscoveryPacket::Query { service_id: wanted }) if wanted == service_id => {
                        debug!("answering query from {src}");
                        if let Err(e) = udp.send_to(&offer, src).await {
                            warn!("failed to answer query from {src}: {e}");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!("ignoring datagram from {src}: {e}"),
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
