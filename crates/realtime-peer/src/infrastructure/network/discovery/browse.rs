//! Browse role: finds peers advertising a service.
//!
//! The browser broadcasts a `Query` every `query_interval` and keeps every
//! matching `Offer` in first-seen order.  An entry that is not refreshed
//! within `result_ttl` drops out.  The results callback fires whenever the
//! list changes, and once each time the role becomes `Ready` so the caller
//! can re-evaluate the current list.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use realtime_core::{DiscoveryState, Endpoint};
use tokio::{
    net::UdpSocket,
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use super::{packet::DiscoveryPacket, supervise, DiscoveryError, MAX_DATAGRAM_SIZE};
use crate::infrastructure::network::config::TransportConfig;

/// Receives the full, ordered result list after every change.
pub type ResultsHandler = Arc<dyn Fn(&[Endpoint]) + Send + Sync>;

struct BrowseShared {
    state: watch::Sender<DiscoveryState>,
    results: Mutex<Vec<Endpoint>>,
}

impl BrowseShared {
    fn set_state(&self, next: DiscoveryState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn results(&self) -> Vec<Endpoint> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_results(&self, results: Vec<Endpoint>) {
        *self.results.lock().unwrap_or_else(PoisonError::into_inner) = results;
    }
}

/// A running browse session.  Dropping it stops browsing.
pub struct Browser {
    service_id: String,
    shared: Arc<BrowseShared>,
    task: JoinHandle<()>,
}

impl Browser {
    /// Starts browsing for `service_id`.  Must be called from within a Tokio
    /// runtime.
    pub fn start(service_id: &str, config: &TransportConfig, on_results: ResultsHandler) -> Self {
        Self::spawn(service_id, config, on_results, browse_session)
    }

    /// Starts browsing with `session` as the per-socket step.
    fn spawn<F, Fut>(
        service_id: &str,
        config: &TransportConfig,
        on_results: ResultsHandler,
        session: F,
    ) -> Self
    where
        F: FnMut(BrowseTask, Duration) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DiscoveryError>> + Send + 'static,
    {
        let (state, _) = watch::channel(DiscoveryState::Searching);
        let shared = Arc::new(BrowseShared {
            state,
            results: Mutex::new(Vec::new()),
        });
        info!("browsing for {service_id}");
        let task = tokio::spawn(run(
            BrowseTask {
                shared: Arc::clone(&shared),
                service_id: service_id.to_string(),
                config: config.clone(),
                on_results,
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

    /// The most recent result list, in first-seen order.
    pub fn latest_results(&self) -> Vec<Endpoint> {
        self.shared.results()
    }

    /// Stops browsing and releases the socket.  Idempotent.
    pub fn cancel(&self) {
        if !self.task.is_finished() {
            info!("stopped browsing for {}", self.service_id);
        }
        self.task.abort();
        self.shared.set_state(DiscoveryState::Idle);
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Inputs of one browse socket lifetime.  Every restart gets a clone.
#[derive(Clone)]
struct BrowseTask {
    shared: Arc<BrowseShared>,
    service_id: String,
    config: TransportConfig,
    on_results: ResultsHandler,
}

async fn run<F, Fut>(task: BrowseTask, mut session: F)
where
    F: FnMut(BrowseTask, Duration) -> Fut,
    Fut: Future<Output = Result<(), DiscoveryError>>,
{
    let label = format!("browse for {}", task.service_id);
    let query_interval = task.config.query_interval;
    supervise(
        &label,
        |state| task.shared.set_state(state),
        DiscoveryState::Searching,
        |restarts| {
            // Restarted sessions wait one query interval before querying.
            let first_query_delay = if restarts == 0 {
                Duration::ZERO
            } else {
                query_interval
            };
            session(task.clone(), first_query_delay)
        },
    )
    .await;
}

/// One socket lifetime.  Only returns on error.
async fn browse_session(task: BrowseTask, first_query_delay: Duration) -> Result<(), DiscoveryError> {
    let BrowseTask {
        shared,
        service_id,
        config,
        on_results,
    } = task;
    let service_id = service_id.as_str();

    let bind_addr = SocketAddr::new(config.bind_address, 0);
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|source| DiscoveryError::BindFailed { addr: bind_addr, source })?;
    socket
        .set_broadcast(true)
        .map_err(|source| DiscoveryError::Io { context: "enable broadcast", source })?;

    let target = SocketAddr::new(config.broadcast_address, config.discovery_port);
    let query = DiscoveryPacket::Query {
        service_id: service_id.to_string(),
    }
    .encode()?;

    let mut seen = ResultSet::new(shared.results(), Instant::now());
    shared.set_state(DiscoveryState::Ready);
    debug!("browse socket ready; querying {target} for {service_id}");
    on_results(seen.endpoints());

    let mut ticker = time::interval_at(Instant::now() + first_query_delay, config.query_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let changed = tokio::select! {
            _ = ticker.tick() => {
                socket
                    .send_to(&query, target)
                    .await
                    .map_err(|source| DiscoveryError::Io { context: "send query", source })?;
                seen.expire(Instant::now(), config.result_ttl)
            }
            received = socket.recv_from(&mut buf) => {
                let (len, src) = received
                    .map_err(|source| DiscoveryError::Io { context: "receive offer", source })?;
                match DiscoveryPacket::decode(&buf[..len]) {
                    Ok(DiscoveryPacket::Offer { service_id: offered, instance, port })
                        if offered == service_id =>
                    {
                        let endpoint = Endpoint::new(instance, SocketAddr::new(src.ip(), port));
                        seen.upsert(endpoint, Instant::now())
                    }
                    Ok(_) => false,
                    Err(e) => {
                        debug!("ignoring datagram from {src}: {e}");
                        false
                    }
                }
            }
        };

        if changed {
            shared.store_results(seen.endpoints().to_vec());
            debug!("browse results for {service_id}: {} endpoint(s)", seen.len());
            on_results(seen.endpoints());
        }
    }
}

/// Ordered, de-duplicated endpoints with a last-seen time each.
struct ResultSet {
    endpoints: Vec<Endpoint>,
    last_seen: Vec<Instant>,
}

impl ResultSet {
    fn new(initial: Vec<Endpoint>, now: Instant) -> Self {
        let last_seen = vec![now; initial.len()];
        Self {
            endpoints: initial,
            last_seen,
        }
    }

    fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Refreshes or appends `endpoint`.  Returns `true` if the list changed.
    fn upsert(&mut self, endpoint: Endpoint, now: Instant) -> bool {
        match self.endpoints.iter().position(|e| *e == endpoint) {
            Some(i) => {
                self.last_seen[i] = now;
                false
            }
            None => {
                info!("discovered {endpoint}");
                self.endpoints.push(endpoint);
                self.last_seen.push(now);
                true
            }
        }
    }

    /// Drops entries older than `ttl`.  Returns `true` if any were removed.
    fn expire(&mut self, now: Instant, ttl: Duration) -> bool {
        let before = self.endpoints.len();
        let mut i = 0;
        while i < self.endpoints.len() {
            if now.duration_since(self.last_seen[i]) > ttl {
                let gone = self.endpoints.remove(i);
                self.last_seen.remove(i);
                debug!("{gone} expired");
            } else {
                i += 1;
            }
        }
        self.endpoints.len() != before
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
