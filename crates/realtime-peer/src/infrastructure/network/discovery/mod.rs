//! LAN service discovery over UDP broadcast.
//!
//! Two independent roles share one tiny datagram protocol ([`packet`]):
//!
//! - **browse** ([`Browser`]) periodically broadcasts a `Query` for a service
//!   identifier and collects the `Offer`s that come back into an ordered,
//!   de-duplicated result list.
//! - **advertise** ([`Advertiser`]) listens for stream connections on a TCP
//!   port and answers matching `Query` datagrams with an `Offer` naming that
//!   port.
//!
//! # Transient failures
//!
//! Some socket errors mean the underlying network stack dropped our socket
//! from under us (interface flap, Wi-Fi roam, sleep/wake).  Those are
//! classified by [`DiscoveryError::is_transient`]; a role that hits one tears
//! down its sockets and starts over immediately, keeping its registration
//! intent.  Every other error moves the role to `Failed` and it stays there
//! until it is explicitly started again.

pub mod advertise;
pub mod browse;
pub mod packet;

use std::future::Future;
use std::net::SocketAddr;

use realtime_core::{DiscoveryState, Endpoint};
use thiserror::Error;
use tracing::{error, warn};

pub use advertise::{AcceptHandler, Advertiser};
pub use browse::{Browser, ResultsHandler};
pub use packet::DiscoveryPacket;

/// Largest discovery datagram we send or accept.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error on an already bound socket.
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A datagram could not be encoded or decoded.
    #[error("malformed discovery packet: {0}")]
    Packet(String),
}

impl DiscoveryError {
    /// `true` for errors that mean the socket died underneath us and the role
    /// should restart rather than fail.
    pub fn is_transient(&self) -> bool {
        match self {
            DiscoveryError::Io { source, .. } => is_transient_io(source),
            _ => false,
        }
    }
}

pub(crate) fn is_transient_io(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe | Interrupted
    )
}

/// Drives one discovery role through its socket lifetimes.
///
/// `session` runs one lifetime and receives the number of restarts before
/// it.  After a transient error the role moves to `restart_state` and runs
/// `session` again with the same inputs.  Any other error leaves the role
/// `Failed` and ends supervision.  A session that returns `Ok` ends it too.
pub(crate) async fn supervise<F, Fut>(
    label: &str,
    set_state: impl Fn(DiscoveryState),
    restart_state: DiscoveryState,
    mut session: F,
) where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), DiscoveryError>>,
{
    let mut restarts = 0;
    loop {
        let Err(e) = session(restarts).await else {
            return;
        };
        if e.is_transient() {
            warn!("{label} lost its socket ({e}); restarting");
            set_state(restart_state.clone());
            restarts += 1;
            continue;
        }
        error!("{label} failed: {e}");
        set_state(DiscoveryState::Failed(e.to_string()));
        return;
    }
}

/// Picks the endpoint to connect to from a browse result list.
///
/// Results are kept in first-seen order, so the earliest discovered endpoint
/// wins.  Returns `None` for an empty list.
pub fn select_candidate(results: &[Endpoint]) -> Option<&Endpoint> {
    results.first()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
