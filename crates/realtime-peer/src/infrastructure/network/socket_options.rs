//! Low-latency socket tuning applied to every stream connection.
//!
//! Tokio only exposes `TCP_NODELAY`; keep-alive timing and the IP TOS byte go
//! through [`socket2::SockRef`], which borrows the tokio socket without taking
//! ownership of the file descriptor.

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::config::TransportConfig;

/// Applies no-delay, keep-alive, and traffic-class settings to `stream`.
///
/// # Errors
///
/// Returns the I/O error if no-delay or keep-alive cannot be set.  A failure
/// to set the traffic class is only logged: it is a hint that some networks
/// and address families ignore.
pub fn apply_stream_options(stream: &TcpStream, config: &TransportConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.no_delay)?;

    let socket = SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(config.keepalive_idle);
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "windows"
    ))]
    let keepalive = keepalive.with_interval(config.keepalive_interval);
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    ))]
    let keepalive = keepalive.with_retries(config.keepalive_count);
    socket.set_tcp_keepalive(&keepalive)?;

    apply_traffic_class(&socket, stream, config);
    Ok(())
}

fn apply_traffic_class(socket: &SockRef<'_>, stream: &TcpStream, config: &TransportConfig) {
    let is_ipv4 = stream.local_addr().map(|a| a.is_ipv4()).unwrap_or(false);
    if !is_ipv4 {
        debug!("traffic class {:?} not applied: not an IPv4 socket", config.traffic_class);
        return;
    }
    #[cfg(not(any(
        target_os = "fuchsia",
        target_os = "redox",
        target_os = "solaris",
        target_os = "illumos"
    )))]
    if let Err(e) = socket.set_tos(config.traffic_class.tos()) {
        warn!("failed to set traffic class {:?}: {e}", config.traffic_class);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
