//! Peer endpoint as resolved by discovery.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// A peer found on the local network.
///
/// Equality covers both the advertised instance name and the resolved
/// address, so the same instance re-advertising from a new address counts as
/// a different candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Instance name the peer advertised.
    pub instance: String,
    /// TCP address the peer accepts stream connections on.
    pub addr: SocketAddr,
}

impl Endpoint {
    pub fn new(instance: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            instance: instance.into(),
            addr,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.instance, self.addr)
    }
}
