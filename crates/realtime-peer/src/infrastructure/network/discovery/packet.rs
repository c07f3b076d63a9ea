//! Discovery datagram format.
//!
//! Datagrams are bincode-encoded [`DiscoveryPacket`]s with fixed-width
//! integers.  Decoding is size-limited so a hostile length prefix cannot make
//! us allocate more than one datagram's worth of memory.

use bincode::Options;
use serde::{Deserialize, Serialize};

use super::{DiscoveryError, MAX_DATAGRAM_SIZE};

/// One discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryPacket {
    /// Broadcast by browsers: "who offers this service?"
    Query { service_id: String },
    /// Unicast reply from an advertiser to the querying address.
    Offer {
        service_id: String,
        instance: String,
        /// TCP port the advertiser accepts stream connections on.
        port: u16,
    },
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_DATAGRAM_SIZE as u64)
}

impl DiscoveryPacket {
    pub fn encode(&self) -> Result<Vec<u8>, DiscoveryError> {
        options()
            .serialize(self)
            .map_err(|e| DiscoveryError::Packet(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DiscoveryError> {
        options()
            .deserialize(bytes)
            .map_err(|e| DiscoveryError::Packet(e.to_string()))
    }

    pub fn service_id(&self) -> &str {
        match self {
            DiscoveryPacket::Query { service_id } | DiscoveryPacket::Offer { service_id, .. } => {
                service_id
            }
        }
    }
}
