//! Transport configuration.
//!
//! [`TransportConfig`] is the single source of truth for every socket-level
//! and discovery-level knob.  It is plain data: the storage layer fills it from
//! TOML, the CLI overrides individual fields, and the session hands a clone to
//! every connection and discovery role it creates.
//!
//! Durations are written to TOML as integer milliseconds (`*_ms` keys).

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Traffic priority hint applied to stream sockets as an IP TOS/DSCP value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrafficClass {
    BestEffort,
    /// DSCP AF41: interactive, loss-tolerant video.
    #[default]
    InteractiveVideo,
    /// DSCP EF: interactive voice.
    InteractiveVoice,
    /// DSCP CS1: bulk/background.
    Background,
}

impl TrafficClass {
    pub fn dscp(self) -> u8 {
        match self {
            TrafficClass::BestEffort => 0,
            TrafficClass::InteractiveVideo => 34,
            TrafficClass::InteractiveVoice => 46,
            TrafficClass::Background => 8,
        }
    }

    /// Value for the IPv4 TOS byte (DSCP in the upper six bits).
    pub fn tos(self) -> u32 {
        u32::from(self.dscp()) << 2
    }
}

/// All transport and discovery settings for one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Service identifier peers browse and advertise under.
    #[serde(default = "default_service_id")]
    pub service_id: String,

    /// Instance name this peer advertises.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Idle time before the first keep-alive packet.
    #[serde(default = "default_two_seconds", rename = "keepalive_idle_ms", with = "millis")]
    pub keepalive_idle: Duration,

    /// Time between keep-alive packets.
    #[serde(default = "default_two_seconds", rename = "keepalive_interval_ms", with = "millis")]
    pub keepalive_interval: Duration,

    /// Unanswered keep-alives before the connection is declared dead.
    #[serde(default = "default_keepalive_count")]
    pub keepalive_count: u32,

    /// Upper bound on the TCP connect handshake.
    #[serde(default = "default_connect_timeout", rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,

    /// Disable Nagle coalescing for small latency-sensitive writes.
    #[serde(default = "default_true")]
    pub no_delay: bool,

    #[serde(default)]
    pub traffic_class: TrafficClass,

    /// Local address for the stream listener and discovery sockets.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port the advertise role listens on; 0 picks an ephemeral port.
    #[serde(default)]
    pub listen_port: u16,

    /// UDP port discovery queries are sent to and answered on.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// Destination of browse queries.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: IpAddr,

    /// How often the browse role re-sends its query.
    #[serde(default = "default_query_interval", rename = "query_interval_ms", with = "millis")]
    pub query_interval: Duration,

    /// How long a discovered endpoint stays listed without a fresh offer.
    #[serde(default = "default_result_ttl", rename = "result_ttl_ms", with = "millis")]
    pub result_ttl: Duration,

    /// Per-subscriber buffer bound; absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_buffer: Option<usize>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_service_id() -> String {
    "_realtime-stream._tcp".to_string()
}
fn default_instance_name() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "realtime-peer".to_string())
}
fn default_two_seconds() -> Duration {
    Duration::from_secs(2)
}
fn default_keepalive_count() -> u32 {
    2
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_true() -> bool {
    true
}
fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_discovery_port() -> u16 {
    47800
}
fn default_broadcast_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::BROADCAST)
}
fn default_query_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_result_ttl() -> Duration {
    Duration::from_secs(5)
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            instance_name: default_instance_name(),
            keepalive_idle: default_two_seconds(),
            keepalive_interval: default_two_seconds(),
            keepalive_count: default_keepalive_count(),
            connect_timeout: default_connect_timeout(),
            no_delay: default_true(),
            traffic_class: TrafficClass::default(),
            bind_address: default_bind_address(),
            listen_port: 0,
            discovery_port: default_discovery_port(),
            broadcast_address: default_broadcast_address(),
            query_interval: default_query_interval(),
            result_ttl: default_result_ttl(),
            subscriber_buffer: None,
        }
    }
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
