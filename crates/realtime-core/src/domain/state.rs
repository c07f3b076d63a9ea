//! Connection and discovery state values.
//!
//! # Connection lifecycle
//!
//! ```text
//! Idle ──open──► Connecting ──handshake ok──► Ready
//!   │                │                          │
//!   └───────cancel / error──────────────────────┴──► Failed(reason) | Cancelled
//! ```
//!
//! `Failed` and `Cancelled` are terminal: a connection that reached either is
//! never reused, and retrying means building a new connection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of one transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Ready,
    Failed(String),
    Cancelled,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed(_) | ConnectionState::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Failed(_) | Cancelled, _) => false,
            (Idle, Connecting) => true,
            (Connecting, Ready) => true,
            (_, Failed(_) | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("idle"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Ready => f.write_str("ready"),
            ConnectionState::Failed(reason) => write!(f, "failed({reason})"),
            ConnectionState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// State of one discovery role (browsing or advertising).
///
/// Each role tracks its own state independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryState {
    Idle,
    /// Browse role is starting up.
    Searching,
    /// Advertise role is starting up.
    Advertising,
    Ready,
    Failed(String),
}

impl DiscoveryState {
    /// `true` while the role is starting or running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DiscoveryState::Searching | DiscoveryState::Advertising | DiscoveryState::Ready
        )
    }
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryState::Idle => f.write_str("idle"),
            DiscoveryState::Searching => f.write_str("searching"),
            DiscoveryState::Advertising => f.write_str("advertising"),
            DiscoveryState::Ready => f.write_str("ready"),
            DiscoveryState::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
