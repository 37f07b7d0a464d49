//! Payloads delivered to registered listeners.

use serde::Serialize;
use std::fmt;

pub use crate::protocol::player_state::PlayerEvent;

// =============================================================================
// List pages
// =============================================================================

/// One decoded page of a list query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPage<T> {
    /// Total number of matches on the server
    pub count: usize,
    /// Configured page size
    pub page_max: usize,
    /// Offset of `items[0]` within the full result
    pub start: usize,
    /// Server is rescanning its library; the total may still change
    pub rescan: bool,
    pub items: Vec<T>,
}

impl<T> ListPage<T> {
    /// True when this page reaches the end of the (clamped) result.
    pub fn is_last(&self, max_list_size: usize) -> bool {
        self.start + self.items.len() >= self.count.min(max_list_size)
    }
}

// =============================================================================
// Connection
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ConnectionEvent {
    Connecting { server: String },
    Connected { server: String },
    /// TCP connect or handshake failed
    ConnectFailed { server: String, error: String },
    /// Server closed the socket right after `login`
    LoginFailed { server: String },
    /// Session ended; `requested` is false for transport failures
    Disconnected { requested: bool },
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting { server } => write!(f, "connecting to {}", server),
            Self::Connected { server } => write!(f, "connected to {}", server),
            Self::ConnectFailed { server, error } => {
                write!(f, "connection to {} failed: {}", server, error)
            }
            Self::LoginFailed { server } => write!(f, "login to {} rejected", server),
            Self::Disconnected { requested: true } => f.write_str("disconnected"),
            Self::Disconnected { requested: false } => f.write_str("connection lost"),
        }
    }
}

// =============================================================================
// Playlist maintenance
// =============================================================================

/// Server-side rejection of a playlist change. Callers that renamed a
/// playlist optimistically must roll the name back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum PlaylistMaintenanceEvent {
    CreateFailed { name: String, message: String },
    RenameFailed {
        playlist_id: String,
        name: String,
        message: String,
    },
}

impl PlaylistMaintenanceEvent {
    pub fn message(&self) -> &str {
        match self {
            Self::CreateFailed { message, .. } | Self::RenameFailed { message, .. } => message,
        }
    }
}
