//! Server statistics snapshot

use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live state of one data connection
pub(crate) struct HandlerInfo {
    pub(crate) collection: String,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) requests: AtomicU64,
}

impl HandlerInfo {
    pub(crate) fn new(collection: String, peer: Option<SocketAddr>) -> Self {
        Self {
            collection,
            peer,
            started_at: Utc::now(),
            requests: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> HandlerStats {
        HandlerStats {
            collection: self.collection.clone(),
            peer: self.peer,
            started_at: self.started_at,
            total_requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

/// One data connection in a [`ServerStats`] snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerStats {
    /// Collection the connection is attached to
    pub collection: String,
    /// Remote address
    pub peer: Option<SocketAddr>,
    /// Handshake time
    pub started_at: DateTime<Utc>,
    /// Requests served so far
    pub total_requests: u64,
}

impl HandlerStats {
    /// Average request rate since the handshake
    pub fn requests_per_second(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_ms = (now - self.started_at).num_milliseconds();
        if elapsed_ms <= 0 {
            return 0.0;
        }
        self.total_requests as f64 * 1000.0 / elapsed_ms as f64
    }
}

/// Point-in-time view of a running server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStats {
    /// Connections accepted since start
    pub total_connections: u64,
    /// Live data connections, busiest first
    pub handlers: Vec<HandlerStats>,
    /// Live change subscribers
    pub subscribers: usize,
    /// Collections created so far
    pub collections: usize,
}

impl ServerStats {
    /// Number of live data connections
    pub fn active_handlers(&self) -> usize {
        self.handlers.len()
    }
}
