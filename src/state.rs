//! Shared application state.
//!
//! Holds the loaded configuration and the WebSocket connection accounting
//! used by the connection-limit middleware.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::config::ServerConfig;

/// Why a WebSocket upgrade was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("global WebSocket connection limit reached")]
    GlobalLimitReached,
    #[error("per-IP connection limit reached")]
    PerIpLimitReached,
}

#[derive(Debug, Default)]
struct ConnectionCounts {
    total: usize,
    per_ip: HashMap<IpAddr, u32>,
}

#[derive(Debug)]
struct ConnectionTracker {
    max_total: Option<usize>,
    max_per_ip: u32,
    counts: Mutex<ConnectionCounts>,
}

impl ConnectionTracker {
    fn release(&self, ip: IpAddr) {
        let mut counts = self.counts.lock();
        counts.total = counts.total.saturating_sub(1);
        if let Some(count) = counts.per_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.per_ip.remove(&ip);
            }
        }
    }
}

/// One acquired connection slot. The slot is released when the permit drops.
#[derive(Debug)]
pub struct ConnectionPermit {
    tracker: Arc<ConnectionTracker>,
    ip: IpAddr,
}

impl ConnectionPermit {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.tracker.release(self.ip);
        debug!(ip = %self.ip, "Released WebSocket connection slot");
    }
}

/// Application state shared by all handlers.
#[derive(Debug)]
pub struct AppState {
    pub config: ServerConfig,
    connections: Arc<ConnectionTracker>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let connections = Arc::new(ConnectionTracker {
            max_total: config.max_websocket_connections,
            max_per_ip: config.max_connections_per_ip,
            counts: Mutex::new(ConnectionCounts::default()),
        });
        Arc::new(Self {
            config,
            connections,
        })
    }

    /// Reserve a WebSocket slot for `ip`.
    ///
    /// The global limit is checked first, so a full server reports
    /// [`ConnectionLimitError::GlobalLimitReached`] even for a busy IP.
    pub fn try_acquire_connection(
        &self,
        ip: IpAddr,
    ) -> Result<ConnectionPermit, ConnectionLimitError> {
        let tracker = &self.connections;
        let mut counts = tracker.counts.lock();

        if let Some(max) = tracker.max_total
            && counts.total >= max
        {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        let current = counts.per_ip.get(&ip).copied().unwrap_or(0);
        if current >= tracker.max_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        counts.total += 1;
        counts.per_ip.insert(ip, current + 1);
        drop(counts);

        Ok(ConnectionPermit {
            tracker: Arc::clone(tracker),
            ip,
        })
    }

    pub fn ws_connection_count(&self) -> usize {
        self.connections.counts.lock().total
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.connections
            .counts
            .lock()
            .per_ip
            .get(ip)
            .copied()
            .unwrap_or(0)
    }
}
