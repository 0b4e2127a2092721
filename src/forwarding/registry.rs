//! Active connection registry
//!
//! Tracks every accepted local connection so shutdown can close them all.
//! The accept loop adds entries, each pair removes its own entry on drop, and
//! `close_all` cancels every tracked connection. All three may race; the map
//! is guarded by a mutex.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Statistics for a forwarding session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardStats {
    /// Total local connections accepted
    pub connection_count: u64,
    /// Connections currently tracked
    pub active_connections: u64,
    /// Remote dials that failed
    pub failed_dials: u64,
    /// Bytes copied local -> remote
    pub bytes_sent: u64,
    /// Bytes copied remote -> local
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// local -> remote
    Sent,
    /// remote -> local
    Received,
}

struct ConnectionEntry {
    peer: SocketAddr,
    token: CancellationToken,
    opened_at: Instant,
}

pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<HashMap<u64, ConnectionEntry>>,
    stats: RwLock<ForwardStats>,
    root: CancellationToken,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
            stats: RwLock::new(ForwardStats::default()),
            root: CancellationToken::new(),
        }
    }

    /// Track a new connection.
    ///
    /// After `close_all` the returned guard is already cancelled, so a
    /// connection accepted during teardown is closed straight away.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();

        self.connections.lock().insert(
            id,
            ConnectionEntry {
                peer,
                token: token.clone(),
                opened_at: Instant::now(),
            },
        );
        {
            let mut s = self.stats.write();
            s.connection_count += 1;
            s.active_connections += 1;
        }

        ConnectionGuard {
            id,
            peer,
            token,
            registry: Arc::clone(self),
        }
    }

    fn remove(&self, id: u64) {
        if let Some(entry) = self.connections.lock().remove(&id) {
            debug!(
                "Connection {} from {} released after {:?}",
                id,
                entry.peer,
                entry.opened_at.elapsed()
            );
            let mut s = self.stats.write();
            s.active_connections = s.active_connections.saturating_sub(1);
        }
    }

    /// Close every tracked connection. Returns how many were open.
    pub fn close_all(&self) -> usize {
        self.root.cancel();
        let connections = self.connections.lock();
        for entry in connections.values() {
            entry.token.cancel();
        }
        connections.len()
    }

    pub fn is_closed(&self) -> bool {
        self.root.is_cancelled()
    }

    pub fn active(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn record_bytes(&self, direction: Direction, n: u64) {
        let mut s = self.stats.write();
        match direction {
            Direction::Sent => s.bytes_sent += n,
            Direction::Received => s.bytes_received += n,
        }
    }

    pub fn record_failed_dial(&self) {
        self.stats.write().failed_dials += 1;
    }

    pub fn stats(&self) -> ForwardStats {
        self.stats.read().clone()
    }

    /// Wait until no connections are tracked, up to `timeout`.
    ///
    /// Returns false if connections were still open when the wait gave up.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            let active = self.active();
            if active == 0 {
                return true;
            }
            if start.elapsed() > timeout {
                warn!(
                    "Timeout waiting for {} active connections to close",
                    active
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Registration of one connection; removes itself from the registry on drop
pub struct ConnectionGuard {
    id: u64,
    peer: SocketAddr,
    token: CancellationToken,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
