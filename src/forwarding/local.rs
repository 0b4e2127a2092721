//! Local Port Forwarding
//!
//! Listens on a local port and forwards every accepted connection to one
//! fixed remote target through the bastion transport.
//! Example: localhost:5602 -> opensearch.internal:443

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pair::run_pair;
use super::registry::{ConnectionRegistry, ForwardStats};
use crate::error::TunnelError;
use crate::ssh::Transport;

pub const DEFAULT_LOCAL_PORT: u16 = 5602;
pub const DEFAULT_REMOTE_PORT: u16 = 443;

/// Bound on waiting for the accept loop and active connections during close
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const READY_ATTEMPTS: u32 = 5;
const READY_INTERVAL: Duration = Duration::from_millis(500);
const READY_DIAL_TIMEOUT: Duration = Duration::from_secs(1);
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Address dialed through the bastion for every accepted connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardTarget {
    pub remote_host: String,
    pub remote_port: u16,
}

impl ForwardTarget {
    pub fn new(remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            remote_host: remote_host.into(),
            remote_port,
        }
    }
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.remote_host, self.remote_port)
    }
}

/// Per-session tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardOptions {
    /// Close a connection when one direction sees no data for this long.
    /// Off by default: a stalled peer holds its connection until shutdown.
    pub idle_timeout: Option<Duration>,
    /// Bound on waiting for connections to release during close
    pub drain_timeout: Duration,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Local port forwarding configuration
#[derive(Debug, Clone)]
pub struct LocalForward {
    /// Local address to bind to (e.g., "localhost:5602")
    pub local_addr: String,
    /// Remote target reached through the bastion
    pub target: ForwardTarget,
    pub options: ForwardOptions,
}

impl LocalForward {
    pub fn new(local_port: u16, target: ForwardTarget) -> Self {
        Self {
            local_addr: format!("localhost:{}", local_port),
            target,
            options: ForwardOptions::default(),
        }
    }

    pub fn with_local_addr(mut self, addr: impl Into<String>) -> Self {
        self.local_addr = addr.into();
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.options.idle_timeout = Some(timeout);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.options.drain_timeout = timeout;
        self
    }
}

/// Forwarding session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Listening,
    ShuttingDown,
    Closed,
}

/// A running local forward
pub struct ForwardingSession {
    config: LocalForward,
    bound_addr: SocketAddr,
    cancel: CancellationToken,
    registry: Arc<ConnectionRegistry>,
    state_tx: Arc<watch::Sender<SessionState>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ForwardingSession {
    /// Bind the local listener and start accepting.
    ///
    /// A bind failure is returned as `BindFailed` and not retried. Cancelling
    /// `cancel` stops the accept loop and closes every active connection.
    pub async fn start(
        transport: Arc<dyn Transport>,
        config: LocalForward,
        cancel: CancellationToken,
    ) -> Result<Self, TunnelError> {
        let (state_tx, _) = watch::channel(SessionState::Starting);

        let listener = bind_listener(&config.local_addr).await?;
        let bound_addr = listener.local_addr().map_err(|e| TunnelError::BindFailed {
            addr: config.local_addr.clone(),
            reason: format!("failed to get bound address: {}", e),
        })?;

        state_tx.send_replace(SessionState::Listening);
        info!(
            "Started local port forward: {} -> {}",
            bound_addr, config.target
        );

        let state_tx = Arc::new(state_tx);
        let registry = Arc::new(ConnectionRegistry::new());

        let accept_task = tokio::spawn(accept_loop(
            listener,
            transport,
            config.target.clone(),
            config.options.idle_timeout,
            registry.clone(),
            cancel.clone(),
            state_tx.clone(),
        ));

        Ok(Self {
            config,
            bound_addr,
            cancel,
            registry,
            state_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Actual bound address
    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    pub fn local_port(&self) -> u16 {
        self.bound_addr.port()
    }

    pub fn target(&self) -> &ForwardTarget {
        &self.config.target
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Listening
    }

    pub fn stats(&self) -> ForwardStats {
        self.registry.stats()
    }

    pub fn active_connections(&self) -> usize {
        self.registry.active()
    }

    /// Best-effort check that the listener accepts connections.
    ///
    /// Advisory only: `false` means the check could not confirm readiness,
    /// not that the forward failed.
    pub async fn wait_ready(&self) -> bool {
        check_listener(self.bound_addr, READY_ATTEMPTS, READY_INTERVAL).await
    }

    /// Stop accepting, close every connection and wait (bounded) for them to release.
    ///
    /// Idempotent. Leaves the session in `Closed`.
    pub async fn close(&self) {
        self.cancel.cancel();

        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(self.config.options.drain_timeout, task).await.is_err() {
                warn!("Accept loop on {} did not exit in time", self.bound_addr);
            }
        }

        // The accept loop already did this; repeated in case it did not get to run
        self.registry.close_all();
        self.registry.wait_idle(self.config.options.drain_timeout).await;

        if self.state_tx.send_replace(SessionState::Closed) != SessionState::Closed {
            info!("Local port forward on {} closed", self.bound_addr);
        }
    }
}

async fn bind_listener(local_addr: &str) -> Result<TcpListener, TunnelError> {
    TcpListener::bind(local_addr).await.map_err(|e| {
        let reason = match e.kind() {
            std::io::ErrorKind::AddrInUse => {
                "port already in use. Another application may be using this port.".to_string()
            }
            std::io::ErrorKind::PermissionDenied => {
                "permission denied. Ports below 1024 require elevated privileges.".to_string()
            }
            std::io::ErrorKind::AddrNotAvailable => {
                "address not available on this system.".to_string()
            }
            _ => e.to_string(),
        };
        TunnelError::BindFailed {
            addr: local_addr.to_string(),
            reason,
        }
    })
}

async fn accept_loop(
    listener: TcpListener,
    transport: Arc<dyn Transport>,
    target: ForwardTarget,
    idle_timeout: Option<Duration>,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    state_tx: Arc<watch::Sender<SessionState>>,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    // Disable Nagle's algorithm for low-latency forwarding
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY: {}", e);
                    }

                    let guard = registry.register(peer);
                    debug!("Accepted connection {} from {}", guard.id(), peer);

                    let transport = transport.clone();
                    let target = target.clone();
                    tokio::spawn(async move {
                        run_pair(stream, transport.as_ref(), &target, guard, idle_timeout).await;
                    });
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    error!("Accept error: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    state_tx.send_if_modified(|state| {
        if *state == SessionState::Listening {
            *state = SessionState::ShuttingDown;
            true
        } else {
            false
        }
    });

    let local_addr = listener.local_addr().ok();
    drop(listener);
    let closing = registry.close_all();
    info!(
        "Listener {:?} closed, closing {} active connections",
        local_addr, closing
    );
}

/// Dial `addr` up to `attempts` times, `interval` apart. True on the first success.
pub async fn check_listener(addr: SocketAddr, attempts: u32, interval: Duration) -> bool {
    for attempt in 1..=attempts {
        match tokio::time::timeout(READY_DIAL_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                debug!("Listener {} is accepting (attempt {})", addr, attempt);
                return true;
            }
            Ok(Err(e)) => debug!("Readiness check {}/{} failed: {}", attempt, attempts, e),
            Err(_) => debug!("Readiness check {}/{} timed out", attempt, attempts),
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    warn!("Could not confirm that {} is accepting connections", addr);
    false
}
