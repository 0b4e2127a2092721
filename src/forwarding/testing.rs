//! Test doubles for the forwarding layer

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::TunnelError;
use crate::ssh::{Transport, VirtualConn};

/// Stands in for the bastion: dials routed targets directly over loopback TCP
#[derive(Default)]
pub(crate) struct LoopbackTransport {
    routes: Mutex<HashMap<(String, u16), SocketAddr>>,
    dials: AtomicUsize,
    failures: AtomicUsize,
    close_calls: AtomicUsize,
    closed: CancellationToken,
}

impl LoopbackTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `host:port` reachable at `addr`
    pub(crate) fn route(&self, host: &str, port: u16, addr: SocketAddr) {
        self.routes.lock().insert((host.to_string(), port), addr);
    }

    /// Fail the next `n` dials regardless of routes
    pub(crate) fn fail_next_dials(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub(crate) fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Simulate the bastion dropping the connection
    pub(crate) fn lose_connection(&self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn dial(&self, host: &str, port: u16) -> Result<VirtualConn, TunnelError> {
        if self.closed.is_cancelled() {
            return Err(TunnelError::TransportClosed);
        }
        self.dials.fetch_add(1, Ordering::SeqCst);

        let target = format!("{}:{}", host, port);
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TunnelError::DialFailed {
                target,
                reason: "injected failure".to_string(),
            });
        }

        let addr = self
            .routes
            .lock()
            .get(&(host.to_string(), port))
            .copied()
            .ok_or_else(|| TunnelError::DialFailed {
                target: target.clone(),
                reason: "no route to host".to_string(),
            })?;

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TunnelError::DialFailed {
                target,
                reason: e.to_string(),
            })?;
        Ok(Box::new(stream))
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// TCP echo server standing in for the remote service
pub(crate) async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}
