//! Handle Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. `TransportSession` is the
//! cloneable controller that talks to it through an mpsc channel, so the
//! handle is never shared behind a lock.
//!
//! Channel opens are driven concurrently inside the owner task, so one slow
//! dial does not hold up the others.
//!
//! Shutdown is split in two tokens:
//! - `shutdown`: close requested (or connection lost). New dials are refused.
//! - `closed`: the owner task has dropped all in-flight opens and disconnected.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::transport::{Transport, VirtualConn};
use crate::error::TunnelError;

/// Upper bound on waiting for the owner task during `close()`
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the owner task checks whether the SSH connection is still up
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Originator reported in direct-tcpip requests
const ORIGINATOR_HOST: &str = "127.0.0.1";

/// Request to open a direct-tcpip channel
pub struct DialRequest {
    host: String,
    port: u16,
    reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
}

/// Controller for an authenticated bastion connection
///
/// Clones share the same connection. Only the lifecycle owner should call
/// `close()`.
#[derive(Clone)]
pub struct TransportSession {
    id: String,
    cmd_tx: mpsc::Sender<DialRequest>,
    shutdown: CancellationToken,
    closed: CancellationToken,
}

impl TransportSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn stopped(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.closed.cancelled() => {}
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<DialRequest>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();
        let (watch_shutdown, watch_closed) = (shutdown.clone(), closed.clone());
        tokio::spawn(async move {
            watch_shutdown.cancelled().await;
            watch_closed.cancel();
        });
        let session = Self {
            id: "test".to_string(),
            cmd_tx,
            shutdown,
            closed,
        };
        (session, cmd_rx)
    }
}

#[async_trait]
impl Transport for TransportSession {
    async fn dial(&self, host: &str, port: u16) -> Result<VirtualConn, TunnelError> {
        if self.is_closed() {
            return Err(TunnelError::TransportClosed);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = DialRequest {
            host: host.to_string(),
            port,
            reply_tx,
        };

        tokio::select! {
            biased;
            _ = self.stopped() => return Err(TunnelError::TransportClosed),
            sent = self.cmd_tx.send(request) => {
                sent.map_err(|_| TunnelError::TransportClosed)?;
            }
        }

        let reply = tokio::select! {
            biased;
            _ = self.stopped() => return Err(TunnelError::TransportClosed),
            reply = reply_rx => reply.map_err(|_| TunnelError::TransportClosed)?,
        };

        match reply {
            Ok(channel) => {
                debug!("Opened direct-tcpip channel to {}:{}", host, port);
                Ok(Box::new(channel.into_stream()))
            }
            Err(russh::Error::Disconnect) => Err(TunnelError::TransportClosed),
            Err(e) => Err(TunnelError::DialFailed {
                target: format!("{}:{}", host, port),
                reason: e.to_string(),
            }),
        }
    }

    async fn close(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Closing transport session {}", self.id);
        }
        self.shutdown.cancel();

        if tokio::time::timeout(CLOSE_TIMEOUT, self.closed.cancelled())
            .await
            .is_err()
        {
            warn!(
                "Transport session {} did not close within {}s",
                self.id,
                CLOSE_TIMEOUT.as_secs()
            );
        }
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.closed.is_cancelled()
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes the handle and returns the controller used for dialing and closing.
pub fn spawn_handle_owner_task(
    handle: Handle<ClientHandler>,
    session_id: String,
) -> TransportSession {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<DialRequest>(64);
    let shutdown = CancellationToken::new();
    let closed = CancellationToken::new();
    let task_shutdown = shutdown.clone();
    let task_closed = closed.clone();
    let task_id = session_id.clone();

    tokio::spawn(async move {
        let handle = handle;
        let mut in_flight = FuturesUnordered::new();
        let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Handle owner task started for session {}", task_id);

        let reason = loop {
            tokio::select! {
                _ = task_shutdown.cancelled() => break "close requested",

                cmd = cmd_rx.recv() => match cmd {
                    Some(DialRequest { host, port, reply_tx }) => {
                        let handle = &handle;
                        in_flight.push(async move {
                            let result = handle
                                .channel_open_direct_tcpip(
                                    host,
                                    u32::from(port),
                                    ORIGINATOR_HOST,
                                    0,
                                )
                                .await;
                            if reply_tx.send(result).is_err() {
                                // Channel is dropped here; the server closes it
                                debug!("Caller dropped before receiving direct-tcpip result");
                            }
                        });
                    }
                    None => break "all controllers dropped",
                },

                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}

                _ = liveness.tick() => {
                    if handle.is_closed() {
                        break "connection lost";
                    }
                }
            }
        };

        // === Cleanup phase ===
        info!("Transport session {} shutting down: {}", task_id, reason);
        task_shutdown.cancel();

        // Dropping pending opens drops their reply senders; callers see TransportClosed
        drop(in_flight);
        cmd_rx.close();
        while cmd_rx.try_recv().is_ok() {}

        if tokio::time::timeout(
            CLOSE_TIMEOUT,
            handle.disconnect(russh::Disconnect::ByApplication, "Tunnel closed", "en"),
        )
        .await
        .is_err()
        {
            warn!("Timed out sending disconnect for session {}", task_id);
        }

        task_closed.cancel();
        info!("Handle owner task terminated for session {}", task_id);
    });

    TransportSession {
        id: session_id,
        cmd_tx,
        shutdown,
        closed,
    }
}
