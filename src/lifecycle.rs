//! Tunnel lifecycle
//!
//! Owns the bastion transport and the forwarding session, and tears both
//! down in order on interrupt, explicit request or transport loss.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::TunnelError;
use crate::forwarding::{ForwardingSession, LocalForward, SessionState};
use crate::ssh::Transport;

/// Why `run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C or SIGTERM
    Interrupt,
    /// `request_shutdown` was called
    Requested,
    /// The bastion connection dropped
    TransportLost,
}

pub struct LifecycleController {
    transport: Arc<dyn Transport>,
    forwarding: ForwardingSession,
    cancel: CancellationToken,
    shutdown_done: OnceCell<()>,
}

impl LifecycleController {
    /// Start forwarding over an established transport.
    ///
    /// The controller takes ownership of the transport: if the listener
    /// cannot be bound the transport is closed before the error is returned.
    pub async fn start(
        transport: Arc<dyn Transport>,
        config: LocalForward,
    ) -> Result<Self, TunnelError> {
        let cancel = CancellationToken::new();

        let forwarding =
            match ForwardingSession::start(transport.clone(), config, cancel.child_token()).await {
                Ok(forwarding) => forwarding,
                Err(e) => {
                    transport.close().await;
                    return Err(e);
                }
            };

        Ok(Self {
            transport,
            forwarding,
            cancel,
            shutdown_done: OnceCell::new(),
        })
    }

    pub fn forwarding(&self) -> &ForwardingSession {
        &self.forwarding
    }

    pub fn state(&self) -> SessionState {
        self.forwarding.state()
    }

    /// Ask `run` to return. Teardown happens in `run`/`shutdown`.
    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Serve until Ctrl+C / SIGTERM, `request_shutdown` or transport loss, then shut down.
    pub async fn run(&self) -> ShutdownReason {
        self.run_until(shutdown_signal()).await
    }

    /// Like `run`, with `interrupt` standing in for the process signals.
    pub async fn run_until<F>(&self, interrupt: F) -> ShutdownReason
    where
        F: Future<Output = ()>,
    {
        let reason = tokio::select! {
            _ = interrupt => {
                info!("Interrupt received, closing tunnel");
                ShutdownReason::Interrupt
            }
            _ = self.cancel.cancelled() => ShutdownReason::Requested,
            _ = self.transport.closed() => {
                warn!("Connection to bastion lost");
                ShutdownReason::TransportLost
            }
        };

        self.shutdown().await;
        reason
    }

    /// Tear everything down: stop accepting, close every connection, drain,
    /// then close the transport.
    ///
    /// Idempotent. Concurrent callers all wait for the one teardown.
    pub async fn shutdown(&self) {
        self.shutdown_done
            .get_or_init(|| async {
                info!("Shutting down tunnel");
                self.cancel.cancel();
                self.forwarding.close().await;
                self.transport.close().await;
                info!("Tunnel closed");
            })
            .await;
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm => {},
    }
}
