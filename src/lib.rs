//! Bastion Tunnel - on-demand local port forwarding through an SSH bastion
//!
//! Opens one authenticated SSH session to a bastion host and forwards a local
//! TCP port to a fixed service behind it, one direct-tcpip channel per
//! accepted connection.

pub mod cli;
pub mod config;
pub mod error;
pub mod forwarding;
pub mod launcher;
pub mod lifecycle;
pub mod ssh;

pub use error::TunnelError;
pub use forwarding::{ForwardTarget, ForwardingSession, LocalForward, SessionState};
pub use lifecycle::{LifecycleController, ShutdownReason};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging to stderr, `info` unless overridden by `RUST_LOG`
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
