//! Transport abstraction used by the forwarding layer
//!
//! The forwarding code only needs two things from the bastion connection:
//! open a virtual TCP stream to `host:port`, and close. `TransportSession`
//! implements this over SSH direct-tcpip channels.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TunnelError;

/// Byte stream usable on either side of a connection pair
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A logical TCP stream opened through the transport
pub type VirtualConn = Box<dyn AsyncStream>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a virtual connection to `host:port` from the bastion's network.
    ///
    /// Fails with `DialFailed` when the target is unreachable and with
    /// `TransportClosed` once `close` has been called. Safe to call concurrently.
    async fn dial(&self, host: &str, port: u16) -> Result<VirtualConn, TunnelError>;

    /// Close the transport. Idempotent; pending dials fail with `TransportClosed`.
    async fn close(&self);

    /// True once the transport has been closed or lost
    fn is_closed(&self) -> bool;

    /// Resolves when the transport is gone, whether closed locally or lost remotely
    async fn closed(&self);
}
