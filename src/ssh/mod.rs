//! SSH transport to the bastion host
//!
//! Built on russh. Provides:
//! - Public-key authentication from in-memory key material
//! - Host key verification against known_hosts (strict, accept-new or disabled)
//! - A single-owner handle task that opens direct-tcpip channels on demand

mod client;
mod config;
mod handle_owner;
pub mod known_hosts;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{connect, parse_private_key, ClientHandler};
pub use config::{HostKeyPolicy, TransportEndpoint, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SSH_PORT};
pub use handle_owner::{spawn_handle_owner_task, TransportSession};
pub use known_hosts::{HostKeyVerification, KnownHostsStore};
pub use transport::{AsyncStream, Transport, VirtualConn};
