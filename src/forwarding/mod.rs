//! Port Forwarding Module
//!
//! Local port forwarding through the bastion transport: a listener on the
//! local machine, one connection pair per accepted socket, and a registry
//! that lets shutdown close every pair at once.

mod local;
mod pair;
mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use local::{
    check_listener, ForwardOptions, ForwardTarget, ForwardingSession, LocalForward, SessionState,
    DEFAULT_DRAIN_TIMEOUT, DEFAULT_LOCAL_PORT, DEFAULT_REMOTE_PORT,
};
pub use pair::{run_pair, PairOutcome};
pub use registry::{ConnectionGuard, ConnectionRegistry, Direction, ForwardStats};
