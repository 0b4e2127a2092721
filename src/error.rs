//! Tunnel error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Connection to {addr} timed out after {secs}s")]
    ConnectTimeout { addr: String, secs: u64 },

    #[error("Connection to {addr} failed: {reason}")]
    ConnectRefused { addr: String, reason: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Host key verification failed: {0}")]
    HostKeyRejected(String),

    #[error("Failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Failed to open connection to {target}: {reason}")]
    DialFailed { target: String, reason: String },

    #[error("Transport session is closed")]
    TransportClosed,

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Setup errors that abort the whole session.
    ///
    /// Everything else is scoped to a single forwarded connection and is only logged.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TunnelError::InvalidCredential(_)
                | TunnelError::ConnectTimeout { .. }
                | TunnelError::ConnectRefused { .. }
                | TunnelError::AuthenticationFailed(_)
                | TunnelError::HostKeyRejected(_)
                | TunnelError::BindFailed { .. }
        )
    }
}

impl From<russh::Error> for TunnelError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::IO(e) => TunnelError::Io(e),
            other => TunnelError::ProtocolError(other.to_string()),
        }
    }
}

/// Private key decoding failures
impl From<russh::keys::Error> for TunnelError {
    fn from(err: russh::keys::Error) -> Self {
        TunnelError::InvalidCredential(format!("unable to parse private key: {}", err))
    }
}
