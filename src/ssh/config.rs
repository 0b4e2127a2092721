//! Bastion endpoint configuration

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Standard SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default bound on TCP connect + handshake + authentication
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// How the bastion's host key is checked against known_hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Reject unknown and changed keys
    #[default]
    Strict,
    /// Trust on first use: save unknown keys, reject changed keys
    AcceptNew,
    /// No verification at all. Vulnerable to man-in-the-middle attacks.
    Insecure,
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::Strict => write!(f, "strict"),
            HostKeyPolicy::AcceptNew => write!(f, "accept-new"),
            HostKeyPolicy::Insecure => write!(f, "insecure"),
        }
    }
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(HostKeyPolicy::Strict),
            "accept-new" => Ok(HostKeyPolicy::AcceptNew),
            "insecure" => Ok(HostKeyPolicy::Insecure),
            other => Err(format!(
                "unknown host key policy '{}' (expected strict, accept-new or insecure)",
                other
            )),
        }
    }
}

/// Identifies the bastion and the credential used to log in to it.
///
/// Key material is held in a zeroizing buffer and never printed by `Debug`.
#[derive(Clone)]
pub struct TransportEndpoint {
    /// Bastion host name or address
    pub host: String,
    /// SSH port (default: 22)
    pub port: u16,
    /// Login user on the bastion
    pub username: String,
    /// OpenSSH / PEM encoded private key
    pub key_material: Zeroizing<Vec<u8>>,
    /// Passphrase for encrypted keys
    pub passphrase: Option<Zeroizing<String>>,
    /// Bound on connect, handshake and authentication
    pub connect_timeout: Duration,
    /// Host key verification mode
    pub host_key_policy: HostKeyPolicy,
    /// known_hosts file; `~/.ssh/known_hosts` when unset
    pub known_hosts_path: Option<PathBuf>,
}

impl TransportEndpoint {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        key_material: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            key_material: Zeroizing::new(key_material.into()),
            passphrase: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// `host:port` as dialed
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for TransportEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("key_material", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("host_key_policy", &self.host_key_policy)
            .field("known_hosts_path", &self.known_hosts_path)
            .finish()
    }
}
