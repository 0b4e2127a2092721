//! Bastion connection setup using russh

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PrivateKey, PublicKey};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::config::{HostKeyPolicy, TransportEndpoint};
use super::handle_owner::{spawn_handle_owner_task, TransportSession};
use super::known_hosts::{HostKeyVerification, KnownHostsStore};
use crate::error::TunnelError;

/// Open an authenticated transport session to the bastion.
///
/// The key is parsed before any network I/O. TCP connect, SSH handshake and
/// authentication together are bounded by `endpoint.connect_timeout`.
pub async fn connect(endpoint: &TransportEndpoint) -> Result<TransportSession, TunnelError> {
    let key = parse_private_key(endpoint)?;
    let addr = endpoint.address();

    if endpoint.host_key_policy == HostKeyPolicy::Insecure {
        warn!(
            "Host key verification is disabled for {}. The connection is open to man-in-the-middle attacks.",
            addr
        );
    }

    info!("Connecting to bastion {} as {}", addr, endpoint.username);

    let handle = tokio::time::timeout(endpoint.connect_timeout, establish(endpoint, key))
        .await
        .map_err(|_| TunnelError::ConnectTimeout {
            addr: addr.clone(),
            secs: endpoint.connect_timeout.as_secs(),
        })??;

    let session_id = uuid::Uuid::new_v4().to_string();
    info!("Transport session {} established to {}", session_id, addr);
    Ok(spawn_handle_owner_task(handle, session_id))
}

/// Decode the endpoint's key material into a signing key
pub fn parse_private_key(endpoint: &TransportEndpoint) -> Result<PrivateKey, TunnelError> {
    let text = std::str::from_utf8(&endpoint.key_material).map_err(|_| {
        TunnelError::InvalidCredential("private key is not valid UTF-8 text".to_string())
    })?;
    let passphrase = endpoint.passphrase.as_deref().map(String::as_str);

    Ok(russh::keys::decode_secret_key(text, passphrase)?)
}

async fn establish(
    endpoint: &TransportEndpoint,
    key: PrivateKey,
) -> Result<Handle<ClientHandler>, TunnelError> {
    let addr = endpoint.address();

    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| TunnelError::ConnectRefused {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY on bastion socket: {}", e);
    }

    let ssh_config = client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    };

    let handler = ClientHandler::new(endpoint);
    let mut handle = client::connect_stream(Arc::new(ssh_config), stream, handler)
        .await
        .map_err(|e| match e {
            TunnelError::Io(io) => TunnelError::ConnectRefused {
                addr: addr.clone(),
                reason: io.to_string(),
            },
            other => other,
        })?;

    debug!("SSH handshake completed with {}", addr);

    let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
    let auth = handle
        .authenticate_publickey(&endpoint.username, key_with_hash)
        .await
        .map_err(|e| TunnelError::AuthenticationFailed(e.to_string()))?;

    if !auth.success() {
        return Err(TunnelError::AuthenticationFailed(format!(
            "public key for {} rejected by {}",
            endpoint.username, addr
        )));
    }

    info!("SSH authentication successful for {}@{}", endpoint.username, addr);
    Ok(handle)
}

/// What to do with a presented host key
#[derive(Debug, PartialEq)]
enum HostKeyAction {
    Accept,
    AcceptAndSave,
    Reject(String),
}

fn host_key_action(
    policy: HostKeyPolicy,
    addr: &str,
    verification: &HostKeyVerification,
) -> HostKeyAction {
    match verification {
        HostKeyVerification::Verified => HostKeyAction::Accept,
        HostKeyVerification::Unknown { .. } if policy == HostKeyPolicy::AcceptNew => {
            HostKeyAction::AcceptAndSave
        }
        HostKeyVerification::Unknown { fingerprint } => HostKeyAction::Reject(format!(
            "unknown host {} (fingerprint: {}). Add it to known_hosts or use the accept-new policy.",
            addr, fingerprint
        )),
        // Changed keys are rejected under every verifying policy
        HostKeyVerification::Changed {
            expected_fingerprint,
            actual_fingerprint,
        } => HostKeyAction::Reject(format!(
            "key for {} has changed! Expected {}, got {}. This could indicate a man-in-the-middle attack.",
            addr, expected_fingerprint, actual_fingerprint
        )),
    }
}

/// Client handler for russh callbacks
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts_path: PathBuf,
}

impl ClientHandler {
    pub fn new(endpoint: &TransportEndpoint) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            policy: endpoint.host_key_policy,
            known_hosts_path: endpoint
                .known_hosts_path
                .clone()
                .unwrap_or_else(KnownHostsStore::default_path),
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = TunnelError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let addr = format!("{}:{}", self.host, self.port);

        if self.policy == HostKeyPolicy::Insecure {
            warn!(
                "Accepting unverified host key for {} (fingerprint: {})",
                addr,
                KnownHostsStore::fingerprint(server_public_key)
            );
            return Ok(true);
        }

        let store = KnownHostsStore::new(&self.known_hosts_path);
        let verification = store.verify(&self.host, self.port, server_public_key)?;

        match host_key_action(self.policy, &addr, &verification) {
            HostKeyAction::Accept => {
                info!("Host key verified for {}", addr);
                Ok(true)
            }
            HostKeyAction::AcceptAndSave => {
                info!(
                    "Trusting new host key for {} (fingerprint: {})",
                    addr,
                    KnownHostsStore::fingerprint(server_public_key)
                );
                if let Err(e) = store.add_host(&self.host, self.port, server_public_key) {
                    warn!("Failed to save host key to {}: {}", store.path().display(), e);
                }
                Ok(true)
            }
            HostKeyAction::Reject(reason) => {
                warn!("Rejecting host key: {}", reason);
                Err(TunnelError::HostKeyRejected(reason))
            }
        }
    }
}
