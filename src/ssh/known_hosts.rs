//! Known hosts lookup for bastion host key verification
//!
//! Matching is done by russh's OpenSSH `known_hosts` reader, which handles
//! plain, comma-separated and hashed (`|1|salt|hmac`) host patterns. This
//! module maps its answer onto `HostKeyVerification` with fingerprints for
//! the log and error messages.

use std::path::{Path, PathBuf};

use russh::keys::known_hosts::{
    check_known_hosts_path, known_host_keys_path, learn_known_hosts_path,
};
use russh::keys::{HashAlg, PublicKey};
use tracing::{debug, info};

use crate::error::TunnelError;

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerification {
    /// Key matches a known_hosts entry
    Verified,
    /// No entry for this host and key type
    Unknown { fingerprint: String },
    /// An entry exists with a different key (potential MITM)
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

/// A known_hosts file. Read on every `verify`, so entries added by other
/// tools in the meantime are seen.
pub struct KnownHostsStore {
    path: PathBuf,
}

impl KnownHostsStore {
    /// `~/.ssh/known_hosts`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".ssh").join("known_hosts"))
            .unwrap_or_else(|| PathBuf::from(".ssh/known_hosts"))
    }

    /// Store backed by `path`. A missing file has no entries.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// OpenSSH style `SHA256:...` fingerprint
    pub fn fingerprint(key: &PublicKey) -> String {
        key.fingerprint(HashAlg::Sha256).to_string()
    }

    /// Check `key` against the entries for `host:port`.
    ///
    /// Host names are compared case-insensitively. An unreadable file or a
    /// malformed entry for this host is an error, never `Unknown`.
    pub fn verify(
        &self,
        host: &str,
        port: u16,
        key: &PublicKey,
    ) -> Result<HostKeyVerification, TunnelError> {
        let host = host.to_lowercase();
        let actual_fingerprint = Self::fingerprint(key);

        match check_known_hosts_path(&host, port, key, &self.path) {
            Ok(true) => Ok(HostKeyVerification::Verified),
            Ok(false) => {
                debug!("Unknown host: {}:{}", host, port);
                Ok(HostKeyVerification::Unknown {
                    fingerprint: actual_fingerprint,
                })
            }
            Err(russh::keys::Error::KeyChanged { line }) => {
                let expected_fingerprint = known_host_keys_path(&host, port, &self.path)
                    .ok()
                    .and_then(|keys| keys.into_iter().find(|(l, _)| *l == line))
                    .map(|(_, recorded)| Self::fingerprint(&recorded))
                    .unwrap_or_else(|| format!("{}:{}", self.path.display(), line));
                Ok(HostKeyVerification::Changed {
                    expected_fingerprint,
                    actual_fingerprint,
                })
            }
            Err(e) => Err(TunnelError::HostKeyRejected(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Append an entry for `host:port`, creating the file and its directory if needed
    pub fn add_host(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), TunnelError> {
        let host = host.to_lowercase();
        learn_known_hosts_path(&host, port, key, &self.path)
            .map_err(|e| TunnelError::Io(std::io::Error::other(e.to_string())))?;

        info!(
            "Added {}:{} to {} ({})",
            host,
            port,
            self.path.display(),
            Self::fingerprint(key)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const GITHUB_ED25519: &str =
        "AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";
    const GITLAB_ED25519: &str =
        "AAAAC3NzaC1lZDI1NTE5AAAAIAfuCHKVTjquxvt6CM6tdG4SLp1Btn/nOeHHE5UOzRdf";

    // HMAC-SHA1 of "bastion.example" and "[bastion.example]:2222", salt 0x01..0x14
    const HASHED_BASTION: &str = "|1|AQIDBAUGBwgJCgsMDQ4PEBESExQ=|3GSGuW3KDchkHq3CQzEeA8yyG/Q=";
    const HASHED_BASTION_2222: &str =
        "|1|AQIDBAUGBwgJCgsMDQ4PEBESExQ=|rSg2DyWuSvqe23oyMbw9J6zRO6I=";

    fn key(b64: &str) -> PublicKey {
        russh::keys::parse_public_key_base64(b64).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = tempdir().unwrap();
        let store = KnownHostsStore::new(temp.path().join("known_hosts"));
        assert!(matches!(
            store.verify("bastion.example", 22, &key(GITHUB_ED25519)).unwrap(),
            HostKeyVerification::Unknown { .. }
        ));
    }

    #[test]
    fn test_verify_known_and_changed() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("known_hosts");
        fs::write(
            &path,
            format!(
                "# comment\nbastion.example,10.0.0.5 ssh-ed25519 {}\n",
                GITHUB_ED25519
            ),
        )
        .unwrap();
        let store = KnownHostsStore::new(&path);

        assert_eq!(
            store.verify("bastion.example", 22, &key(GITHUB_ED25519)).unwrap(),
            HostKeyVerification::Verified
        );
        assert_eq!(
            store.verify("Bastion.Example", 22, &key(GITHUB_ED25519)).unwrap(),
            HostKeyVerification::Verified
        );
        assert_eq!(
            store.verify("10.0.0.5", 22, &key(GITHUB_ED25519)).unwrap(),
            HostKeyVerification::Verified
        );
        match store.verify("bastion.example", 22, &key(GITLAB_ED25519)).unwrap() {
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => {
                assert_eq!(expected_fingerprint, KnownHostsStore::fingerprint(&key(GITHUB_ED25519)));
                assert_eq!(actual_fingerprint, KnownHostsStore::fingerprint(&key(GITLAB_ED25519)));
            }
            other => panic!("expected Changed, got {:?}", other),
        }
        // Non-default port is a distinct entry
        assert!(matches!(
            store.verify("bastion.example", 2222, &key(GITHUB_ED25519)).unwrap(),
            HostKeyVerification::Unknown { .. }
        ));
    }

    #[test]
    fn test_hashed_entries() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("known_hosts");
        fs::write(
            &path,
            format!(
                "{} ssh-ed25519 {}\n{} ssh-ed25519 {}\n",
                HASHED_BASTION, GITHUB_ED25519, HASHED_BASTION_2222, GITLAB_ED25519
            ),
        )
        .unwrap();
        let store = KnownHostsStore::new(&path);

        assert_eq!(
            store.verify("bastion.example", 22, &key(GITHUB_ED25519)).unwrap(),
            HostKeyVerification::Verified
        );
        assert_eq!(
            store.verify("bastion.example", 2222, &key(GITLAB_ED25519)).unwrap(),
            HostKeyVerification::Verified
        );

        // A different key for a hashed host is a change, not a new host
        match store.verify("bastion.example", 22, &key(GITLAB_ED25519)).unwrap() {
            HostKeyVerification::Changed {
                expected_fingerprint,
                ..
            } => assert_eq!(
                expected_fingerprint,
                KnownHostsStore::fingerprint(&key(GITHUB_ED25519))
            ),
            other => panic!("expected Changed, got {:?}", other),
        }

        assert!(matches!(
            store.verify("other.example", 22, &key(GITHUB_ED25519)).unwrap(),
            HostKeyVerification::Unknown { .. }
        ));
    }

    #[test]
    fn test_add_host_persists() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("ssh").join("known_hosts");
        let store = KnownHostsStore::new(&path);
        store.add_host("bastion.example", 2222, &key(GITHUB_ED25519)).unwrap();
        assert_eq!(
            store.verify("bastion.example", 2222, &key(GITHUB_ED25519)).unwrap(),
            HostKeyVerification::Verified
        );

        let content = fs::read_to_string(&path).unwrap();
        assert!(content
            .lines()
            .any(|line| line.starts_with("[bastion.example]:2222 ssh-ed25519 ")));
    }
}
