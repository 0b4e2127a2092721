//! Configuration Types
//!
//! Defines the structure of the tunnel configuration file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::storage::ConfigError;
use crate::forwarding::{ForwardTarget, DEFAULT_LOCAL_PORT, DEFAULT_REMOTE_PORT};
use crate::ssh::{HostKeyPolicy, TransportEndpoint, DEFAULT_SSH_PORT};

fn default_local_port() -> u16 {
    DEFAULT_LOCAL_PORT
}

fn default_remote_port() -> u16 {
    DEFAULT_REMOTE_PORT
}

/// One named deployment reachable through the bastion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Host dialed from the bastion
    #[serde(alias = "opensearch_host")]
    pub remote_host: String,
    /// Overrides the config-wide remote port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
}

impl Environment {
    pub fn new(remote_host: impl Into<String>) -> Self {
        Self {
            remote_host: remote_host.into(),
            remote_port: None,
        }
    }
}

/// Root configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Bastion in `username@hostname[:port]` form
    pub bastion_host: String,
    /// Private key file; `~` is expanded
    pub key_path: String,
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    #[serde(default)]
    pub environments: BTreeMap<String, Environment>,
}

impl TunnelConfig {
    pub fn new(bastion_host: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            bastion_host: bastion_host.into(),
            key_path: key_path.into(),
            local_port: DEFAULT_LOCAL_PORT,
            remote_port: DEFAULT_REMOTE_PORT,
            host_key_policy: HostKeyPolicy::default(),
            environments: BTreeMap::new(),
        }
    }

    pub fn with_environment(mut self, name: impl Into<String>, env: Environment) -> Self {
        self.environments.insert(name.into(), env);
        self
    }

    /// Environment names in sorted order
    pub fn environment_names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    /// Resolve an environment to the target dialed through the bastion
    pub fn environment(&self, name: &str) -> Result<ForwardTarget, ConfigError> {
        let env = self
            .environments
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEnvironment {
                name: name.to_string(),
                available: self.environment_names(),
            })?;

        Ok(ForwardTarget::new(
            env.remote_host.clone(),
            env.remote_port.unwrap_or(self.remote_port),
        ))
    }

    /// Build the bastion endpoint, reading the private key from disk
    pub async fn endpoint(&self) -> Result<TransportEndpoint, ConfigError> {
        let (username, host, port) = parse_bastion(&self.bastion_host)?;

        let key_path = expand_tilde(&self.key_path);
        let key_material =
            tokio::fs::read(&key_path)
                .await
                .map_err(|source| ConfigError::KeyUnreadable {
                    path: key_path.clone(),
                    source,
                })?;

        Ok(TransportEndpoint::new(host, username, key_material)
            .with_port(port)
            .with_host_key_policy(self.host_key_policy))
    }
}

/// Split `username@hostname[:port]`. The port defaults to 22.
pub fn parse_bastion(bastion: &str) -> Result<(String, String, u16), ConfigError> {
    let invalid = || ConfigError::InvalidBastion(bastion.to_string());

    let (username, rest) = bastion.split_once('@').ok_or_else(invalid)?;
    if username.is_empty() || rest.contains('@') {
        return Err(invalid());
    }

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (rest, DEFAULT_SSH_PORT),
    };
    if host.is_empty() || port == 0 {
        return Err(invalid());
    }

    Ok((username.to_string(), host.to_string(), port))
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest.trim_start_matches(['/', '\\']));
            }
            tracing::warn!("Could not determine home directory, using {} as-is", path);
        }
    }
    Path::new(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TunnelConfig {
        TunnelConfig::new("ubuntu@bastion.example.com", "~/.ssh/bastion.pem")
            .with_environment("staging", Environment::new("search-staging.internal"))
            .with_environment(
                "production",
                Environment {
                    remote_host: "search-prod.internal".to_string(),
                    remote_port: Some(9200),
                },
            )
    }

    #[test]
    fn test_parse_bastion() {
        assert_eq!(
            parse_bastion("ubuntu@12.34.56.78").unwrap(),
            ("ubuntu".to_string(), "12.34.56.78".to_string(), 22)
        );
        assert_eq!(
            parse_bastion("ec2-user@bastion.example.com:2222").unwrap(),
            (
                "ec2-user".to_string(),
                "bastion.example.com".to_string(),
                2222
            )
        );

        for bad in ["bastion.example.com", "@host", "user@", "a@b@c", "user@host:ssh", "user@host:0"] {
            assert!(
                matches!(parse_bastion(bad), Err(ConfigError::InvalidBastion(_))),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/.ssh/key.pem"), home.join(".ssh/key.pem"));
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("/etc/key.pem"), PathBuf::from("/etc/key.pem"));
        assert_eq!(expand_tilde("~other/key"), PathBuf::from("~other/key"));
    }

    #[test]
    fn test_environment_lookup() {
        let config = sample();
        assert_eq!(config.environment_names(), vec!["production", "staging"]);

        let staging = config.environment("staging").unwrap();
        assert_eq!(staging, ForwardTarget::new("search-staging.internal", 443));
        let prod = config.environment("production").unwrap();
        assert_eq!(prod.remote_port, 9200);

        match config.environment("dev") {
            Err(ConfigError::UnknownEnvironment { name, available }) => {
                assert_eq!(name, "dev");
                assert_eq!(available, vec!["production", "staging"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_defaults_when_fields_missing() {
        let json = r#"{
            "bastion_host": "ubuntu@bastion",
            "key_path": "~/.ssh/key.pem",
            "environments": { "staging": { "opensearch_host": "search.internal" } }
        }"#;
        let config: TunnelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.local_port, 5602);
        assert_eq!(config.remote_port, 443);
        assert_eq!(config.host_key_policy, HostKeyPolicy::Strict);
        assert_eq!(config.environments["staging"].remote_host, "search.internal");
    }

    #[tokio::test]
    async fn test_endpoint_reads_key() {
        let temp = tempfile::tempdir().unwrap();
        let key_path = temp.path().join("key.pem");
        tokio::fs::write(&key_path, b"key bytes").await.unwrap();

        let mut config = sample();
        config.bastion_host = "ubuntu@bastion.example.com:2200".to_string();
        config.key_path = key_path.to_string_lossy().into_owned();
        config.host_key_policy = HostKeyPolicy::AcceptNew;

        let endpoint = config.endpoint().await.unwrap();
        assert_eq!(endpoint.host, "bastion.example.com");
        assert_eq!(endpoint.port, 2200);
        assert_eq!(endpoint.username, "ubuntu");
        assert_eq!(endpoint.key_material.as_slice(), b"key bytes");
        assert_eq!(endpoint.host_key_policy, HostKeyPolicy::AcceptNew);

        config.key_path = temp.path().join("missing.pem").to_string_lossy().into_owned();
        assert!(matches!(
            config.endpoint().await,
            Err(ConfigError::KeyUnreadable { .. })
        ));
    }
}
