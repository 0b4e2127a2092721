//! Configuration Storage
//!
//! Handles reading/writing the configuration file to disk.
//! Config location: <config dir>/bastion-tunnel/config.json
//! (~/.config on Linux, ~/Library/Application Support on macOS, %APPDATA% on Windows)

use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::TunnelConfig;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid bastion host '{0}'. Expected format: username@hostname[:port]")]
    InvalidBastion(String),

    #[error("Invalid environment: {name}. Available environments: {}", available.join(", "))]
    UnknownEnvironment { name: String, available: Vec<String> },

    #[error("No environments found in config file")]
    NoEnvironments,

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Unable to read private key {}: {source}", path.display())]
    KeyUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Get the configuration directory
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("bastion-tunnel"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Get the config file path
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json"))
}

/// Configuration storage manager
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Create a new storage manager with default path
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            path: config_file()?,
        })
    }

    /// Create storage manager with custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Ensure the config directory exists
    async fn ensure_dir(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Load configuration from disk
    pub async fn load(&self) -> Result<TunnelConfig, ConfigError> {
        let contents = fs::read_to_string(&self.path).await?;
        let config = serde_json::from_str::<TunnelConfig>(&contents)?;
        tracing::debug!(
            "Loaded config from {:?} ({} environments)",
            self.path,
            config.environments.len()
        );
        Ok(config)
    }

    /// Save configuration to disk
    pub async fn save(&self, config: &TunnelConfig) -> Result<(), ConfigError> {
        self.ensure_dir().await?;

        // Write to temp file first, then rename (atomic write)
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(config)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }

    /// Check if config file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Get config file path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_nonexistent() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("config.json"));

        assert!(!storage.exists().await);
        assert!(matches!(storage.load().await, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("config.json");
        let storage = ConfigStorage::with_path(path);

        let config = TunnelConfig::new("ubuntu@12.34.56.78", "~/.ssh/key.pem")
            .with_environment("staging", Environment::new("search-staging.internal"));
        storage.save(&config).await.unwrap();
        assert!(storage.exists().await);

        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_corrupted() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, "bastion_host: ubuntu@host\n").await.unwrap();

        let storage = ConfigStorage::with_path(path);
        assert!(matches!(storage.load().await, Err(ConfigError::Json(_))));
    }
}
