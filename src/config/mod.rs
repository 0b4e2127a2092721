//! Configuration Management Module
//!
//! Persistent tunnel configuration: the bastion, the key to log in with and
//! the named environments that can be forwarded to.

pub mod storage;
pub mod types;

pub use storage::{config_dir, config_file, ConfigError, ConfigStorage};
pub use types::{expand_tilde, parse_bastion, Environment, TunnelConfig};
