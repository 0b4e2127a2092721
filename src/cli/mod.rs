//! Command-line front end
//!
//! Loads (or interactively creates) the tunnel configuration, picks an
//! environment, opens the tunnel and waits for Ctrl+C.

pub mod prompt;
mod runner;

use std::path::PathBuf;

use clap::Parser;

use crate::ssh::HostKeyPolicy;

pub use runner::{new_config, run};

/// Bastion Tunnel - forward a local port to a service behind an SSH bastion
#[derive(Parser, Debug)]
#[command(name = "bastion-tunnel")]
#[command(about = "Forward a local port to a service behind an SSH bastion host")]
#[command(version)]
#[command(after_help = "EXAMPLES:
    # Pick an environment from the configured list
    bastion-tunnel

    # Open the staging tunnel without prompting
    bastion-tunnel -e staging

    # First run: create the config from flags
    bastion-tunnel --bastion ubuntu@12.34.56.78 --key ~/.ssh/key.pem \\
        --target staging=search-staging.internal --target production=search-prod.internal")]
pub struct Cli {
    /// Environment to connect to (prompted for when omitted)
    #[arg(short, long)]
    pub environment: Option<String>,

    /// Bastion host as username@hostname[:port] (used when creating the config)
    #[arg(long)]
    pub bastion: Option<String>,

    /// Private key path (used when creating the config)
    #[arg(long)]
    pub key: Option<String>,

    /// Environment target as NAME=HOST, repeatable (used when creating the config)
    #[arg(long = "target", value_name = "NAME=HOST", value_parser = parse_target)]
    pub targets: Vec<(String, String)>,

    /// Local port to listen on
    #[arg(long)]
    pub local_port: Option<u16>,

    /// Remote service port
    #[arg(long)]
    pub remote_port: Option<u16>,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host key verification: strict, accept-new or insecure
    #[arg(long)]
    pub host_key_policy: Option<HostKeyPolicy>,

    /// Do not open a browser once the tunnel is up
    #[arg(long)]
    pub no_browser: bool,

    /// Path appended to the local URL opened in the browser
    #[arg(long, default_value = "/_dashboards/")]
    pub url_path: String,
}

fn parse_target(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, host)) if !name.is_empty() && !host.is_empty() => {
            Ok((name.to_string(), host.to_string()))
        }
        _ => Err(format!("expected NAME=HOST, got '{}'", s)),
    }
}
