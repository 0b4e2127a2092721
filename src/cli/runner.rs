//! CLI runner
//!
//! Drives one tunnel from configuration to Ctrl+C.

use std::future::Future;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use super::prompt::{choose_environment, prompt};
use super::Cli;
use crate::config::{parse_bastion, ConfigError, ConfigStorage, Environment, TunnelConfig};
use crate::forwarding::{ForwardingSession, LocalForward};
use crate::launcher;
use crate::lifecycle::{shutdown_signal, LifecycleController, ShutdownReason};
use crate::ssh;

/// Environments prompted for when a config is created without `--target`
const DEFAULT_ENVIRONMENTS: [&str; 2] = ["staging", "production"];

/// Run the tunnel until interrupted.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or created, the
/// bastion cannot be reached or authenticated against, the local port cannot
/// be bound, or the bastion connection is lost while the tunnel is up.
pub async fn run(cli: Cli) -> Result<()> {
    let storage = match &cli.config {
        Some(path) => ConfigStorage::with_path(path.clone()),
        None => ConfigStorage::new()?,
    };

    let config = load_or_create(&cli, &storage).await?;

    let environment = match &cli.environment {
        Some(name) => name.clone(),
        None => {
            let stdin = io::stdin();
            choose_environment(&mut stdin.lock(), &mut io::stdout(), &config.environment_names())?
        }
    };
    let target = config.environment(&environment)?;
    let endpoint = config.endpoint().await?;

    println!("Establishing SSH tunnel to {} environment...", environment);
    let transport = ssh::connect(&endpoint)
        .await
        .with_context(|| format!("Failed to connect to bastion {}", endpoint.address()))?;

    let controller = LifecycleController::start(
        Arc::new(transport),
        LocalForward::new(config.local_port, target),
    )
    .await
    .context("Failed to start SSH tunnel")?;

    let startup = announce(controller.forwarding(), &cli.url_path, cli.no_browser);
    let reason = serve_with_startup(&controller, startup, shutdown_signal()).await;
    let stats = controller.forwarding().stats();
    info!(
        "Forwarded {} connections ({} bytes sent, {} bytes received, {} failed dials)",
        stats.connection_count, stats.bytes_sent, stats.bytes_received, stats.failed_dials
    );

    if reason == ShutdownReason::TransportLost {
        bail!("Connection to bastion lost");
    }
    println!("SSH tunnel closed");
    Ok(())
}

/// Readiness check, browser and status lines, once the listener is up
async fn announce(forwarding: &ForwardingSession, url_path: &str, no_browser: bool) {
    if !forwarding.wait_ready().await {
        warn!("Tunnel readiness could not be confirmed, continuing");
    }

    let url = format!("https://localhost:{}{}", forwarding.local_port(), url_path);
    if no_browser {
        println!("Tunnel available at {}", url);
    } else {
        println!("Opening browser to {}", url);
        launcher::open_url(&url);
    }

    println!("SSH tunnel established. Press Ctrl+C to close the tunnel and exit");
}

/// Serve while `startup` runs, so an interrupt during startup still goes
/// through the normal shutdown.
async fn serve_with_startup<S, I>(
    controller: &LifecycleController,
    startup: S,
    interrupt: I,
) -> ShutdownReason
where
    S: Future<Output = ()>,
    I: Future<Output = ()>,
{
    let run = controller.run_until(interrupt);
    tokio::pin!(run);

    tokio::select! {
        reason = &mut run => return reason,
        () = startup => {}
    }
    run.await
}

/// Load the saved config, or build one from flags and prompts and save it.
/// Port and host key flags override the file.
async fn load_or_create(cli: &Cli, storage: &ConfigStorage) -> Result<TunnelConfig> {
    if storage.exists().await {
        let mut config = storage.load().await.with_context(|| {
            format!("Error reading config file {}", storage.path().display())
        })?;
        apply_overrides(cli, &mut config);
        return Ok(config);
    }

    println!("Creating new configuration file...");
    let mut config = {
        let stdin = io::stdin();
        new_config(cli, &mut stdin.lock(), &mut io::stdout())?
    };
    apply_overrides(cli, &mut config);

    storage
        .save(&config)
        .await
        .with_context(|| format!("Error writing config file {}", storage.path().display()))?;
    println!("Configuration saved to {}", storage.path().display());
    Ok(config)
}

fn apply_overrides(cli: &Cli, config: &mut TunnelConfig) {
    if let Some(port) = cli.local_port {
        config.local_port = port;
    }
    if let Some(port) = cli.remote_port {
        config.remote_port = port;
    }
    if let Some(policy) = cli.host_key_policy {
        config.host_key_policy = policy;
    }
}

/// Build a new config from flags, prompting for whatever is missing
pub fn new_config<R: BufRead, W: Write>(
    cli: &Cli,
    input: &mut R,
    output: &mut W,
) -> Result<TunnelConfig, ConfigError> {
    let bastion = match &cli.bastion {
        Some(bastion) => bastion.clone(),
        None => prompt(input, output, "Enter bastion host (e.g., ubuntu@12.34.56.78): ")?,
    };
    parse_bastion(&bastion)?;

    let key = match &cli.key {
        Some(key) => key.clone(),
        None => prompt(input, output, "Enter SSH key path (e.g., ~/.ssh/key.pem): ")?,
    };

    let mut config = TunnelConfig::new(bastion, key);

    if cli.targets.is_empty() {
        for name in DEFAULT_ENVIRONMENTS {
            let host = prompt(
                input,
                output,
                &format!("Enter remote host for {} environment: ", name),
            )?;
            if !host.is_empty() {
                config.environments.insert(name.to_string(), Environment::new(host));
            }
        }
    } else {
        for (name, host) in &cli.targets {
            config
                .environments
                .insert(name.clone(), Environment::new(host.clone()));
        }
    }

    if config.environments.is_empty() {
        return Err(ConfigError::NoEnvironments);
    }
    Ok(config)
}
