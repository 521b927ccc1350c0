//! CLI entry point for Aegis.
//!
//! This binary provides the `aegis` command: `serve` runs the vault service,
//! the client subcommands send one request each to a running service, and
//! `recover` rebuilds the phrase from share files without any service.

mod cli;
mod helpers;

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;

use aegis_service::{
    AegisConfig, Dispatcher, Endpoint, GovernanceGate, ServiceClient, ServiceServer,
};
use aegis_vault::GenesisVault;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = helpers::load_config(&cli.config)?;
    if !matches!(cli.command, Commands::Serve) {
        helpers::init_tracing("warn", None)?;
        info!("{}", helpers::config_source(&cli.config));
    }

    let client = ServiceClient::from_config(&config.service);
    let response = match cli.command {
        Commands::Serve => return cmd_serve(config, &cli.config).await,
        Commands::Recover { threshold, files } => {
            let threshold = threshold.unwrap_or(config.vault.recovery_threshold);
            return cmd_recover(threshold, &files);
        }
        Commands::Ping => client.ping().await,
        Commands::DeviceInfo => client.get_device_info().await,
        Commands::HasMnemonic => client.has_mnemonic().await,
        Commands::GetMnemonic => client.get_mnemonic().await,
        Commands::SetMnemonic { mnemonic } => {
            let phrase = match mnemonic {
                Some(phrase) => phrase,
                None => read_phrase_from_stdin()?,
            };
            client.set_mnemonic(&phrase).await
        }
        Commands::DeleteMnemonic => client.delete_mnemonic().await,
        Commands::UnlockDev { minutes } => client.unlock_for_development(minutes).await,
        Commands::Lock => client.lock().await,
        Commands::Status => client.get_lock_status().await,
        Commands::Logs { limit } => client.get_recent_logs(limit).await,
    }
    .context("failed to reach the vault service")?;

    helpers::print_response(&response)
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(config: AegisConfig, config_path: &Path) -> Result<()> {
    helpers::init_tracing("info", Some(&config.service.log_file))?;
    info!(version = env!("CARGO_PKG_VERSION"), "starting aegis service");
    info!("{}", helpers::config_source(config_path));

    let vault = GenesisVault::open(config.vault.clone()).context("failed to open the vault")?;
    let device = vault
        .device_info()
        .await
        .context("failed to read device metadata")?;
    info!(
        device_id = %device.device_id,
        shares = device.share_count,
        threshold = device.recovery_threshold,
        "vault ready"
    );

    if config.service.allow_dev_bypass_unlock {
        warn!("development unlock is enabled; do not run this way in production");
    }

    let gate = Arc::new(GovernanceGate::default());
    let dispatcher = Dispatcher::new(vault, gate, config.service.clone());
    let endpoint = Endpoint::from_config(&config.service);
    let server = ServiceServer::bind(dispatcher, endpoint)
        .await
        .context("failed to bind the service endpoint")?;

    server
        .serve(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => error!(error = %e, "cannot listen for Ctrl-C; stopping"),
            }
        })
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: recover
// ---------------------------------------------------------------------------

fn cmd_recover(threshold: u8, files: &[std::path::PathBuf]) -> Result<()> {
    let shares = helpers::read_share_files(files)?;
    info!(shares = shares.len(), threshold, "recovering phrase from shares");

    let phrase = aegis_vault::recover_mnemonic(&shares, threshold)
        .context("shares did not recover a phrase")?;
    println!("{}", phrase.as_str());
    Ok(())
}

fn read_phrase_from_stdin() -> Result<String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read the phrase from stdin")?;
    Ok(line.trim().to_owned())
}
