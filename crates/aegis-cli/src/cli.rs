//! CLI argument definitions for Aegis.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Aegis -- genesis vault for a treasury recovery phrase.
#[derive(Parser)]
#[command(
    name = "aegis",
    version,
    about = "Aegis -- genesis vault for a treasury recovery phrase",
    long_about = "Runs the host-local vault service, talks to a running service, and \
                  recovers a phrase offline from exported shares."
)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, short, global = true, env = "AEGIS_CONFIG", default_value = "aegis.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the vault service in the foreground until Ctrl-C.
    Serve,

    /// Check that the service answers.
    Ping,

    /// Show the device metadata.
    DeviceInfo,

    /// Report whether a genesis phrase is stored.
    HasMnemonic,

    /// Print the genesis phrase (requires an unlocked window).
    GetMnemonic,

    /// Store a genesis phrase and print its recovery shares.
    SetMnemonic {
        /// The phrase. Read from stdin when omitted.
        mnemonic: Option<String>,
    },

    /// Delete the stored phrase and its shares (requires an unlocked window).
    DeleteMnemonic,

    /// Open a development unlock window, if the service allows it.
    UnlockDev {
        /// Window length in minutes; the service default when omitted.
        #[arg(long, short)]
        minutes: Option<i64>,
    },

    /// Close the unlock window now.
    Lock,

    /// Show whether the vault is unlocked and until when.
    Status,

    /// Show the tail of the service log.
    Logs {
        /// Number of lines.
        #[arg(long, short)]
        limit: Option<i64>,
    },

    /// Reconstruct the phrase offline from share files.
    Recover {
        /// Shares required; the configured recovery threshold when omitted.
        #[arg(long, short)]
        threshold: Option<u8>,

        /// JSON files holding one share or a list of shares.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}
