//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, configuration loading, share file
//! parsing, and response printing.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aegis_service::{AegisConfig, ServiceResponse};
use aegis_vault::Share;
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// Console output goes to stderr so stdout carries only command results.
/// With `log_file` set, events are also appended to that file without ANSI
/// colors; `get_recent_logs` reads it back.
pub fn init_tracing(default_level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load and validate the configuration at `path` (defaults if absent).
pub fn load_config(path: &Path) -> Result<AegisConfig> {
    let config = AegisConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Describe where the configuration came from, for logging once tracing is
/// installed.
pub fn config_source(path: &Path) -> String {
    if path.is_file() {
        format!("configuration loaded from {}", path.display())
    } else {
        format!("no configuration file at {}; using defaults", path.display())
    }
}

// ---------------------------------------------------------------------------
// Shares
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum ShareFile {
    One(Share),
    Many(Vec<Share>),
}

/// Read every share in `files`.
///
/// A file holds either one share object or a list of them, as printed by
/// `set-mnemonic`.
pub fn read_share_files(files: &[PathBuf]) -> Result<Vec<Share>> {
    let mut shares = Vec::new();
    for path in files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let parsed: ShareFile = serde_json::from_str(&text)
            .with_context(|| format!("{} does not hold a share", path.display()))?;
        match parsed {
            ShareFile::One(share) => shares.push(share),
            ShareFile::Many(list) => shares.extend(list),
        }
    }
    Ok(shares)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Print `response` as pretty JSON; a refused request becomes an error.
pub fn print_response(response: &ServiceResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if !response.success {
        anyhow::bail!(
            "service refused the request ({}): {}",
            response.status_code,
            response.error_message.as_deref().unwrap_or("no message")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shares() -> Vec<Share> {
        aegis_vault::shamir::split(b"correct horse battery staple", 2, 3).unwrap()
    }

    #[test]
    fn share_files_accept_one_or_many() {
        let dir = tempfile::tempdir().unwrap();
        let shares = shares();

        let single = dir.path().join("one.json");
        std::fs::write(&single, serde_json::to_string(&shares[0]).unwrap()).unwrap();
        let list = dir.path().join("list.json");
        std::fs::write(&list, serde_json::to_string(&shares[1..]).unwrap()).unwrap();

        let read = read_share_files(&[single, list]).unwrap();
        assert_eq!(read, shares);
    }

    #[test]
    fn share_files_reject_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"hello": "world"}"#).unwrap();

        assert!(read_share_files(&[path]).is_err());
        assert!(read_share_files(&[dir.path().join("missing.json")]).is_err());
    }

    #[test]
    fn missing_config_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("aegis.toml")).unwrap();
        assert_eq!(config, AegisConfig::default());
    }

    #[test]
    fn config_source_reports_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis.toml");
        assert!(config_source(&path).contains("using defaults"));

        std::fs::write(&path, "[service]\nallow_dev_bypass_unlock = false\n").unwrap();
        assert!(config_source(&path).starts_with("configuration loaded from"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis.toml");
        std::fs::write(&path, "[vault]\nshare_count = 2\nrecovery_threshold = 3\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn refused_response_is_an_error() {
        let refused = ServiceResponse::failure(aegis_service::Status::Locked, "device is locked");
        assert!(print_response(&refused).is_err());
        assert!(print_response(&ServiceResponse::ok(serde_json::json!({}))).is_ok());
    }
}
