//! Vault configuration.
//!
//! [`VaultConfig`] is the `[vault]` section of the service configuration
//! file.  Defaults match a five-share, three-of-five deployment with a
//! fifteen-minute unlock window.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::shamir;

/// Settings for one genesis vault data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding `device.json`, `genesis.enc`, `shares.json` and
    /// `master.key`.
    pub data_directory: PathBuf,

    /// Number of shares to produce (M).
    pub share_count: u8,

    /// Shares required to reconstruct (N).
    pub recovery_threshold: u8,

    /// Governance approvals required for an unlock.
    pub governance_quorum: u32,

    /// Length of a governance unlock window, in minutes.
    pub unlock_window_minutes: u32,

    /// Externally assigned device id; a fresh one is generated when absent.
    pub device_id: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data"),
            share_count: 5,
            recovery_threshold: 3,
            governance_quorum: 2,
            unlock_window_minutes: 15,
            device_id: None,
        }
    }
}

impl VaultConfig {
    /// Create a configuration with default values rooted at `data_directory`.
    pub fn new(data_directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: data_directory.into(),
            ..Self::default()
        }
    }

    /// Set the share count and recovery threshold.
    pub fn with_shares(mut self, share_count: u8, recovery_threshold: u8) -> Self {
        self.share_count = share_count;
        self.recovery_threshold = recovery_threshold;
        self
    }

    /// Set the governance quorum.
    pub fn with_governance_quorum(mut self, quorum: u32) -> Self {
        self.governance_quorum = quorum;
        self
    }

    /// Set the unlock window length.
    pub fn with_unlock_window_minutes(mut self, minutes: u32) -> Self {
        self.unlock_window_minutes = minutes;
        self
    }

    /// Pin the device id instead of generating one.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Check the threshold invariants.
    ///
    /// Quorum and window are not rejected here; they are clamped to at least
    /// one when metadata is first written.
    pub fn validate(&self) -> Result<()> {
        shamir::validate_parameters(self.recovery_threshold, self.share_count)?;
        if let Some(id) = &self.device_id {
            if id.trim().is_empty() {
                return Err(VaultError::configuration("device id must not be blank"));
            }
        }
        Ok(())
    }
}
