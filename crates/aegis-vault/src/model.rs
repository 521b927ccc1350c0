//! Persisted, non-secret vault records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::shamir;

/// Version string written into new metadata records.
pub const CONFIG_VERSION: &str = "1.0.0";

/// Device metadata, stored in plaintext as `device.json`.
///
/// Created once on first vault touch and never rewritten by the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetadata {
    /// Stable identifier for the life of the data directory.
    pub device_id: String,
    /// Number of shares produced (M).
    pub share_count: u8,
    /// Shares required for reconstruction (N).
    pub recovery_threshold: u8,
    /// Governance approvals required for an unlock.
    pub governance_quorum: u32,
    /// Unlock window length in minutes.
    pub unlock_window_minutes: u32,
    /// Format version of this record.
    #[serde(default = "default_config_version")]
    pub config_version: String,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
}

fn default_config_version() -> String {
    CONFIG_VERSION.to_owned()
}

impl DeviceMetadata {
    /// Build first-run metadata from configuration.
    ///
    /// Generates a UUIDv7 device id unless one is configured; quorum and
    /// window are clamped to at least one.
    pub fn from_config(config: &VaultConfig, now: DateTime<Utc>) -> Result<Self> {
        config.validate()?;

        let device_id = match &config.device_id {
            Some(id) => id.trim().to_owned(),
            None => uuid::Uuid::now_v7().simple().to_string(),
        };

        Ok(Self {
            device_id,
            share_count: config.share_count,
            recovery_threshold: config.recovery_threshold,
            governance_quorum: config.governance_quorum.max(1),
            unlock_window_minutes: config.unlock_window_minutes.max(1),
            config_version: default_config_version(),
            created_at: now,
        })
    }

    /// Check the record's invariants after loading it from disk.
    pub fn validate(&self) -> Result<()> {
        shamir::validate_parameters(self.recovery_threshold, self.share_count)?;
        if self.device_id.is_empty() {
            return Err(VaultError::configuration("device metadata has no device id"));
        }
        if self.governance_quorum == 0 || self.unlock_window_minutes == 0 {
            return Err(VaultError::configuration(
                "governance quorum and unlock window must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_generates_id_and_clamps() {
        let cfg = VaultConfig::default()
            .with_governance_quorum(0)
            .with_unlock_window_minutes(0);
        let meta = DeviceMetadata::from_config(&cfg, Utc::now()).unwrap();
        assert_eq!(meta.device_id.len(), 32);
        assert_eq!(meta.governance_quorum, 1);
        assert_eq!(meta.unlock_window_minutes, 1);
        assert_eq!(meta.config_version, CONFIG_VERSION);
        assert!(meta.validate().is_ok());
    }

    #[test]
    fn configured_device_id_is_used() {
        let cfg = VaultConfig::default().with_device_id(" treasury-1 ");
        let meta = DeviceMetadata::from_config(&cfg, Utc::now()).unwrap();
        assert_eq!(meta.device_id, "treasury-1");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = VaultConfig::default().with_shares(1, 2);
        assert!(DeviceMetadata::from_config(&cfg, Utc::now()).is_err());
    }

    #[test]
    fn json_is_camel_case() {
        let meta = DeviceMetadata::from_config(&VaultConfig::default(), Utc::now()).unwrap();
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("deviceId").is_some());
        assert!(json.get("recoveryThreshold").is_some());
        assert!(json.get("unlockWindowMinutes").is_some());
        assert!(json.get("configVersion").is_some());
    }
}
