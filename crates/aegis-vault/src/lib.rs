//! Genesis secret vault for Aegis.
//!
//! This crate protects a single BIP-39 recovery phrase at rest on one host.
//! The phrase is sealed with AES-256-GCM under a master key, the master key
//! is itself wrapped by a host-bound protector, and the phrase can be split
//! into Shamir shares for out-of-band recovery.
//!
//! # Modules
//!
//! - [`crypto`] -- AES-256-GCM envelopes and the system CSPRNG.
//! - [`keychain`] -- host-bound protection of the master key.
//! - [`shamir`] -- threshold secret sharing over GF(256).
//! - [`mnemonic`] -- twelve-word BIP-39 generation and validation.
//! - [`genesis`] -- the vault itself: metadata, envelope and shares.
//! - [`storage`] -- atomic write-temp-then-rename persistence.
//! - [`model`] -- persisted device metadata.
//! - [`config`] -- vault configuration.
//! - [`error`] -- unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use aegis_vault::{EphemeralProtector, GenesisVault, VaultConfig};
//!
//! # async fn example() -> aegis_vault::Result<()> {
//! let vault = GenesisVault::new(
//!     VaultConfig::new("data").with_shares(5, 3),
//!     Box::new(EphemeralProtector::new()?),
//! )?;
//!
//! let shares = vault
//!     .set_mnemonic("legal winner thank year wave sausage worth useful legal winner thank yellow")
//!     .await?;
//! assert_eq!(shares.len(), 5);
//!
//! let phrase = aegis_vault::recover_mnemonic(&shares[..3], 3)?;
//! assert!(phrase.starts_with("legal"));
//! # Ok(())
//! # }
//! ```

mod codec;

pub mod config;
pub mod crypto;
pub mod error;
pub mod genesis;
pub mod keychain;
pub mod mnemonic;
pub mod model;
pub mod shamir;
pub mod storage;

// Re-export the most commonly used types at the crate root for convenience.
pub use config::VaultConfig;
pub use crypto::Envelope;
pub use error::{ErrorKind, Result, VaultError};
pub use genesis::{GenesisVault, recover_mnemonic};
pub use keychain::{
    EphemeralProtector, KeyProtector, MachineBoundProtector, ProtectedKeyStore, platform_protector,
};
pub use model::DeviceMetadata;
pub use shamir::Share;
