//! The genesis vault: metadata, the encrypted mnemonic, and its shares.
//!
//! [`GenesisVault`] is a cheap, clonable handle.  All operations are funneled
//! through one exclusive async lock, and the file and crypto work for each
//! operation runs on a blocking worker thread while the lock is held.
//!
//! ## On-disk layout
//!
//! | File          | Contents                                          |
//! |---------------|---------------------------------------------------|
//! | `device.json` | [`DeviceMetadata`], plaintext                     |
//! | `genesis.enc` | [`Envelope`] of the mnemonic under the master key |
//! | `shares.json` | [`Envelope`] of the share list under the master key |
//! | `master.key`  | host-protected master key blob                    |
//!
//! `genesis.enc` is the commit point for a new secret: it is written last
//! and with create-new semantics, so it is never overwritten.
//!
//! ## Cancellation
//!
//! Dropping an operation's future releases the lock once the in-flight
//! worker finishes.  Every write is an atomic rename, so a cancelled
//! operation leaves either the previous files or the complete new ones.
//!
//! One data directory must be owned by one process.  Nothing here
//! coordinates access between processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::crypto::{self, Envelope};
use crate::error::{Result, VaultError};
use crate::keychain::{self, KeyProtector, ProtectedKeyStore};
use crate::mnemonic;
use crate::model::DeviceMetadata;
use crate::shamir::{self, Share};
use crate::storage::{self, WriteMode};

/// Metadata file name.
pub const METADATA_FILE: &str = "device.json";
/// Encrypted mnemonic file name.
pub const ENVELOPE_FILE: &str = "genesis.enc";
/// Encrypted share list file name.
pub const SHARES_FILE: &str = "shares.json";
/// Protected master key file name.
pub const KEY_FILE: &str = "master.key";

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to the genesis vault of one data directory.
#[derive(Clone)]
pub struct GenesisVault {
    inner: Arc<Mutex<VaultState>>,
}

impl std::fmt::Debug for GenesisVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenesisVault").finish_non_exhaustive()
    }
}

impl GenesisVault {
    /// Open the vault described by `config`, protecting the master key with
    /// `protector`.
    ///
    /// No file is touched until the first operation.
    pub fn new(config: VaultConfig, protector: Box<dyn KeyProtector>) -> Result<Self> {
        config.validate()?;
        let dir = config.data_directory.clone();
        let keys = ProtectedKeyStore::new(dir.join(KEY_FILE), protector);

        tracing::info!(
            share_count = config.share_count,
            recovery_threshold = config.recovery_threshold,
            "genesis vault configured"
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(VaultState { config, dir, keys })),
        })
    }

    /// Open the vault with the platform's host-bound protector.
    pub fn open(config: VaultConfig) -> Result<Self> {
        Self::new(config, keychain::platform_protector()?)
    }

    /// Run `op` with exclusive access to the vault state on a blocking thread.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut VaultState) -> Result<T> + Send + 'static,
    {
        let mut guard = self.inner.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || op(&mut *guard))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "vault worker did not complete");
                VaultError::storage("vault worker did not complete")
            })?
    }

    /// Return the stored mnemonic, generating and persisting one if absent.
    pub async fn get_or_create_mnemonic(&self) -> Result<Zeroizing<String>> {
        self.run(|state| state.get_or_create_mnemonic()).await
    }

    /// Return the stored mnemonic, or `None` if no secret exists.
    pub async fn try_get_mnemonic(&self) -> Result<Option<Zeroizing<String>>> {
        self.run(|state| state.try_get_mnemonic()).await
    }

    /// Store `phrase` as the genesis secret and return its fresh shares.
    ///
    /// # Errors
    ///
    /// [`VaultError::Conflict`] if a secret already exists (checked before
    /// the input is looked at), [`VaultError::Validation`] for a phrase that
    /// is not a twelve-word BIP-39 mnemonic.
    pub async fn set_mnemonic(&self, phrase: impl Into<String>) -> Result<Vec<Share>> {
        let phrase = Zeroizing::new(phrase.into());
        self.run(move |state| state.set_mnemonic(&phrase)).await
    }

    /// Whether a secret exists.  Does not decrypt anything.
    pub async fn has_mnemonic(&self) -> Result<bool> {
        self.run(|state| Ok(state.envelope_path().exists())).await
    }

    /// Return the cached shares, creating the secret and shares if needed.
    pub async fn get_or_create_shares(&self) -> Result<Vec<Share>> {
        self.run(|state| state.get_or_create_shares()).await
    }

    /// Remove the secret and its shares.  Metadata and the master key stay.
    ///
    /// Returns whether a secret was present.
    pub async fn delete_mnemonic(&self) -> Result<bool> {
        self.run(|state| state.delete_mnemonic()).await
    }

    /// Return the device metadata, creating it on first call.
    pub async fn device_info(&self) -> Result<DeviceMetadata> {
        self.run(|state| state.metadata()).await
    }
}

/// Reconstruct a mnemonic from exported shares and validate it.
///
/// Used for offline recovery; needs no vault or master key.
pub fn recover_mnemonic(shares: &[Share], threshold: u8) -> Result<Zeroizing<String>> {
    let bytes = shamir::reconstruct(shares, threshold)?;
    let phrase = std::str::from_utf8(&bytes)
        .map_err(|_| VaultError::validation("shares do not reconstruct a mnemonic"))?;
    mnemonic::normalize(phrase)
        .map_err(|_| VaultError::validation("shares do not reconstruct a mnemonic"))
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// State owned by the vault lock.
struct VaultState {
    config: VaultConfig,
    dir: PathBuf,
    keys: ProtectedKeyStore,
}

impl VaultState {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn envelope_path(&self) -> PathBuf {
        self.path(ENVELOPE_FILE)
    }

    fn master_key(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.keys.get_or_create_key(crypto::KEY_LEN)
    }

    // -- Metadata -----------------------------------------------------------

    fn metadata(&self) -> Result<DeviceMetadata> {
        let path = self.path(METADATA_FILE);
        if let Some(meta) = storage::read_json::<DeviceMetadata>(&path)? {
            meta.validate()?;
            return Ok(meta);
        }

        let meta = DeviceMetadata::from_config(&self.config, Utc::now())?;
        match storage::write_json(&path, &meta, WriteMode::CreateNew) {
            Ok(()) => {
                tracing::info!(device_id = %meta.device_id, "created device metadata");
                Ok(meta)
            }
            Err(VaultError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                storage::read_json::<DeviceMetadata>(&path)?
                    .ok_or_else(|| VaultError::storage("device metadata vanished during read"))
            }
            Err(e) => Err(e),
        }
    }

    // -- Mnemonic -----------------------------------------------------------

    fn read_envelope(&self, path: &Path) -> Result<Option<Envelope>> {
        match storage::read_json::<Envelope>(path) {
            Err(VaultError::Serialization(_)) => Err(VaultError::Integrity),
            other => other,
        }
    }

    fn try_get_mnemonic(&self) -> Result<Option<Zeroizing<String>>> {
        let Some(envelope) = self.read_envelope(&self.envelope_path())? else {
            return Ok(None);
        };

        let key = self.master_key()?;
        let plaintext = crypto::decrypt(&envelope, &key)?;
        let phrase = std::str::from_utf8(&plaintext).map_err(|_| VaultError::Integrity)?;
        Ok(Some(Zeroizing::new(phrase.to_owned())))
    }

    fn get_or_create_mnemonic(&self) -> Result<Zeroizing<String>> {
        if let Some(phrase) = self.try_get_mnemonic()? {
            return Ok(phrase);
        }

        self.metadata()?;
        let phrase = mnemonic::generate()?;
        let key = self.master_key()?;
        self.commit_envelope(&phrase, &key)?;

        tracing::info!("generated genesis mnemonic");
        Ok(phrase)
    }

    fn set_mnemonic(&self, phrase: &str) -> Result<Vec<Share>> {
        if self.envelope_path().exists() {
            return Err(VaultError::Conflict);
        }
        let phrase = mnemonic::normalize(phrase)?;

        let meta = self.metadata()?;
        let key = self.master_key()?;
        let shares = shamir::split(
            phrase.as_bytes(),
            meta.recovery_threshold,
            meta.share_count,
        )?;

        // Shares first; the envelope is the commit point.
        self.write_shares(&shares, &key)?;
        if let Err(e) = self.commit_envelope(&phrase, &key) {
            if let Err(cleanup) = storage::remove_if_exists(&self.path(SHARES_FILE)) {
                tracing::warn!(error = %cleanup, "failed to remove uncommitted shares");
            }
            return Err(e);
        }

        tracing::info!(
            share_count = meta.share_count,
            recovery_threshold = meta.recovery_threshold,
            "stored genesis mnemonic"
        );
        Ok(shares)
    }

    fn commit_envelope(&self, phrase: &str, key: &[u8]) -> Result<()> {
        let envelope = crypto::encrypt(phrase.as_bytes(), key)?;
        match storage::write_json(&self.envelope_path(), &envelope, WriteMode::CreateNew) {
            Err(VaultError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(VaultError::Conflict)
            }
            other => other,
        }
    }

    fn delete_mnemonic(&self) -> Result<bool> {
        let removed = storage::remove_if_exists(&self.envelope_path())?;
        storage::remove_if_exists(&self.path(SHARES_FILE))?;
        if removed {
            tracing::warn!("deleted genesis mnemonic and shares");
        }
        Ok(removed)
    }

    // -- Shares -------------------------------------------------------------

    fn write_shares(&self, shares: &[Share], key: &[u8]) -> Result<()> {
        let plaintext = Zeroizing::new(serde_json::to_vec(shares)?);
        let envelope = crypto::encrypt(&plaintext, key)?;
        storage::write_json(&self.path(SHARES_FILE), &envelope, WriteMode::Replace)
    }

    /// Read the encrypted share list.
    ///
    /// Anything other than an envelope under the master key is rejected, so a
    /// planted list is never served as the custody set.
    fn read_shares(&self, key: &[u8]) -> Result<Option<Vec<Share>>> {
        let Some(envelope) = self.read_envelope(&self.path(SHARES_FILE))? else {
            return Ok(None);
        };
        let plaintext = crypto::decrypt(&envelope, key)?;
        let shares: Vec<Share> =
            serde_json::from_slice(&plaintext).map_err(|_| VaultError::Integrity)?;
        Ok(Some(shares))
    }

    fn get_or_create_shares(&self) -> Result<Vec<Share>> {
        let key = self.master_key()?;

        // Shares without a committed envelope are leftovers and not trusted.
        if self.envelope_path().exists() {
            if let Some(shares) = self.read_shares(&key)? {
                if !shares.is_empty() {
                    return Ok(shares);
                }
            }
        }

        let phrase = self.get_or_create_mnemonic()?;
        let meta = self.metadata()?;
        let shares = shamir::split(
            phrase.as_bytes(),
            meta.recovery_threshold,
            meta.share_count,
        )?;
        self.write_shares(&shares, &key)?;

        tracing::info!(share_count = shares.len(), "created shares");
        Ok(shares)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
