//! Host-bound protection of the vault master key.
//!
//! The master key must never be stored as plaintext on disk.  This module
//! provides a [`KeyProtector`] trait that abstracts over host-scoped
//! protection primitives, and a [`ProtectedKeyStore`] that owns the
//! `master.key` file built on top of one:
//!
//! - [`MachineBoundProtector`] derives a wrapping key from the machine
//!   identity (not the user profile), so a background service can unwrap the
//!   key without an interactive session.
//! - `DpapiProtector` (Windows only) wraps the key with DPAPI in machine
//!   scope.
//! - [`EphemeralProtector`] keeps its wrapping key in memory.  Tests use it as
//!   a reversible stand-in, and a second instance simulates "wrong host".
//!
//! # Security Notes
//!
//! - If the protected blob cannot be unwrapped (host identity changed,
//!   corruption), every dependent secret is unrecoverable.  The store fails
//!   closed with [`VaultError::Storage`]; it never falls back to a default
//!   key.
//! - The key file is written owner-only (mode 0600 on Unix).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ring::hkdf;
use zeroize::Zeroizing;

use crate::crypto::{self, Envelope};
use crate::error::{Result, VaultError};
use crate::storage::{self, WriteMode};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Host-scoped protect/unprotect capability.
///
/// Implementations must be `Send + Sync` so the store can be used from
/// blocking worker threads.
pub trait KeyProtector: Send + Sync {
    /// Wrap `secret` into an opaque blob that only this host can unwrap.
    fn protect(&self, secret: &[u8]) -> Result<Vec<u8>>;

    /// Unwrap a blob produced by [`protect`](Self::protect).
    fn unprotect(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// Seal `secret` under `wrapping_key` and encode the envelope as JSON.
fn wrap(secret: &[u8], wrapping_key: &[u8]) -> Result<Vec<u8>> {
    let envelope = crypto::encrypt(secret, wrapping_key)?;
    Ok(serde_json::to_vec(&envelope)?)
}

fn unwrap_blob(blob: &[u8], wrapping_key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let envelope: Envelope = serde_json::from_slice(blob).map_err(|_| VaultError::Integrity)?;
    crypto::decrypt(&envelope, wrapping_key)
}

// ---------------------------------------------------------------------------
// Machine-bound protector
// ---------------------------------------------------------------------------

/// Application salt for the HKDF extract step.  Changing this invalidates
/// every previously protected master key.
const APP_SALT: &[u8] = b"aegis-vault-machine-binding-v1";

/// HKDF info label for the wrapping key.
const KEY_INFO: &[u8] = b"aegis-master-key-v1";

/// Protector whose wrapping key is derived from the machine identity.
pub struct MachineBoundProtector {
    wrapping_key: Zeroizing<[u8; crypto::KEY_LEN]>,
}

impl MachineBoundProtector {
    /// Bind to the identity of the current host.
    ///
    /// # Errors
    ///
    /// [`VaultError::Storage`] if no machine identity can be determined.
    pub fn from_host() -> Result<Self> {
        let machine_id = machine_identity()
            .ok_or_else(|| VaultError::storage("host identity is unavailable"))?;
        Self::with_machine_id(&machine_id)
    }

    /// Bind to an explicit machine identity string.
    pub fn with_machine_id(machine_id: &str) -> Result<Self> {
        let machine_id = machine_id.trim();
        if machine_id.is_empty() {
            return Err(VaultError::storage("host identity is empty"));
        }

        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, APP_SALT);
        let prk = salt.extract(machine_id.as_bytes());
        let okm = prk
            .expand(&[KEY_INFO], hkdf::HKDF_SHA256)
            .map_err(|_| VaultError::storage("wrapping key derivation failed"))?;

        let mut wrapping_key = Zeroizing::new([0u8; crypto::KEY_LEN]);
        okm.fill(&mut wrapping_key[..])
            .map_err(|_| VaultError::storage("wrapping key derivation failed"))?;

        Ok(Self { wrapping_key })
    }
}

impl KeyProtector for MachineBoundProtector {
    fn protect(&self, secret: &[u8]) -> Result<Vec<u8>> {
        wrap(secret, &self.wrapping_key[..])
    }

    fn unprotect(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        unwrap_blob(blob, &self.wrapping_key[..])
    }
}

/// Read the stable machine identifier for this host.
fn machine_identity() -> Option<String> {
    #[cfg(unix)]
    {
        ["/etc/machine-id", "/var/lib/dbus/machine-id"]
            .iter()
            .filter_map(|p| std::fs::read_to_string(p).ok())
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
    }

    // Windows keys are protected by DPAPI instead; other hosts have no
    // trustworthy identity source and fail closed.
    #[cfg(not(unix))]
    {
        None
    }
}

// ---------------------------------------------------------------------------
// Windows DPAPI protector
// ---------------------------------------------------------------------------

/// Protector backed by Windows DPAPI in machine scope
/// (`CRYPTPROTECT_LOCAL_MACHINE`).
///
/// The blob can be unprotected by any process on this machine, including a
/// service with no interactive user session, and by no other machine.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DpapiProtector;

#[cfg(windows)]
impl KeyProtector for DpapiProtector {
    fn protect(&self, secret: &[u8]) -> Result<Vec<u8>> {
        dpapi::protect(secret)
    }

    fn unprotect(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        dpapi::unprotect(blob)
    }
}

#[cfg(windows)]
mod dpapi {
    use std::ptr;

    use windows_sys::Win32::Foundation::LocalFree;
    use windows_sys::Win32::Security::Cryptography::{
        CRYPT_INTEGER_BLOB, CRYPTPROTECT_LOCAL_MACHINE, CRYPTPROTECT_UI_FORBIDDEN,
        CryptProtectData, CryptUnprotectData,
    };
    use zeroize::{Zeroize, Zeroizing};

    use crate::error::{Result, VaultError};

    /// Secondary entropy bound into every blob.
    const ENTROPY: &[u8] = b"aegis-vault-master-key-v1";

    const FLAGS: u32 = CRYPTPROTECT_LOCAL_MACHINE | CRYPTPROTECT_UI_FORBIDDEN;

    fn input_blob(bytes: &[u8]) -> Result<CRYPT_INTEGER_BLOB> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| VaultError::storage("data too large for DPAPI"))?;
        Ok(CRYPT_INTEGER_BLOB {
            cbData: len,
            pbData: bytes.as_ptr().cast_mut(),
        })
    }

    fn empty_blob() -> CRYPT_INTEGER_BLOB {
        CRYPT_INTEGER_BLOB {
            cbData: 0,
            pbData: ptr::null_mut(),
        }
    }

    /// Copy a DPAPI output buffer, wipe it, and release it.
    fn take_output(output: CRYPT_INTEGER_BLOB) -> Zeroizing<Vec<u8>> {
        if output.pbData.is_null() {
            return Zeroizing::new(Vec::new());
        }
        // SAFETY: on success DPAPI returns a LocalAlloc buffer of exactly
        // `cbData` bytes that the caller owns until `LocalFree`.
        unsafe {
            let raw = std::slice::from_raw_parts_mut(output.pbData, output.cbData as usize);
            let bytes = Zeroizing::new(raw.to_vec());
            raw.zeroize();
            LocalFree(output.pbData.cast());
            bytes
        }
    }

    pub(super) fn protect(secret: &[u8]) -> Result<Vec<u8>> {
        let input = input_blob(secret)?;
        let entropy = input_blob(ENTROPY)?;
        let mut output = empty_blob();

        // SAFETY: every pointer refers to a live blob for the duration of the
        // call; the input buffers are only read.
        let ok = unsafe {
            CryptProtectData(
                &input,
                ptr::null(),
                &entropy,
                ptr::null(),
                ptr::null(),
                FLAGS,
                &mut output,
            )
        };
        if ok == 0 {
            tracing::error!(error = %std::io::Error::last_os_error(), "CryptProtectData failed");
            return Err(VaultError::storage("host protection of the master key failed"));
        }
        Ok(take_output(output).to_vec())
    }

    pub(super) fn unprotect(blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let input = input_blob(blob)?;
        let entropy = input_blob(ENTROPY)?;
        let mut output = empty_blob();

        // SAFETY: as in `protect`.
        let ok = unsafe {
            CryptUnprotectData(
                &input,
                ptr::null_mut(),
                &entropy,
                ptr::null(),
                ptr::null(),
                FLAGS,
                &mut output,
            )
        };
        if ok == 0 {
            tracing::warn!(error = %std::io::Error::last_os_error(), "CryptUnprotectData failed");
            return Err(VaultError::Integrity);
        }
        Ok(take_output(output))
    }
}

// ---------------------------------------------------------------------------
// In-memory protector
// ---------------------------------------------------------------------------

/// Reversible protector with an in-memory wrapping key.
pub struct EphemeralProtector {
    wrapping_key: Zeroizing<[u8; crypto::KEY_LEN]>,
}

impl EphemeralProtector {
    /// Create a protector with a random wrapping key.
    pub fn new() -> Result<Self> {
        let mut wrapping_key = Zeroizing::new([0u8; crypto::KEY_LEN]);
        crypto::fill_random(&mut wrapping_key[..])?;
        Ok(Self { wrapping_key })
    }

    /// Create a protector with a fixed wrapping key.
    pub fn with_key(key: [u8; crypto::KEY_LEN]) -> Self {
        Self {
            wrapping_key: Zeroizing::new(key),
        }
    }
}

impl KeyProtector for EphemeralProtector {
    fn protect(&self, secret: &[u8]) -> Result<Vec<u8>> {
        wrap(secret, &self.wrapping_key[..])
    }

    fn unprotect(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        unwrap_blob(blob, &self.wrapping_key[..])
    }
}

// ---------------------------------------------------------------------------
// Key store
// ---------------------------------------------------------------------------

/// Owner of the protected `master.key` file.
pub struct ProtectedKeyStore {
    path: PathBuf,
    protector: Box<dyn KeyProtector>,
    lock: Mutex<()>,
}

impl std::fmt::Debug for ProtectedKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedKeyStore")
            .field("file", &storage::file_name(&self.path))
            .finish_non_exhaustive()
    }
}

impl ProtectedKeyStore {
    /// Create a store that keeps its protected blob at `path`.
    pub fn new(path: impl Into<PathBuf>, protector: Box<dyn KeyProtector>) -> Self {
        Self {
            path: path.into(),
            protector,
            lock: Mutex::new(()),
        }
    }

    /// Default key file location: `<data_dir>/master.key`.
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("master.key")
    }

    /// Whether a protected key has been persisted.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Return the master key, generating and persisting it on first use.
    ///
    /// # Errors
    ///
    /// [`VaultError::Storage`] if the blob disappears between the existence
    /// check and the read, cannot be unprotected, or has the wrong length.
    pub fn get_or_create_key(&self, size: usize) -> Result<Zeroizing<Vec<u8>>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        if self.path.exists() {
            return self.load(size);
        }

        let key = crypto::random_bytes(size)?;
        let blob = self.protector.protect(&key)?;
        match storage::write_atomic(&self.path, &blob, WriteMode::CreateNew) {
            Ok(()) => {
                tracing::info!(file = %storage::file_name(&self.path), "created protected master key");
                Ok(key)
            }
            // Lost a creation race with another handle on the same file.
            Err(VaultError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                self.load(size)
            }
            Err(e) => Err(e),
        }
    }

    fn load(&self, size: usize) -> Result<Zeroizing<Vec<u8>>> {
        let blob = match std::fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::storage("master key file vanished during read"));
            }
            Err(e) => return Err(e.into()),
        };

        let key = self.protector.unprotect(&blob).map_err(|e| {
            tracing::error!(error_kind = ?e.kind(), "failed to unprotect master key");
            VaultError::storage("master key cannot be unprotected on this host")
        })?;

        if key.len() != size {
            return Err(VaultError::storage("master key has an unexpected length"));
        }

        tracing::debug!("loaded protected master key");
        Ok(key)
    }
}

/// Returns the protector for the current platform.
///
/// Fails closed when the host identity cannot be read.
pub fn platform_protector() -> Result<Box<dyn KeyProtector>> {
    #[cfg(windows)]
    {
        tracing::info!("using DPAPI machine-scope protection for the master key");
        Ok(Box::new(DpapiProtector))
    }

    #[cfg(not(windows))]
    {
        let protector = MachineBoundProtector::from_host()?;
        tracing::info!("using machine-bound protection for the master key");
        Ok(Box::new(protector))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
