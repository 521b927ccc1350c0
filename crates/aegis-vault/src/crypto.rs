//! Envelope cipher: AES-256-GCM using the `ring` crate.
//!
//! Every call to [`encrypt`] draws a fresh random 96-bit nonce and produces a
//! self-describing [`Envelope`] `{version, nonce, ciphertext, tag}`.  The
//! envelope version is bound into the GCM additional data, so a record cannot
//! be replayed under a different version number.
//!
//! [`decrypt`] verifies the tag before any plaintext is released.  Any
//! corruption, truncation, wrong key or tag mismatch fails with
//! [`VaultError::Integrity`]; no partial plaintext is ever returned.
//!
//! # Security Notes
//!
//! - With random 96-bit nonces the collision probability is negligible for
//!   far more encryptions than a single genesis secret will ever see.
//! - Plaintext and key buffers are returned as [`Zeroizing`] so they are
//!   wiped when the caller drops them.

use ring::aead::{
    self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey,
};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::codec;
use crate::error::{Result, VaultError};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// AES-256-GCM algorithm from `ring`.
static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// An encrypted record as persisted on disk (JSON, binary fields base64).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Format version, bound into the authenticated data.
    pub version: u8,
    /// 96-bit nonce, unique per encryption.
    #[serde(with = "codec::base64_bytes")]
    pub nonce: Vec<u8>,
    /// Ciphertext, same length as the plaintext.
    #[serde(with = "codec::base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// 128-bit GCM authentication tag.
    #[serde(with = "codec::base64_bytes")]
    pub tag: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A single-use nonce sequence that yields exactly one nonce and then errors.
///
/// `ring` requires a [`NonceSequence`] for bound keys.  Since a fresh random
/// nonce is generated per encryption call, each key is used exactly once.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LEN {
        return Err(VaultError::configuration(format!(
            "key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` with AES-256-GCM under the 256-bit `key`.
///
/// # Errors
///
/// Returns [`VaultError::Configuration`] if the key length is wrong and
/// [`VaultError::Storage`] if the system random source fails.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Envelope> {
    check_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN_BYTES];
    fill_random(&mut nonce_bytes)?;

    let unbound_key = UnboundKey::new(AEAD_ALG, key)
        .map_err(|_| VaultError::configuration("failed to create AES-256-GCM key"))?;
    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    let mut in_out = plaintext.to_vec();
    let tag = sealing_key
        .seal_in_place_separate_tag(Aad::from([ENVELOPE_VERSION]), &mut in_out)
        .map_err(|_| VaultError::storage("seal operation failed"))?;

    tracing::trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = in_out.len(),
        "sealed envelope"
    );

    Ok(Envelope {
        version: ENVELOPE_VERSION,
        nonce: nonce_bytes.to_vec(),
        ciphertext: in_out,
        tag: tag.as_ref().to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Decryption
// ---------------------------------------------------------------------------

/// Verify and decrypt `envelope` with the 256-bit `key`.
///
/// # Errors
///
/// Returns [`VaultError::Integrity`] for an unknown version, malformed nonce
/// or tag, wrong key, or any tampering with the ciphertext.
pub fn decrypt(envelope: &Envelope, key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    check_key(key)?;

    if envelope.version != ENVELOPE_VERSION
        || envelope.nonce.len() != NONCE_LEN_BYTES
        || envelope.tag.len() != TAG_LEN
    {
        return Err(VaultError::Integrity);
    }

    let mut nonce = [0u8; NONCE_LEN_BYTES];
    nonce.copy_from_slice(&envelope.nonce);

    let unbound_key = UnboundKey::new(AEAD_ALG, key)
        .map_err(|_| VaultError::configuration("failed to create AES-256-GCM key"))?;
    let mut opening_key = OpeningKey::new(unbound_key, SingleNonce::new(nonce));

    // `ring` expects the tag appended to the ciphertext.
    let mut in_out = Zeroizing::new(Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN));
    in_out.extend_from_slice(&envelope.ciphertext);
    in_out.extend_from_slice(&envelope.tag);

    let plaintext_len = opening_key
        .open_in_place(Aad::from([envelope.version]), &mut in_out)
        .map_err(|_| VaultError::Integrity)?
        .len();
    in_out.truncate(plaintext_len);

    tracing::trace!(plaintext_len, "opened envelope");
    Ok(in_out)
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Fill `buf` from the system CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| VaultError::storage("system random source unavailable"))
}

/// Generate `len` cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut buf = Zeroizing::new(vec![0u8; len]);
    fill_random(&mut buf)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
