//! Shamir's Secret Sharing over GF(256).
//!
//! Each byte of the secret is the constant term of its own random polynomial
//! of degree `threshold - 1`.  Share `i` (1-based, `x = i`) carries the
//! evaluation of every per-byte polynomial at `x`, so a share is exactly as
//! long as the secret.  Any `threshold` shares recover the secret by Lagrange
//! interpolation at `x = 0`; fewer reveal nothing about it.
//!
//! ## Field arithmetic
//!
//! GF(2^8) with the AES polynomial `x^8 + x^4 + x^3 + x + 1` (0x11B).
//! Multiplication is a fixed eight-round shift-and-add with masks instead of
//! log/exp tables, so there is no secret-dependent branch or table index.
//! Inversion is `a^254`, computed with a fixed square-and-multiply chain.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::codec;
use crate::crypto;
use crate::error::{Result, VaultError};

/// Largest share count: x-coordinates are the nonzero field elements.
pub const MAX_SHARES: u8 = 255;

/// One share of a split secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// x-coordinate, in `1..=255`.
    pub id: u8,
    /// Per-byte polynomial evaluations at `x = id`.
    #[serde(with = "codec::base64_bytes")]
    pub value: Vec<u8>,
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("id", &self.id)
            .field("len", &self.value.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// GF(256) arithmetic
// ---------------------------------------------------------------------------

mod gf256 {
    /// Low byte of the reduction polynomial 0x11B.
    const REDUCTION: u8 = 0x1B;

    #[inline]
    pub fn add(a: u8, b: u8) -> u8 {
        a ^ b
    }

    /// Carry-less multiply with reduction; constant number of rounds.
    #[inline]
    pub fn mul(mut a: u8, mut b: u8) -> u8 {
        let mut product = 0u8;
        for _ in 0..8 {
            product ^= a & (b & 1).wrapping_neg();
            let carry = (a >> 7).wrapping_neg();
            a = (a << 1) ^ (REDUCTION & carry);
            b >>= 1;
        }
        product
    }

    /// Multiplicative inverse via `a^254`. Maps 0 to 0.
    pub fn inv(a: u8) -> u8 {
        // 254 = 0b1111_1110
        let a2 = mul(a, a);
        let a4 = mul(a2, a2);
        let a8 = mul(a4, a4);
        let a16 = mul(a8, a8);
        let a32 = mul(a16, a16);
        let a64 = mul(a32, a32);
        let a128 = mul(a64, a64);
        mul(
            mul(mul(a128, a64), mul(a32, a16)),
            mul(mul(a8, a4), a2),
        )
    }

    #[inline]
    pub fn div(a: u8, b: u8) -> u8 {
        mul(a, inv(b))
    }

    /// Horner evaluation; `coefficients[0]` is the constant term.
    pub fn eval(coefficients: &[u8], x: u8) -> u8 {
        coefficients
            .iter()
            .rev()
            .fold(0u8, |acc, &c| add(mul(acc, x), c))
    }
}

// ---------------------------------------------------------------------------
// Split
// ---------------------------------------------------------------------------

/// Check the `1 <= threshold <= count <= 255` precondition.
pub fn validate_parameters(threshold: u8, count: u8) -> Result<()> {
    if threshold == 0 {
        return Err(VaultError::configuration(
            "recovery threshold must be at least 1",
        ));
    }
    if count < threshold {
        return Err(VaultError::configuration(format!(
            "share count ({count}) must be >= recovery threshold ({threshold})"
        )));
    }
    Ok(())
}

/// Split `secret` into `count` shares, any `threshold` of which reconstruct it.
///
/// Coefficients are drawn from the system CSPRNG on every call, so splitting
/// the same secret twice yields unrelated share sets (except when
/// `threshold == 1`, where every share equals the secret).
///
/// # Errors
///
/// [`VaultError::Configuration`] if `1 <= threshold <= count` does not hold,
/// [`VaultError::Validation`] if `secret` is empty.
pub fn split(secret: &[u8], threshold: u8, count: u8) -> Result<Vec<Share>> {
    validate_parameters(threshold, count)?;
    if secret.is_empty() {
        return Err(VaultError::validation("secret must not be empty"));
    }

    let degree = usize::from(threshold) - 1;
    let random = crypto::random_bytes(secret.len() * degree)?;

    let mut shares: Vec<Share> = (1..=count)
        .map(|id| Share {
            id,
            value: vec![0u8; secret.len()],
        })
        .collect();

    let mut coefficients = Zeroizing::new(vec![0u8; usize::from(threshold)]);
    for (index, &byte) in secret.iter().enumerate() {
        coefficients[0] = byte;
        coefficients[1..].copy_from_slice(&random[index * degree..(index + 1) * degree]);

        for share in &mut shares {
            share.value[index] = gf256::eval(&coefficients, share.id);
        }
    }

    tracing::debug!(threshold, count, "split secret into shares");
    Ok(shares)
}

// ---------------------------------------------------------------------------
// Reconstruct
// ---------------------------------------------------------------------------

/// Recover the secret from `shares` by interpolating at `x = 0`.
///
/// All supplied shares take part in the interpolation.
///
/// # Errors
///
/// - [`VaultError::InsufficientShares`] if fewer than `threshold` shares are
///   given.
/// - [`VaultError::DuplicateShareIndex`] if two shares share an x-coordinate.
/// - [`VaultError::Validation`] for an index of zero or shares of differing
///   lengths.
pub fn reconstruct(shares: &[Share], threshold: u8) -> Result<Zeroizing<Vec<u8>>> {
    if threshold == 0 {
        return Err(VaultError::configuration(
            "recovery threshold must be at least 1",
        ));
    }
    if shares.len() < usize::from(threshold) {
        return Err(VaultError::InsufficientShares {
            threshold,
            provided: shares.len(),
        });
    }

    let mut seen = [false; 256];
    for share in shares {
        if share.id == 0 {
            return Err(VaultError::validation("share index 0 is not valid"));
        }
        if std::mem::replace(&mut seen[usize::from(share.id)], true) {
            return Err(VaultError::DuplicateShareIndex(share.id));
        }
    }

    let len = shares[0].value.len();
    if shares.iter().any(|s| s.value.len() != len) {
        return Err(VaultError::validation("shares have inconsistent lengths"));
    }

    // Lagrange basis values at x = 0 depend only on the public x-coordinates.
    let basis: Vec<u8> = shares
        .iter()
        .map(|si| {
            let (num, den) = shares
                .iter()
                .filter(|sj| sj.id != si.id)
                .fold((1u8, 1u8), |(num, den), sj| {
                    (gf256::mul(num, sj.id), gf256::mul(den, gf256::add(si.id, sj.id)))
                });
            gf256::div(num, den)
        })
        .collect();

    let mut secret = Zeroizing::new(vec![0u8; len]);
    for (share, &weight) in shares.iter().zip(&basis) {
        for (out, &y) in secret.iter_mut().zip(&share.value) {
            *out = gf256::add(*out, gf256::mul(y, weight));
        }
    }

    tracing::debug!(shares = shares.len(), threshold, "reconstructed secret");
    Ok(secret)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
