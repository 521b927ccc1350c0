//! Vault error types.
//!
//! All vault subsystems surface errors through [`VaultError`], which is the
//! single error type returned by every public API in this crate.  Messages
//! are written to be safe to show to a caller: they never carry secret bytes,
//! key material or absolute file paths.

/// Coarse classification of a [`VaultError`].
///
/// Callers that sit at a trust boundary (the service dispatcher) use this to
/// decide whether the message may be surfaced verbatim or must be replaced
/// by a generic one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or non-BIP-39 input.
    Validation,
    /// Attempt to overwrite write-once state.
    Conflict,
    /// Too few (or duplicate) shares for reconstruction.
    InsufficientShares,
    /// Invalid threshold / share-count combination.
    Configuration,
    /// Disk or host-protection failure.
    Storage,
    /// Authenticated decryption failed.
    Integrity,
}

impl ErrorKind {
    /// Whether the caller may be shown the error message as-is.
    pub fn is_expected(self) -> bool {
        matches!(
            self,
            Self::Validation | Self::Conflict | Self::InsufficientShares
        )
    }
}

/// Unified error type for the Aegis genesis vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Caller errors ------------------------------------------------------
    /// The supplied input was rejected (empty, wrong word count, bad
    /// checksum, ...).
    #[error("{reason}")]
    Validation { reason: String },

    /// The genesis secret already exists and is write-once.
    #[error("genesis key already exists; it cannot be overwritten")]
    Conflict,

    // -- Secret sharing -----------------------------------------------------
    /// Fewer shares than the reconstruction threshold were supplied.
    #[error("at least {threshold} shares are required, got {provided}")]
    InsufficientShares { threshold: u8, provided: usize },

    /// Two input shares used the same x-coordinate.
    #[error("duplicate share index: {0}")]
    DuplicateShareIndex(u8),

    /// Invalid threshold / share-count combination.
    #[error("invalid configuration: {reason}")]
    Configuration { reason: String },

    // -- At-rest protection -------------------------------------------------
    /// Disk access or host-protection failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },

    /// Authenticated decryption failed (wrong key, corruption, tampering).
    #[error("integrity check failed")]
    Integrity,

    // -- Underlying errors --------------------------------------------------
    /// I/O error from the filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error of a persisted record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    /// Shorthand for a [`VaultError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`VaultError::Configuration`].
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`VaultError::Storage`].
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Conflict => ErrorKind::Conflict,
            Self::InsufficientShares { .. } | Self::DuplicateShareIndex(_) => {
                ErrorKind::InsufficientShares
            }
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Storage { .. } | Self::Io(_) | Self::Serialization(_) => ErrorKind::Storage,
            Self::Integrity => ErrorKind::Integrity,
        }
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
