//! Service error types.
//!
//! [`ServiceError`] covers everything the dispatcher, transport and
//! configuration loader can fail with.  [`ServiceError::status`] maps each
//! error onto exactly one wire [`Status`], and [`ServiceError::public_message`]
//! decides what the caller is allowed to see.

use aegis_vault::{ErrorKind, VaultError};

use crate::protocol::Status;

/// Message returned to callers for every internal failure.
pub const GENERIC_INTERNAL_MESSAGE: &str = "internal service error";

/// Unified error type for the Aegis service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    // -- Caller errors ------------------------------------------------------
    /// The request was malformed or a parameter was missing.
    #[error("{reason}")]
    BadRequest { reason: String },

    /// The command name is not recognized.
    #[error("unknown command: {command}")]
    UnknownCommand { command: String },

    /// Secret access was attempted outside an unlock window.
    #[error("device is locked")]
    Locked,

    /// The operation is disabled by service policy.
    #[error("{reason}")]
    Forbidden { reason: String },

    // -- Vault --------------------------------------------------------------
    /// A vault operation failed.
    #[error(transparent)]
    Vault(#[from] VaultError),

    // -- Infrastructure -----------------------------------------------------
    /// Channel-level failure (connect, read, write, timeout).
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// Invalid or unreadable service configuration.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// I/O error outside the vault.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    /// Shorthand for a [`ServiceError::BadRequest`].
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`ServiceError::Forbidden`].
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`ServiceError::Transport`].
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`ServiceError::Config`].
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// The wire status for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::BadRequest { .. } => Status::BadRequest,
            Self::UnknownCommand { .. } => Status::NotFound,
            Self::Locked => Status::Locked,
            Self::Forbidden { .. } => Status::Forbidden,
            Self::Vault(e) => match e.kind() {
                ErrorKind::Validation | ErrorKind::InsufficientShares => Status::BadRequest,
                ErrorKind::Conflict => Status::Conflict,
                ErrorKind::Configuration | ErrorKind::Storage | ErrorKind::Integrity => {
                    Status::InternalError
                }
            },
            Self::Transport { .. } | Self::Config { .. } | Self::Io(_) | Self::Serialization(_) => {
                Status::InternalError
            }
        }
    }

    /// The message a caller may see.
    ///
    /// Internal failures are collapsed into [`GENERIC_INTERNAL_MESSAGE`] so
    /// the caller cannot tell corruption from tampering or a bug.
    pub fn public_message(&self) -> String {
        match self.status() {
            Status::InternalError => GENERIC_INTERNAL_MESSAGE.to_owned(),
            _ => self.to_string(),
        }
    }
}

/// Convenience alias used throughout the service crate.
pub type Result<T> = std::result::Result<T, ServiceError>;
