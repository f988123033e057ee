//! Error taxonomy for VaultGate.

use std::time::Duration;

use thiserror::Error;

/// Top-level error type for VaultGate operations.
///
/// Variants are chosen so the HTTP layer can map each one to a single status
/// code without inspecting messages.
#[derive(Debug, Error)]
pub enum Error {
    /// Wrong passphrase, unknown vault, or unusable session token.
    ///
    /// Deliberately carries no detail: callers must not be able to tell an
    /// unknown vault from a wrong passphrase.
    #[error("Authentication failed")]
    Authentication,

    /// Too many failed logins from one client in the current window.
    #[error("Too many login attempts, try again later")]
    RateLimited,

    /// Vault directory is missing, unreadable, or its header is corrupt.
    #[error("Vault unavailable: {0}")]
    VaultUnavailable(String),

    /// Another open of the same vault is in flight.
    #[error("Vault busy: {0}")]
    VaultBusy(String),

    /// Mount helper did not become ready in time.
    #[error("Mount did not become ready within {0:?}")]
    MountTimeout(Duration),

    /// Resolved path escapes the vault root.
    #[error("Path traversal rejected: {0}")]
    PathTraversal(String),

    /// Resource not found (or not a directory when one was required).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A file was required but the path names a directory.
    #[error("Is a directory: {0}")]
    IsADirectory(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Payload exceeds the configured limit.
    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map a filesystem error for `path` onto the taxonomy.
    ///
    /// `NotFound` and `AlreadyExists` keep their meaning; everything else
    /// stays an I/O error.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.to_string()),
            std::io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_string()),
            _ => Error::Io(err),
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
