//! Key types with secure memory handling.
//!
//! The master key never encrypts data directly except for the header's key
//! check. Filenames and contents use subkeys derived with BLAKE2b under
//! distinct labels, so a leaked subkey does not expose the others.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

const NAME_LABEL: &[u8] = b"vaultgate/names/v1";
const CONTENT_LABEL: &[u8] = b"vaultgate/content/v1";

/// Master key derived from the vault passphrase.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Key for the names inside the directory at `parent` (a normalized
    /// vault path such as `/` or `/docs`).
    ///
    /// Binding the key to the parent means the same name encrypts
    /// differently in different directories.
    pub fn name_key(&self, parent: &str) -> NameKey {
        NameKey {
            key: self.derive(NAME_LABEL, parent.as_bytes()),
        }
    }

    /// Key for file contents.
    pub fn content_key(&self) -> ContentKey {
        ContentKey {
            key: self.derive(CONTENT_LABEL, &[]),
        }
    }

    fn derive(&self, label: &[u8], context: &[u8]) -> [u8; KEY_LENGTH] {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.key);
        hasher.update((label.len() as u64).to_le_bytes());
        hasher.update(label);
        hasher.update(context);

        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&hasher.finalize());
        derived
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Key for encrypting the entry names of one directory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NameKey {
    key: [u8; KEY_LENGTH],
}

impl NameKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameKey([REDACTED])")
    }
}

/// Key for encrypting file contents.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    key: [u8; KEY_LENGTH],
}

impl ContentKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; 32]);

impl Salt {
    /// Generate a random salt from the OS RNG.
    pub fn generate() -> Self {
        let mut salt = [0u8; 32];
        OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}
