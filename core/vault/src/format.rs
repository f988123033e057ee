//! On-disk layout of an in-process vault.
//!
//! ```text
//! <vault>/vault.json   header: format version, salt, KDF parameters, key check
//! <vault>/d/           ciphertext tree mirroring the plaintext tree
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use vaultgate_common::{Error, Passphrase, Result};
use vaultgate_crypto::{decrypt, derive_key, encrypt, KdfParams, MasterKey, Salt};

/// Header file name in the vault root.
pub const HEADER_FILENAME: &str = "vault.json";

/// Ciphertext data directory name in the vault root.
pub const DATA_DIRNAME: &str = "d";

const KEY_CHECK_PLAINTEXT: &[u8] = b"VAULTGATE_KEY_CHECK_V1";

/// Vault format version for migration support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    /// Current vault format version.
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    /// Check if this version can be read by this build.
    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

/// Contents of `vault.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultHeader {
    pub format: FormatVersion,
    pub salt: Salt,
    pub kdf: KdfParams,
    /// Known constant encrypted under the master key.
    pub key_check: Vec<u8>,
}

impl VaultHeader {
    /// Read the header of the vault rooted at `root`.
    ///
    /// # Errors
    /// - `VaultUnavailable` if the header is missing, unparsable or of an
    ///   incompatible format, or the data directory is missing
    pub fn load(root: &Path) -> Result<Self> {
        let header_path = root.join(HEADER_FILENAME);
        let bytes = fs::read(&header_path).map_err(|e| {
            Error::VaultUnavailable(format!("{}: {}", header_path.display(), e))
        })?;
        let header: Self = serde_json::from_slice(&bytes).map_err(|e| {
            Error::VaultUnavailable(format!("Corrupt vault header: {}", e))
        })?;

        if !header.format.is_compatible() {
            return Err(Error::VaultUnavailable(format!(
                "Unsupported vault format {}.{}",
                header.format.major, header.format.minor
            )));
        }
        if !data_dir(root).is_dir() {
            return Err(Error::VaultUnavailable(format!(
                "Missing data directory in {}",
                root.display()
            )));
        }
        Ok(header)
    }

    /// Derive the master key for `passphrase` and verify it against the key
    /// check.
    ///
    /// # Errors
    /// - `Authentication` if the passphrase is empty or wrong
    /// - `VaultUnavailable` if the stored KDF parameters are unusable
    pub fn unlock(&self, passphrase: &Passphrase) -> Result<MasterKey> {
        if passphrase.is_empty() {
            return Err(Error::Authentication);
        }
        let master = derive_key(passphrase.as_bytes(), &self.salt, &self.kdf)
            .map_err(|e| Error::VaultUnavailable(e.to_string()))?;

        match decrypt(master.as_bytes(), &self.key_check) {
            Ok(plaintext) if plaintext == KEY_CHECK_PLAINTEXT => Ok(master),
            _ => Err(Error::Authentication),
        }
    }
}

/// Path of the ciphertext tree under a vault root.
pub fn data_dir(root: &Path) -> PathBuf {
    root.join(DATA_DIRNAME)
}

/// Lay out an empty vault at `root` protected by `passphrase`.
///
/// Vault provisioning is not part of the server; this exists for fixtures
/// and tests.
///
/// # Errors
/// - `AlreadyExists` if `root` already holds a vault header
/// - `InvalidInput` if the passphrase is empty
pub fn initialize(root: &Path, passphrase: &Passphrase, kdf: KdfParams) -> Result<MasterKey> {
    let header_path = root.join(HEADER_FILENAME);
    if header_path.exists() {
        return Err(Error::AlreadyExists(header_path.display().to_string()));
    }

    let salt = Salt::generate();
    let master = derive_key(passphrase.as_bytes(), &salt, &kdf)?;
    let header = VaultHeader {
        format: FormatVersion::CURRENT,
        salt,
        kdf,
        key_check: encrypt(master.as_bytes(), KEY_CHECK_PLAINTEXT)?,
    };

    fs::create_dir_all(data_dir(root))?;
    let json =
        serde_json::to_vec_pretty(&header).map_err(|e| Error::Serialization(e.to_string()))?;
    fs::write(&header_path, json)?;

    debug!(root = %root.display(), "Initialized vault");
    Ok(master)
}
