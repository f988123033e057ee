//! Vault access by decrypting in process.
//!
//! Opening derives the master key and checks it against the vault header;
//! names and content blocks are then decrypted on demand. Closing drops the
//! key material, which zeroizes it.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::adapter::OpenGuard;
use crate::format::{data_dir, VaultHeader};
use crate::handle::{confine, require_dir, write_atomic, FileStream, VaultHandle, TEMP_PREFIX};
use vaultgate_common::{
    types::validate_name, DirEntry, Error, Passphrase, Result, VaultDescriptor, VaultId, VaultPath,
};
use vaultgate_crypto::{
    content::DEFAULT_BLOCK_SIZE, decrypt_name, encrypt_content, encrypt_name, read_header,
    ContentKey, ContentReader, MasterKey,
};

/// Opens vaults in the on-disk format described in [`crate::format`].
#[derive(Debug, Default)]
pub struct InProcessDecryptAdapter {
    guard: OpenGuard,
}

impl InProcessDecryptAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unlock `vault` with `passphrase`.
    ///
    /// # Errors
    /// - `VaultBusy` if another open of the same vault is in flight
    /// - `VaultUnavailable` if the directory or header is missing or corrupt
    /// - `Authentication` if the passphrase does not match
    pub fn open(&self, vault: &VaultDescriptor, passphrase: &Passphrase) -> Result<VaultHandle> {
        let _ticket = self.guard.acquire(&vault.id)?;

        if !vault.path.is_dir() {
            return Err(Error::VaultUnavailable(format!(
                "Vault directory missing: {}",
                vault.path.display()
            )));
        }
        let header = VaultHeader::load(&vault.path)?;
        let master = header.unlock(passphrase)?;
        let data_root = data_dir(&vault.path)
            .canonicalize()
            .map_err(|e| Error::VaultUnavailable(e.to_string()))?;

        info!(vault = %vault.id, "Vault unlocked");
        Ok(VaultHandle::Decrypt(DecryptHandle {
            vault_id: vault.id.clone(),
            data_root,
            keys: Some(Keys {
                content: master.content_key(),
                master,
            }),
        }))
    }
}

#[derive(Debug)]
struct Keys {
    master: MasterKey,
    content: ContentKey,
}

/// Key material for one unlocked vault.
#[derive(Debug)]
pub struct DecryptHandle {
    vault_id: VaultId,
    data_root: PathBuf,
    keys: Option<Keys>,
}

impl DecryptHandle {
    pub fn vault_id(&self) -> &VaultId {
        &self.vault_id
    }

    pub fn is_open(&self) -> bool {
        self.keys.is_some()
    }

    /// Discard the keys. Safe to call more than once.
    pub fn release(&mut self) {
        if self.keys.take().is_some() {
            info!(vault = %self.vault_id, "Vault locked");
        }
    }

    fn keys(&self) -> Result<&Keys> {
        self.keys.as_ref().ok_or(Error::Authentication)
    }

    /// Map a plaintext path to its ciphertext location, one encrypted
    /// component at a time. The result is not checked for existence.
    fn cipher_path(&self, path: &VaultPath) -> Result<PathBuf> {
        let keys = self.keys()?;
        let mut fs_path = self.data_root.clone();
        let mut current = VaultPath::root();
        for component in path.components() {
            let key = keys.master.name_key(&current.to_string_path());
            // Names too long to encrypt cannot exist in the vault.
            let encrypted =
                encrypt_name(&key, component).map_err(|_| Error::NotFound(path.to_string()))?;
            fs_path.push(encrypted);
            current = current.join(component)?;
        }
        Ok(fs_path)
    }

    fn resolve(&self, path: &VaultPath) -> Result<PathBuf> {
        confine(&self.cipher_path(path)?, &self.data_root, path)
    }

    /// Resolve the existing parent directory of `path` and the ciphertext
    /// name `path` would have inside it.
    fn resolve_child(&self, path: &VaultPath) -> Result<(PathBuf, String)> {
        let (parent, name) = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => {
                return Err(Error::InvalidInput(
                    "Operation not allowed on the root".to_string(),
                ))
            }
        };
        let dir = require_dir(self.resolve(&parent)?, &parent)?;
        let key = self.keys()?.master.name_key(&parent.to_string_path());
        Ok((dir, encrypt_name(&key, name)?))
    }

    pub(crate) fn list_dir(&self, path: &VaultPath) -> Result<Vec<DirEntry>> {
        let dir = require_dir(self.resolve(path)?, path)?;
        let key = self.keys()?.master.name_key(&path.to_string_path());

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let raw = entry.file_name();
            let Some(raw) = raw.to_str() else {
                warn!(vault = %self.vault_id, dir = %path, "Skipping non UTF-8 entry");
                continue;
            };
            if raw.starts_with(TEMP_PREFIX) {
                continue;
            }

            let name = match decrypt_name(&key, raw) {
                Ok(name) if validate_name(&name).is_ok() => name,
                Ok(_) | Err(_) => {
                    warn!(vault = %self.vault_id, dir = %path, entry = raw, "Skipping undecryptable entry");
                    continue;
                }
            };

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                entries.push(DirEntry::directory(path, name));
            } else if file_type.is_file() {
                match plaintext_size(&entry.path()) {
                    Ok(size) => entries.push(DirEntry::file(path, name, size)),
                    Err(e) => {
                        warn!(vault = %self.vault_id, dir = %path, error = %e, "Skipping corrupt file")
                    }
                }
            }
        }
        Ok(entries)
    }

    pub(crate) fn read_file(&self, path: &VaultPath) -> Result<FileStream> {
        let file_path = self.resolve(path)?;
        if file_path.is_dir() {
            return Err(Error::IsADirectory(path.to_string()));
        }

        let file = File::open(&file_path).map_err(|e| Error::from_io(e, &path.to_string()))?;
        let file_len = file.metadata()?.len();
        let reader = ContentReader::new(BufReader::new(file), self.keys()?.content.clone())?;
        reader.header().check_file_len(file_len).inspect_err(|e| {
            warn!(vault = %self.vault_id, path = %path, error = %e, "Refusing corrupt file");
        })?;
        Ok(FileStream {
            size: reader.plaintext_len(),
            reader: Box::new(reader),
        })
    }

    pub(crate) fn write_file(&self, path: &VaultPath, data: &[u8]) -> Result<u64> {
        let (dir, encrypted) = self.resolve_child(path)?;
        let target = dir.join(encrypted);
        if target.is_dir() {
            return Err(Error::IsADirectory(path.to_string()));
        }

        let key = &self.keys()?.content;
        write_atomic(&dir, &target, |writer| {
            encrypt_content(key, data, DEFAULT_BLOCK_SIZE, writer).map(|_| ())
        })?;
        debug!(vault = %self.vault_id, bytes = data.len(), "Wrote encrypted file");
        Ok(data.len() as u64)
    }

    pub(crate) fn make_dir(&self, path: &VaultPath) -> Result<()> {
        let (dir, encrypted) = self.resolve_child(path)?;
        fs::create_dir(dir.join(encrypted)).map_err(|e| Error::from_io(e, &path.to_string()))
    }

    /// Move a file into another directory. Content is encrypted with a
    /// vault-wide key, so only the name is re-encrypted.
    pub(crate) fn move_file(&self, source: &VaultPath, destination_dir: &VaultPath) -> Result<VaultPath> {
        let source_path = self.resolve(source)?;
        if source_path.is_dir() {
            return Err(Error::IsADirectory(source.to_string()));
        }
        let name = source
            .name()
            .ok_or_else(|| Error::IsADirectory(source.to_string()))?;

        let destination = destination_dir.join(name)?;
        let (dest_dir, encrypted) = self.resolve_child(&destination)?;
        let target = dest_dir.join(encrypted);
        if target.symlink_metadata().is_ok() {
            return Err(Error::AlreadyExists(destination.to_string()));
        }

        fs::rename(&source_path, &target)?;
        Ok(destination)
    }
}

impl Drop for DecryptHandle {
    fn drop(&mut self) {
        self.release();
    }
}

fn plaintext_size(path: &Path) -> Result<u64> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let header = read_header(file)?;
    header.check_file_len(file_len)?;
    Ok(header.plaintext_len)
}
