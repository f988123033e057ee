//! Single entry point over both vault-unlocking strategies.
//!
//! The variant is chosen once at startup from configuration; callers only
//! ever see [`VaultAdapter`] and [`VaultHandle`].

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::handle::{FileStream, VaultHandle};
use crate::inprocess::InProcessDecryptAdapter;
use crate::mount::{MountConfig, ProcessMountAdapter};
use crate::tree::VaultIndex;
use vaultgate_common::{DirEntry, Error, Passphrase, Result, VaultDescriptor, VaultId, VaultPath};

/// Which unlocking strategy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Spawn an external mount helper.
    #[default]
    Process,
    /// Decrypt in process.
    InProcess,
}

/// Rejects a second open of a vault while the first is still in flight.
#[derive(Debug, Default)]
pub(crate) struct OpenGuard {
    in_flight: Mutex<HashSet<VaultId>>,
}

impl OpenGuard {
    pub(crate) fn acquire(&self, id: &VaultId) -> Result<OpenTicket<'_>> {
        if !self.in_flight.lock().insert(id.clone()) {
            warn!(vault = %id, "Concurrent open rejected");
            return Err(Error::VaultBusy(id.to_string()));
        }
        Ok(OpenTicket {
            guard: self,
            id: id.clone(),
        })
    }
}

/// Held for the duration of one open; releases the vault id on drop.
pub(crate) struct OpenTicket<'a> {
    guard: &'a OpenGuard,
    id: VaultId,
}

impl Drop for OpenTicket<'_> {
    fn drop(&mut self) {
        self.guard.in_flight.lock().remove(&self.id);
    }
}

/// Vault access, over either unlocking strategy.
#[derive(Debug)]
pub enum VaultAdapter {
    ProcessMount(ProcessMountAdapter),
    InProcessDecrypt(InProcessDecryptAdapter),
}

impl VaultAdapter {
    /// Build the adapter for `kind`. `mount` is only used by the process
    /// variant.
    pub fn from_kind(kind: AdapterKind, mount: MountConfig) -> Self {
        match kind {
            AdapterKind::Process => VaultAdapter::ProcessMount(ProcessMountAdapter::new(mount)),
            AdapterKind::InProcess => {
                VaultAdapter::InProcessDecrypt(InProcessDecryptAdapter::new())
            }
        }
    }

    pub fn kind(&self) -> AdapterKind {
        match self {
            VaultAdapter::ProcessMount(_) => AdapterKind::Process,
            VaultAdapter::InProcessDecrypt(_) => AdapterKind::InProcess,
        }
    }

    /// Unlock a vault.
    ///
    /// # Errors
    /// - `Authentication` on a wrong passphrase
    /// - `VaultUnavailable` if the vault is missing or corrupt
    /// - `VaultBusy` if the same vault is being opened concurrently
    /// - `MountTimeout` (process variant) if the mount never becomes ready
    pub fn open(&self, vault: &VaultDescriptor, passphrase: &Passphrase) -> Result<VaultHandle> {
        debug!(vault = %vault.id, kind = ?self.kind(), "Opening vault");
        match self {
            VaultAdapter::ProcessMount(adapter) => adapter.open(vault, passphrase),
            VaultAdapter::InProcessDecrypt(adapter) => adapter.open(vault, passphrase),
        }
    }

    /// List a directory, sorted by name with directories and files
    /// interleaved.
    ///
    /// # Errors
    /// - `NotFound` if the path is missing or not a directory
    /// - `PathTraversal` if the path resolves outside the vault
    pub fn list_dir(&self, handle: &VaultHandle, path: &VaultPath) -> Result<Vec<DirEntry>> {
        let mut entries = match handle {
            VaultHandle::Mount(h) => h.list_dir(path)?,
            VaultHandle::Decrypt(h) => h.list_dir(path)?,
        };
        DirEntry::sort_listing(&mut entries);
        Ok(entries)
    }

    /// Open a file for reading.
    ///
    /// # Errors
    /// - `NotFound` or `IsADirectory`
    /// - `PathTraversal` if the path resolves outside the vault
    pub fn read_file(&self, handle: &VaultHandle, path: &VaultPath) -> Result<FileStream> {
        match handle {
            VaultHandle::Mount(h) => h.read_file(path),
            VaultHandle::Decrypt(h) => h.read_file(path),
        }
    }

    /// Create or replace a file. Returns the number of plaintext bytes
    /// written.
    pub fn write_file(&self, handle: &VaultHandle, path: &VaultPath, data: &[u8]) -> Result<u64> {
        match handle {
            VaultHandle::Mount(h) => h.write_file(path, data),
            VaultHandle::Decrypt(h) => h.write_file(path, data),
        }
    }

    /// Create a directory; its parent must exist.
    pub fn make_dir(&self, handle: &VaultHandle, path: &VaultPath) -> Result<()> {
        match handle {
            VaultHandle::Mount(h) => h.make_dir(path),
            VaultHandle::Decrypt(h) => h.make_dir(path),
        }
    }

    /// Move a file into `destination_dir`, keeping its name. Returns the new
    /// path.
    pub fn move_file(
        &self,
        handle: &VaultHandle,
        source: &VaultPath,
        destination_dir: &VaultPath,
    ) -> Result<VaultPath> {
        match handle {
            VaultHandle::Mount(h) => h.move_file(source, destination_dir),
            VaultHandle::Decrypt(h) => h.move_file(source, destination_dir),
        }
    }

    /// Walk the whole vault into an index.
    pub fn build_index(&self, handle: &VaultHandle) -> Result<VaultIndex> {
        VaultIndex::build(|path| self.list_dir(handle, path))
    }

    /// Release the handle. Idempotent.
    pub fn close(&self, handle: &mut VaultHandle) {
        handle.close();
    }
}
