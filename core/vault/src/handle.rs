//! Unlocked vault handles.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::inprocess::DecryptHandle;
use crate::mount::MountHandle;
use vaultgate_common::{Error, Result, VaultId, VaultPath};
use vaultgate_crypto::{content::PREALLOC_LIMIT, unwrap_io};

/// Prefix of in-flight upload files; such entries never appear in listings.
pub(crate) const TEMP_PREFIX: &str = ".vaultgate-tmp-";

/// An unlocked vault, owned by exactly one session.
///
/// Each variant carries its own release logic, so closing never needs to
/// know which adapter produced the handle. Release is idempotent and also
/// runs on drop.
#[derive(Debug)]
pub enum VaultHandle {
    Mount(MountHandle),
    Decrypt(DecryptHandle),
}

impl VaultHandle {
    pub fn vault_id(&self) -> &VaultId {
        match self {
            VaultHandle::Mount(h) => h.vault_id(),
            VaultHandle::Decrypt(h) => h.vault_id(),
        }
    }

    /// Check whether the handle still holds its mount or key material.
    pub fn is_open(&self) -> bool {
        match self {
            VaultHandle::Mount(h) => h.is_open(),
            VaultHandle::Decrypt(h) => h.is_open(),
        }
    }

    /// Release the mount or key material. Safe to call more than once.
    pub fn close(&mut self) {
        match self {
            VaultHandle::Mount(h) => h.release(),
            VaultHandle::Decrypt(h) => h.release(),
        }
    }
}

/// Plaintext file contents with the size known before reading.
pub struct FileStream {
    pub size: u64,
    pub reader: Box<dyn Read + Send>,
}

impl FileStream {
    /// Read the whole stream into memory.
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        // `size` may come from an unauthenticated header.
        let mut out = Vec::with_capacity(self.size.min(PREALLOC_LIMIT) as usize);
        self.reader.read_to_end(&mut out).map_err(unwrap_io)?;
        Ok(out)
    }
}

impl fmt::Debug for FileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStream")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Canonicalize `candidate` and require it to stay under `root` (already
/// canonical). Symlinks pointing outside the vault are rejected here.
pub(crate) fn confine(candidate: &Path, root: &Path, display: &VaultPath) -> Result<PathBuf> {
    let resolved = candidate.canonicalize().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::NotFound(display.to_string()),
        _ => Error::Io(e),
    })?;

    if !resolved.starts_with(root) {
        let vault_path = display;
        warn!(path = %vault_path, "Path resolves outside the vault root");
        return Err(Error::PathTraversal(display.to_string()));
    }
    Ok(resolved)
}

/// Resolve an existing directory, mapping "exists but is a file" to
/// `NotFound`.
pub(crate) fn require_dir(resolved: PathBuf, display: &VaultPath) -> Result<PathBuf> {
    if resolved.is_dir() {
        Ok(resolved)
    } else {
        Err(Error::NotFound(display.to_string()))
    }
}

/// Write a file by filling a temporary sibling and renaming it over
/// `target`, so readers never observe a partial file.
pub(crate) fn write_atomic<F>(dir: &Path, target: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let temp = dir.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));
    let result: Result<()> = (|| {
        let mut writer = BufWriter::new(File::create(&temp)?);
        fill(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&temp, target)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_into_bytes_ignores_declared_size() {
        let stream = FileStream {
            size: u64::MAX,
            reader: Box::new(io::Cursor::new(b"abc".to_vec())),
        };
        assert_eq!(stream.into_bytes().unwrap(), b"abc");
    }

    #[test]
    fn test_confine_rejects_missing_paths() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let display = VaultPath::parse("/missing").unwrap();

        assert!(matches!(
            confine(&root.join("missing"), &root, &display),
            Err(Error::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_confine_rejects_escaping_symlink() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("escape")).unwrap();

        let display = VaultPath::parse("/escape").unwrap();
        assert!(matches!(
            confine(&root.join("escape"), &root, &display),
            Err(Error::PathTraversal(_))
        ));
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_on_failure() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.bin");

        let result = write_atomic(dir.path(), &target, |w| {
            w.write_all(b"partial")?;
            Err(Error::Crypto("fail".to_string()))
        });
        assert!(result.is_err());
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        write_atomic(dir.path(), &target, |w| Ok(w.write_all(b"done")?)).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"done");
    }

    #[test]
    fn test_file_stream_into_bytes() {
        let stream = FileStream {
            size: 5,
            reader: Box::new(io::Cursor::new(b"hello".to_vec())),
        };
        assert_eq!(format!("{:?}", stream), "FileStream { size: 5, .. }");
        assert_eq!(stream.into_bytes().unwrap(), b"hello");
    }
}
