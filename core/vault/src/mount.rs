//! Vault access through an external mount helper.
//!
//! The helper (for example `cryptomator-cli`) decrypts the vault into a FUSE
//! mount; every listing and read afterwards is a plain filesystem operation
//! under the mount point. The passphrase reaches the helper only through its
//! own environment.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::OpenGuard;
use crate::handle::{confine, require_dir, write_atomic, FileStream, VaultHandle, TEMP_PREFIX};
use vaultgate_common::{
    types::validate_name, DirEntry, Error, Passphrase, Result, VaultDescriptor, VaultId, VaultPath,
};

/// Environment variable carrying the passphrase into the mount helper.
pub const PASSPHRASE_ENV_VAR: &str = "VAULTGATE_PASSPHRASE";

const EXEC_BUSY_RETRY_ATTEMPTS: usize = 20;
const EXEC_BUSY_RETRY_DELAY: Duration = Duration::from_millis(10);
const UNMOUNT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const STDERR_CAPTURE_LIMIT: u64 = 16 * 1024;

/// Mount helper settings.
///
/// Argument templates may use `{vault}`, `{mountpoint}` and
/// `{passphrase_env}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub helper: PathBuf,
    pub helper_args: Vec<String>,
    pub unmount_helper: PathBuf,
    pub unmount_args: Vec<String>,
    /// Directory under which per-session mount points are created.
    pub mount_root: PathBuf,
    pub ready_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub unmount_timeout_ms: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            helper: PathBuf::from("/usr/bin/cryptomator-cli"),
            helper_args: [
                "unlock",
                "--mountPoint",
                "{mountpoint}",
                "--password:env",
                "{passphrase_env}",
                "--mounter",
                "org.cryptomator.frontend.fuse.mount.LinuxFuseMountProvider",
                "{vault}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            unmount_helper: PathBuf::from("/usr/bin/umount"),
            unmount_args: vec!["{mountpoint}".to_string()],
            mount_root: PathBuf::from("/tmp/mounts"),
            ready_timeout_ms: 10_000,
            poll_interval_ms: 100,
            unmount_timeout_ms: 5_000,
        }
    }
}

impl MountConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn unmount_timeout(&self) -> Duration {
        Duration::from_millis(self.unmount_timeout_ms)
    }

    fn render(&self, template: &[String], vault: &Path, mount_point: &Path) -> Vec<OsString> {
        template
            .iter()
            .map(|arg| {
                arg.replace("{vault}", &vault.to_string_lossy())
                    .replace("{mountpoint}", &mount_point.to_string_lossy())
                    .replace("{passphrase_env}", PASSPHRASE_ENV_VAR)
                    .into()
            })
            .collect()
    }
}

/// Opens vaults by spawning the configured mount helper.
#[derive(Debug)]
pub struct ProcessMountAdapter {
    config: MountConfig,
    guard: OpenGuard,
}

impl ProcessMountAdapter {
    pub fn new(config: MountConfig) -> Self {
        Self {
            config,
            guard: OpenGuard::default(),
        }
    }

    /// Mount `vault` and wait for the mount to become ready.
    ///
    /// # Errors
    /// - `VaultBusy` if another open of the same vault is in flight
    /// - `VaultUnavailable` if the vault directory or the helper is missing
    /// - `Authentication` if the helper exits non-zero before readiness
    /// - `MountTimeout` if readiness is not reached in time
    pub fn open(&self, vault: &VaultDescriptor, passphrase: &Passphrase) -> Result<VaultHandle> {
        let _ticket = self.guard.acquire(&vault.id)?;

        if !vault.path.is_dir() {
            return Err(Error::VaultUnavailable(format!(
                "Vault directory missing: {}",
                vault.path.display()
            )));
        }

        fs::create_dir_all(&self.config.mount_root)?;
        let mount_point = self
            .config
            .mount_root
            .join(format!("vault-{}", Uuid::new_v4()));
        fs::create_dir(&mount_point)?;

        match self.mount(vault, passphrase, &mount_point) {
            Ok(handle) => Ok(VaultHandle::Mount(handle)),
            Err(err) => {
                let _ = fs::remove_dir(&mount_point);
                Err(err)
            }
        }
    }

    fn mount(
        &self,
        vault: &VaultDescriptor,
        passphrase: &Passphrase,
        mount_point: &Path,
    ) -> Result<MountHandle> {
        let mut command = Command::new(&self.config.helper);
        command
            .args(
                self.config
                    .render(&self.config.helper_args, &vault.path, mount_point),
            )
            .env(PASSPHRASE_ENV_VAR, passphrase.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = retry_exec_busy(|| command.spawn())
            .map_err(|e| map_spawn_error(&self.config.helper, e))?;
        let stderr = drain_stderr(&mut child);
        debug!(vault = %vault.id, pid = child.id(), "Spawned mount helper");

        let timeout = self.config.ready_timeout();
        let child = match wait_for_mount(child, mount_point, timeout, self.config.poll_interval())? {
            Readiness::Ready(child) => child,
            Readiness::Exited(status) => {
                let output = stderr.map(collect_stderr).unwrap_or_default();
                debug!(
                    vault = %vault.id,
                    status = %status,
                    stderr = %String::from_utf8_lossy(&output).trim(),
                    "Mount helper failed"
                );
                return Err(Error::Authentication);
            }
            Readiness::TimedOut => {
                warn!(vault = %vault.id, timeout_ms = timeout.as_millis() as u64, "Mount helper timed out");
                return Err(Error::MountTimeout(timeout));
            }
        };

        let mut handle = MountHandle {
            vault_id: vault.id.clone(),
            mount_point: mount_point.to_path_buf(),
            canonical_root: mount_point.to_path_buf(),
            child,
            unmount_helper: self.config.unmount_helper.clone(),
            unmount_args: self.config.render(
                &self.config.unmount_args,
                &vault.path,
                mount_point,
            ),
            unmount_timeout: self.config.unmount_timeout(),
            released: false,
        };
        // On failure the handle drops here and unmounts.
        handle.canonical_root = mount_point.canonicalize()?;

        info!(vault = %vault.id, mount_point = %mount_point.display(), "Vault mounted");
        Ok(handle)
    }
}

enum Readiness {
    /// Mounted; holds the helper if it keeps running in the foreground.
    Ready(Option<Child>),
    Exited(ExitStatus),
    TimedOut,
}

/// Poll until the helper exits or the mount point becomes a mount.
fn wait_for_mount(
    mut child: Child,
    mount_point: &Path,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Readiness> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            if status.success() {
                return Ok(Readiness::Ready(None));
            }
            return Ok(Readiness::Exited(status));
        }
        if is_mount_point(mount_point) {
            return Ok(Readiness::Ready(Some(child)));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(Readiness::TimedOut);
        }
        thread::sleep(poll_interval);
    }
}

#[cfg(unix)]
fn is_mount_point(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Some(parent) = path.parent() else {
        return false;
    };
    match (fs::metadata(path), fs::metadata(parent)) {
        (Ok(dir), Ok(parent)) => dir.dev() != parent.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_mount_point(_path: &Path) -> bool {
    false
}

/// Keep the helper's stderr pipe drained so a chatty foreground helper never
/// blocks; the first few KiB are kept for diagnostics.
fn drain_stderr(child: &mut Child) -> Option<JoinHandle<Vec<u8>>> {
    let mut stderr = child.stderr.take()?;
    Some(thread::spawn(move || {
        let mut captured = Vec::new();
        let _ = stderr
            .by_ref()
            .take(STDERR_CAPTURE_LIMIT)
            .read_to_end(&mut captured);
        let _ = io::copy(&mut stderr, &mut io::sink());
        captured
    }))
}

/// Join the drain thread if it finishes promptly. A helper that left a
/// daemon holding the pipe would otherwise block the caller.
fn collect_stderr(handle: JoinHandle<Vec<u8>>) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_millis(200);
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(UNMOUNT_POLL_INTERVAL);
    }
    if handle.is_finished() {
        handle.join().unwrap_or_default()
    } else {
        Vec::new()
    }
}

fn map_spawn_error(binary: &Path, error: io::Error) -> Error {
    if error.kind() == io::ErrorKind::NotFound {
        return Error::VaultUnavailable(format!(
            "Mount helper not found: {}",
            binary.display()
        ));
    }
    Error::Io(error)
}

fn retry_exec_busy<T, F>(mut operation: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let mut last_error = None;
    for attempt in 0..EXEC_BUSY_RETRY_ATTEMPTS {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) if is_exec_busy_error(&error) && attempt + 1 < EXEC_BUSY_RETRY_ATTEMPTS => {
                last_error = Some(error);
                thread::sleep(EXEC_BUSY_RETRY_DELAY);
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error.unwrap_or_else(|| io::Error::other("command execution failed")))
}

fn is_exec_busy_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::ExecutableFileBusy || error.raw_os_error() == Some(26)
}

/// A mounted vault.
#[derive(Debug)]
pub struct MountHandle {
    vault_id: VaultId,
    mount_point: PathBuf,
    canonical_root: PathBuf,
    child: Option<Child>,
    unmount_helper: PathBuf,
    unmount_args: Vec<OsString>,
    unmount_timeout: Duration,
    released: bool,
}

impl MountHandle {
    pub fn vault_id(&self) -> &VaultId {
        &self.vault_id
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn is_open(&self) -> bool {
        !self.released
    }

    /// Unmount and clean up. A failed unmount is logged and the handle is
    /// still considered released.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut command = Command::new(&self.unmount_helper);
        command
            .args(&self.unmount_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match run_with_timeout(&mut command, self.unmount_timeout) {
            Ok(Some(status)) if status.success() => {}
            Ok(Some(status)) => {
                warn!(vault = %self.vault_id, status = %status, "Unmount helper failed")
            }
            Ok(None) => warn!(vault = %self.vault_id, "Unmount helper timed out"),
            Err(e) => warn!(vault = %self.vault_id, error = %e, "Unmount helper could not run"),
        }

        if let Some(mut child) = self.child.take() {
            if !matches!(child.try_wait(), Ok(Some(_))) {
                let _ = child.kill();
            }
            let _ = child.wait();
        }

        // Only an empty directory is removed; a mount that failed to detach
        // must never have its decrypted contents deleted.
        if let Err(e) = fs::remove_dir(&self.mount_point) {
            warn!(
                vault = %self.vault_id,
                mount_point = %self.mount_point.display(),
                error = %e,
                "Could not remove mount point"
            );
        }
        info!(vault = %self.vault_id, "Vault unmounted");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.released {
            return Err(Error::Authentication);
        }
        Ok(())
    }

    fn resolve(&self, path: &VaultPath) -> Result<PathBuf> {
        self.ensure_open()?;
        confine(&path.to_fs_path(&self.mount_point), &self.canonical_root, path)
    }

    /// Resolve the parent of `path` (which must be an existing directory)
    /// and return it with the entry name.
    fn resolve_parent<'a>(&self, path: &'a VaultPath) -> Result<(PathBuf, &'a str)> {
        let (parent, name) = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => {
                return Err(Error::InvalidInput(
                    "Operation not allowed on the root".to_string(),
                ))
            }
        };
        let dir = require_dir(self.resolve(&parent)?, &parent)?;
        Ok((dir, name))
    }

    pub(crate) fn list_dir(&self, path: &VaultPath) -> Result<Vec<DirEntry>> {
        let dir = require_dir(self.resolve(path)?, path)?;

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                warn!(vault = %self.vault_id, dir = %path, "Skipping non UTF-8 entry name");
                continue;
            };
            if name.starts_with(TEMP_PREFIX) || validate_name(&name).is_err() {
                continue;
            }
            match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_dir() => entries.push(DirEntry::directory(path, name)),
                Ok(meta) => entries.push(DirEntry::file(path, name, meta.len())),
                Err(e) => debug!(vault = %self.vault_id, entry = %name, error = %e, "Skipping unreadable entry"),
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
        let size = file.metadata()?.len();
        Ok(FileStream {
            size,
            reader: Box::new(file),
        })
    }

    pub(crate) fn write_file(&self, path: &VaultPath, data: &[u8]) -> Result<u64> {
        let (dir, name) = self.resolve_parent(path)?;
        let target = dir.join(name);
        if target.is_dir() {
            return Err(Error::IsADirectory(path.to_string()));
        }

        write_atomic(&dir, &target, |writer| Ok(writer.write_all(data)?))?;
        Ok(data.len() as u64)
    }

    pub(crate) fn make_dir(&self, path: &VaultPath) -> Result<()> {
        let (dir, name) = self.resolve_parent(path)?;
        fs::create_dir(dir.join(name)).map_err(|e| Error::from_io(e, &path.to_string()))
    }

    pub(crate) fn move_file(&self, source: &VaultPath, destination_dir: &VaultPath) -> Result<VaultPath> {
        let (_, name) = self.resolve_parent(source)?;
        let source_path = self.resolve(source)?;
        if source_path.is_dir() {
            return Err(Error::IsADirectory(source.to_string()));
        }

        let dest_dir = require_dir(self.resolve(destination_dir)?, destination_dir)?;
        let destination = destination_dir.join(name)?;
        let target = dest_dir.join(name);
        if target.symlink_metadata().is_ok() {
            return Err(Error::AlreadyExists(destination.to_string()));
        }

        fs::rename(&source_path, &target)?;
        Ok(destination)
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Run a command, killing it if it outlives `timeout`. `Ok(None)` means the
/// timeout was hit.
fn run_with_timeout(command: &mut Command, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let mut child = retry_exec_busy(|| command.spawn())?;
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(UNMOUNT_POLL_INTERVAL);
    }
}
