//! Browsing service: login, listing, download and upload on top of the
//! adapter, the session store and the rate limiter.
//!
//! Every method is synchronous and may block on vault I/O.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::rate_limit::RateLimiter;
use crate::session::{Session, SessionConfig, SessionStore};
use vaultgate_common::{
    types::validate_name, DirEntry, Error, Passphrase, Result, VaultDescriptor, VaultId, VaultPath,
};
use vaultgate_vault::{DirectoryNode, FileStream, VaultAdapter};

/// Size limits and caching behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowseOptions {
    pub enable_index_cache: bool,
    pub max_upload_bytes: u64,
    pub max_download_bytes: Option<u64>,
}

/// Result of one periodic sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_released: usize,
    pub rate_records_pruned: usize,
}

/// Orchestrates vault access for authenticated sessions.
pub struct BrowsingService {
    vaults: BTreeMap<VaultId, VaultDescriptor>,
    adapter: VaultAdapter,
    sessions: SessionStore,
    limiter: RateLimiter,
    options: BrowseOptions,
}

impl BrowsingService {
    pub fn new(
        vaults: Vec<VaultDescriptor>,
        adapter: VaultAdapter,
        sessions: SessionStore,
        limiter: RateLimiter,
        options: BrowseOptions,
    ) -> Self {
        Self {
            vaults: vaults.into_iter().map(|v| (v.id.clone(), v)).collect(),
            adapter,
            sessions,
            limiter,
            options,
        }
    }

    /// Build the service described by `config` on the wall clock.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    /// Build the service described by `config` on an injected clock.
    pub fn from_config_with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let sessions = SessionStore::new(
            &config.secret_key,
            SessionConfig {
                ttl: Duration::seconds(config.session_ttl_seconds.min(i64::MAX as u64) as i64),
                sliding: config.session_sliding,
            },
            clock.clone(),
        );
        Self::new(
            config.vaults.clone(),
            VaultAdapter::from_kind(config.adapter, config.mount.clone()),
            sessions,
            RateLimiter::new(config.rate_limit, clock),
            BrowseOptions {
                enable_index_cache: config.enable_login_index_cache,
                max_upload_bytes: config.max_upload_bytes,
                max_download_bytes: config.max_download_bytes,
            },
        )
    }

    pub fn options(&self) -> &BrowseOptions {
        &self.options
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Configured vault ids, sorted.
    pub fn vault_ids(&self) -> Vec<&VaultId> {
        self.vaults.keys().collect()
    }

    /// Authenticate against a vault and start a session.
    ///
    /// An unknown vault is indistinguishable from a wrong passphrase. Only
    /// authentication failures count against `identity`'s rate limit.
    ///
    /// # Errors
    /// - `RateLimited` if `identity` has too many recent failures
    /// - `Authentication` on an unknown vault or wrong passphrase
    /// - `VaultUnavailable`, `VaultBusy` or `MountTimeout` from the adapter
    pub fn login(&self, vault_id: &str, passphrase: &Passphrase, identity: &str) -> Result<String> {
        if !self.limiter.check(identity) {
            warn!(identity = %identity, "Login refused by rate limit");
            return Err(Error::RateLimited);
        }

        let vault = VaultId::new(vault_id)
            .ok()
            .and_then(|id| self.vaults.get(&id));
        let Some(vault) = vault else {
            self.limiter.record_failure(identity);
            warn!(identity = %identity, "Login to unknown vault");
            return Err(Error::Authentication);
        };

        let mut handle = match self.adapter.open(vault, passphrase) {
            Ok(handle) => handle,
            Err(Error::Authentication) => {
                self.limiter.record_failure(identity);
                warn!(vault = %vault.id, identity = %identity, "Login failed");
                return Err(Error::Authentication);
            }
            Err(e) => return Err(e),
        };

        let index = if self.options.enable_index_cache {
            match self.adapter.build_index(&handle) {
                Ok(index) => Some(index),
                Err(e) => {
                    self.adapter.close(&mut handle);
                    return Err(e);
                }
            }
        } else {
            None
        };

        self.limiter.record_success(identity);
        let entries = index.as_ref().map(|i| i.len());
        let token = self.sessions.create(vault.id.clone(), handle, index)?;
        info!(vault = %vault.id, indexed_entries = ?entries, "Login succeeded");
        Ok(token)
    }

    /// End the session behind `token`. Unknown tokens are ignored.
    pub fn logout(&self, token: &str) {
        self.sessions.destroy(token);
    }

    /// Resolve and touch the session behind `token`. Every operation calls
    /// this before looking at its arguments, so callers without a session
    /// always see `Authentication`.
    fn session(&self, token: &str) -> Result<Arc<Session>> {
        let session = self.sessions.get(token)?;
        self.sessions.touch(&session);
        Ok(session)
    }

    /// List a directory, from the session's index if it has one.
    ///
    /// # Errors
    /// - `Authentication` if the token is not a live session
    /// - `NotFound` or `PathTraversal`
    pub fn browse(&self, token: &str, path: &str) -> Result<Vec<DirEntry>> {
        let session = self.session(token)?;
        let path = parse_path(path)?;

        let state = session.lock();
        match &state.index {
            Some(index) => index.list(&path),
            None => self.adapter.list_dir(&state.handle, &path),
        }
    }

    /// Open a file for download.
    ///
    /// # Errors
    /// - `PayloadTooLarge` if the file exceeds `max_download_bytes`
    /// - `NotFound`, `IsADirectory` or `PathTraversal`
    pub fn fetch(&self, token: &str, path: &str) -> Result<FileStream> {
        let session = self.session(token)?;
        let path = parse_path(path)?;
        let stream = self.adapter.read_file(&session.lock().handle, &path)?;

        if let Some(limit) = self.options.max_download_bytes {
            if stream.size > limit {
                return Err(Error::PayloadTooLarge {
                    size: stream.size,
                    limit,
                });
            }
        }
        debug!(path = %path, size = stream.size, "Serving file");
        Ok(stream)
    }

    /// Store `data` as `name` inside `dir`, replacing an existing file.
    ///
    /// # Errors
    /// - `PayloadTooLarge` before the vault is touched if `data` is too big
    /// - `InvalidInput` if `name` is not a single path component
    /// - `NotFound` if `dir` does not exist
    pub fn upload(&self, token: &str, dir: &str, name: &str, data: &[u8]) -> Result<DirEntry> {
        let session = self.session(token)?;
        let size = data.len() as u64;
        if size > self.options.max_upload_bytes {
            return Err(Error::PayloadTooLarge {
                size,
                limit: self.options.max_upload_bytes,
            });
        }
        validate_name(name)?;
        let dir = parse_path(dir)?;
        let path = dir.join(name)?;

        let mut state = session.lock();
        let written = self.adapter.write_file(&state.handle, &path, data)?;
        if let Some(index) = state.index.as_mut() {
            if let Err(e) = index.insert_file(&path, written) {
                debug!(path = %path, error = %e, "Index not updated after upload");
            }
        }

        info!(vault = %session.vault_id(), path = %path, size = written, "File uploaded");
        Ok(DirEntry::file(&dir, name, written))
    }

    /// Create a directory.
    pub fn make_dir(&self, token: &str, path: &str) -> Result<DirEntry> {
        let session = self.session(token)?;
        let path = parse_path(path)?;
        let (parent, name) = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => (parent, name.to_string()),
            _ => return Err(Error::AlreadyExists(path.to_string())),
        };

        let mut state = session.lock();
        self.adapter.make_dir(&state.handle, &path)?;
        if let Some(index) = state.index.as_mut() {
            if let Err(e) = index.insert_directory(&path) {
                debug!(path = %path, error = %e, "Index not updated after mkdir");
            }
        }

        info!(path = %path, "Directory created");
        Ok(DirEntry::directory(&parent, name))
    }

    /// Move a file into another directory. Returns its new path.
    pub fn move_file(&self, token: &str, source: &str, destination_dir: &str) -> Result<VaultPath> {
        let session = self.session(token)?;
        let source = parse_path(source)?;
        let destination_dir = parse_path(destination_dir)?;

        let mut state = session.lock();
        let moved = self
            .adapter
            .move_file(&state.handle, &source, &destination_dir)?;
        if let Some(index) = state.index.as_mut() {
            if let Err(e) = index.move_entry(&source, &destination_dir) {
                debug!(path = %source, error = %e, "Index not updated after move");
            }
        }

        info!(from = %source, to = %moved, "File moved");
        Ok(moved)
    }

    /// Directory tree from the session's index, if one was built.
    pub fn tree(&self, token: &str) -> Result<Option<DirectoryNode>> {
        let session = self.session(token)?;
        let state = session.lock();
        Ok(state.index.as_ref().map(|index| index.directories()))
    }

    /// Release expired sessions and prune stale rate-limit records.
    pub fn sweep(&self) -> SweepReport {
        let report = SweepReport {
            sessions_released: self.sessions.sweep(),
            rate_records_pruned: self.limiter.sweep(),
        };
        if report.sessions_released > 0 {
            info!(released = report.sessions_released, "Released expired sessions");
        }
        report
    }

    /// Release every session, for shutdown.
    pub fn shutdown(&self) -> usize {
        self.sessions.close_all()
    }
}

fn parse_path(raw: &str) -> Result<VaultPath> {
    VaultPath::parse(raw).inspect_err(|e| {
        if let Error::PathTraversal(_) = e {
            warn!(path = %raw, "Path traversal attempt rejected");
        }
    })
}
