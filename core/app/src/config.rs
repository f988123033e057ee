//! Application configuration.
//!
//! Loaded once at startup from a TOML file. The only environment override is
//! `SECRET_KEY`, so the signing secret can stay out of the file.

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rate_limit::RateLimitConfig;
use vaultgate_common::{Error, Result, VaultDescriptor};
use vaultgate_vault::{AdapterKind, MountConfig};

/// Environment variable overriding `secret_key`.
pub const SECRET_KEY_ENV_VAR: &str = "SECRET_KEY";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub secret_key: String,
    pub session_ttl_seconds: u64,
    /// Extend session expiry on every request.
    pub session_sliding: bool,
    pub sweep_interval_seconds: u64,
    pub max_upload_bytes: u64,
    pub max_download_bytes: Option<u64>,
    /// Build the directory index at login instead of listing live.
    pub enable_login_index_cache: bool,
    pub adapter: AdapterKind,
    /// Mark the session cookie `Secure` (serve behind TLS).
    pub cookie_secure: bool,
    pub rate_limit: RateLimitConfig,
    pub mount: MountConfig,
    pub vaults: Vec<VaultDescriptor>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            secret_key: String::new(),
            session_ttl_seconds: 1800,
            session_sliding: true,
            sweep_interval_seconds: 60,
            max_upload_bytes: 2048 * 1024 * 1024,
            max_download_bytes: None,
            enable_login_index_cache: true,
            adapter: AdapterKind::default(),
            cookie_secure: false,
            rate_limit: RateLimitConfig::default(),
            mount: MountConfig::default(),
            vaults: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load and validate the configuration file at `path`, applying the
    /// `SECRET_KEY` environment override.
    ///
    /// # Errors
    /// - `Config` if the file cannot be read, parsed or validated
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::parse(&text, std::env::var(SECRET_KEY_ENV_VAR).ok())?;
        debug!(path = %path.display(), vaults = config.vaults.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate TOML text. A non-empty `secret_override` replaces
    /// the file's `secret_key`.
    pub fn parse(text: &str, secret_override: Option<String>) -> Result<Self> {
        let mut config: Self =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(secret) = secret_override.filter(|s| !s.is_empty()) {
            config.secret_key = secret;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.secret_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "secret_key must be set (in the file or via {})",
                SECRET_KEY_ENV_VAR
            )));
        }
        if self.session_ttl_seconds == 0 {
            return Err(Error::Config("session_ttl_seconds must be positive".to_string()));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(Error::Config("sweep_interval_seconds must be positive".to_string()));
        }
        if self.rate_limit.window_seconds == 0 || self.rate_limit.max_failures == 0 {
            return Err(Error::Config(
                "rate_limit window_seconds and max_failures must be positive".to_string(),
            ));
        }
        if self.vaults.is_empty() {
            return Err(Error::Config("At least one vault must be configured".to_string()));
        }

        let mut seen = HashSet::new();
        for vault in &self.vaults {
            if vault.path.as_os_str().is_empty() {
                return Err(Error::Config(format!("Vault '{}' has an empty path", vault.id)));
            }
            if !seen.insert(&vault.id) {
                return Err(Error::Config(format!("Duplicate vault id '{}'", vault.id)));
            }
        }
        Ok(())
    }

    /// Find a configured vault by id.
    pub fn vault(&self, id: &str) -> Option<&VaultDescriptor> {
        self.vaults.iter().find(|v| v.id.as_str() == id)
    }
}
