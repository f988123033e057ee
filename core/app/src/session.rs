//! Session management.
//!
//! A session owns the vault handle opened at login and, optionally, the
//! directory index built from it. Handles are released exactly once: the
//! caller that removes a session from the store is the one that closes it,
//! whether that is logout, lazy expiry or the periodic sweep.
//!
//! Tokens handed to clients are `<id>.<tag>`, where the tag is a keyed
//! BLAKE2b of the id under a key derived from the server secret.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use blake2::digest::consts::U32;
use blake2::digest::{KeyInit, Mac};
use blake2::{Blake2b, Blake2bMac, Digest};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::clock::Clock;
use vaultgate_common::{Error, Result, VaultId};
use vaultgate_vault::{VaultHandle, VaultIndex};

const TOKEN_BYTES: usize = 32;
const SIGNING_LABEL: &[u8] = b"vaultgate/session/v1";

/// Mutable state of a session, guarded by the session's own lock.
#[derive(Debug)]
pub struct SessionState {
    pub handle: VaultHandle,
    pub index: Option<VaultIndex>,
}

/// One authenticated vault session.
pub struct Session {
    id: String,
    vault_id: VaultId,
    created_at: DateTime<Utc>,
    expires_at: Mutex<DateTime<Utc>>,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn vault_id(&self) -> &VaultId {
        &self.vault_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        *self.expires_at.lock()
    }

    /// A session is still usable at the instant it expires.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// Lock the session for one operation on its handle and index.
    ///
    /// Operations on one session are serialized; different sessions never
    /// contend.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    fn close(&self) {
        self.state.lock().handle.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("vault_id", &self.vault_id)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at())
            .finish_non_exhaustive()
    }
}

/// Session lifetime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub ttl: Duration,
    /// Extend the expiry on every authenticated request.
    pub sliding: bool,
}

/// Token-keyed store of live sessions.
pub struct SessionStore {
    signing_key: Zeroizing<[u8; 32]>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new(secret_key: &str, config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(SIGNING_LABEL);
        hasher.update(secret_key.as_bytes());

        let mut signing_key = Zeroizing::new([0u8; 32]);
        signing_key.copy_from_slice(&hasher.finalize());

        Self {
            signing_key,
            config,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sign(&self, id: &str) -> Result<[u8; 32]> {
        let mut mac = <Blake2bMac<U32> as KeyInit>::new_from_slice(self.signing_key.as_slice())
            .map_err(|e| Error::Crypto(format!("Invalid signing key: {}", e)))?;
        Mac::update(&mut mac, id.as_bytes());

        let mut tag = [0u8; 32];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }

    /// Split a client token into its session id, checking the signature in
    /// constant time.
    fn verify<'a>(&self, token: &'a str) -> Result<&'a str> {
        let (id, tag) = token.split_once('.').ok_or(Error::Authentication)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| Error::Authentication)?;
        let expected = self.sign(id)?;

        if bool::from(expected.as_slice().ct_eq(tag.as_slice())) {
            Ok(id)
        } else {
            Err(Error::Authentication)
        }
    }

    /// Register a new session and return its client token.
    pub fn create(
        &self,
        vault_id: VaultId,
        handle: VaultHandle,
        index: Option<VaultIndex>,
    ) -> Result<String> {
        let mut raw = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut raw);
        let id = URL_SAFE_NO_PAD.encode(raw);
        let token = format!("{}.{}", id, URL_SAFE_NO_PAD.encode(self.sign(&id)?));

        let now = self.clock.now();
        let session = Arc::new(Session {
            id: id.clone(),
            vault_id,
            created_at: now,
            expires_at: Mutex::new(now + self.config.ttl),
            state: Mutex::new(SessionState { handle, index }),
        });

        info!(vault = %session.vault_id, expires_at = %session.expires_at(), "Session created");
        self.sessions.lock().insert(id, session);
        Ok(token)
    }

    /// Look up a live session.
    ///
    /// An expired session found here is removed and released before the
    /// error is returned.
    ///
    /// # Errors
    /// - `Authentication` for malformed, forged, unknown or expired tokens
    pub fn get(&self, token: &str) -> Result<Arc<Session>> {
        let id = self.verify(token)?;
        let now = self.clock.now();

        let session = {
            let mut sessions = self.sessions.lock();
            let session = sessions.get(id).cloned().ok_or(Error::Authentication)?;
            if !session.is_expired(now) {
                return Ok(session);
            }
            sessions.remove(id);
            session
        };

        debug!(vault = %session.vault_id, "Session expired");
        session.close();
        Err(Error::Authentication)
    }

    /// Extend the session's expiry if sliding expiry is enabled.
    pub fn touch(&self, session: &Session) {
        if self.config.sliding {
            *session.expires_at.lock() = self.clock.now() + self.config.ttl;
        }
    }

    /// End a session. Returns `false` if the token named no live session.
    pub fn destroy(&self, token: &str) -> bool {
        let Ok(id) = self.verify(token) else {
            return false;
        };
        let removed = self.sessions.lock().remove(id);
        match removed {
            Some(session) => {
                session.close();
                let age = self.clock.now() - session.created_at();
                info!(vault = %session.vault_id, age_seconds = age.num_seconds(), "Session ended");
                true
            }
            None => false,
        }
    }

    /// Release every expired session. Returns how many were released.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.is_expired(now))
                .map(|s| s.id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            session.close();
            debug!(vault = %session.vault_id, "Swept expired session");
        }
        expired.len()
    }

    /// Release every session, for shutdown.
    pub fn close_all(&self) -> usize {
        let all: Vec<Arc<Session>> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &all {
            session.close();
        }
        if !all.is_empty() {
            info!(count = all.len(), "Closed all sessions");
        }
        all.len()
    }

    /// Number of sessions in the store, including expired ones not yet
    /// swept.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
