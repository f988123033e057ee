//! Failed-login throttling per client identity.
//!
//! A tumbling window: the first failure opens a window of fixed length, and
//! the window is discarded on the first access after it ends. Nothing runs
//! in the background; [`RateLimiter::sweep`] only reclaims memory.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::Clock;

/// Rate limit settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Failures allowed inside one window before logins are refused.
    pub max_failures: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitRecord {
    failure_count: u32,
    window_start: DateTime<Utc>,
}

/// Tracks failed logins keyed by client identity.
pub struct RateLimiter {
    max_failures: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_failures: config.max_failures,
            window: Duration::seconds(config.window_seconds.min(i64::MAX as u64) as i64),
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn expired(&self, record: &RateLimitRecord, now: DateTime<Utc>) -> bool {
        now >= record.window_start + self.window
    }

    /// Whether `identity` may attempt a login now. Does not modify state.
    pub fn check(&self, identity: &str) -> bool {
        let now = self.clock.now();
        match self.records.lock().get(identity) {
            Some(record) if !self.expired(record, now) => record.failure_count < self.max_failures,
            _ => true,
        }
    }

    /// Count a failed login, starting a new window if the old one ended.
    pub fn record_failure(&self, identity: &str) {
        let now = self.clock.now();
        let mut records = self.records.lock();
        let record = records
            .entry(identity.to_string())
            .or_insert(RateLimitRecord {
                failure_count: 0,
                window_start: now,
            });
        if self.expired(record, now) {
            *record = RateLimitRecord {
                failure_count: 0,
                window_start: now,
            };
        }

        record.failure_count = record.failure_count.saturating_add(1);
        if record.failure_count == self.max_failures {
            warn!(identity = %identity, failures = record.failure_count, "Login rate limit reached");
        }
    }

    /// Forget the failures of `identity` after a successful login.
    pub fn record_success(&self, identity: &str) {
        self.records.lock().remove(identity);
    }

    /// Drop records whose window has ended. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| !self.expired(record, now));
        before - records.len()
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.records.lock().len()
    }
}
