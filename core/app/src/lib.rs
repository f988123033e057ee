//! Application layer for VaultGate.
//!
//! Ties vault access to authenticated sessions:
//! - [`BrowsingService`]: login, browse, download, upload
//! - [`SessionStore`]: signed tokens, expiry, exactly-once handle release
//! - [`RateLimiter`]: failed-login throttling per client
//! - [`AppConfig`]: the TOML configuration file
//!
//! Stores take an injected [`Clock`] and own their locks; nothing here is a
//! global.

pub mod browsing;
pub mod clock;
pub mod config;
pub mod rate_limit;
pub mod session;

pub use browsing::{BrowseOptions, BrowsingService, SweepReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, SECRET_KEY_ENV_VAR};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use session::{Session, SessionConfig, SessionState, SessionStore};
