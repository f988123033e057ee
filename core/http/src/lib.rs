//! VaultGate HTTP surface.
//!
//! A JSON API over [`vaultgate_app::BrowsingService`]. Handlers are async;
//! vault work runs on the blocking pool.

pub mod cookies;
pub mod error;
pub mod routes;
pub mod server;

pub use cookies::{SessionToken, SESSION_COOKIE};
pub use error::ApiError;
pub use routes::{router, AppState};
pub use server::{run, serve, shutdown_signal, spawn_sweeper};
