//! Common utilities and types shared across VaultGate crates.
//!
//! Everything that crosses a crate boundary lives here: the error taxonomy
//! that the HTTP layer maps to status codes, and the path and identifier
//! types every vault operation is keyed on.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DirEntry, Passphrase, VaultDescriptor, VaultId, VaultPath};
