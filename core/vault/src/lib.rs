//! Vault access for VaultGate.
//!
//! This module provides:
//! - [`VaultAdapter`], one interface over two unlocking strategies: an
//!   external mount helper or in-process decryption
//! - [`VaultHandle`], an unlocked vault that releases itself exactly once
//! - [`VaultIndex`], a directory snapshot built at login
//!
//! # Architecture
//! Everything here is synchronous and may block on process spawning, disk
//! I/O or key derivation; async callers should hand work to a blocking pool.

pub mod adapter;
pub mod format;
pub mod handle;
pub mod inprocess;
pub mod mount;
pub mod tree;

pub use adapter::{AdapterKind, VaultAdapter};
pub use handle::{FileStream, VaultHandle};
pub use inprocess::{DecryptHandle, InProcessDecryptAdapter};
pub use mount::{MountConfig, MountHandle, ProcessMountAdapter, PASSPHRASE_ENV_VAR};
pub use tree::{DirectoryNode, IndexEntry, VaultIndex};
