//! Cryptographic primitives for VaultGate's in-process vault format.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - A key hierarchy rooted at the passphrase-derived master key
//! - Deterministic filename encryption
//! - Block-wise content encryption that decrypts on demand
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod content;
pub mod kdf;
pub mod keys;
pub mod names;

pub use aead::{decrypt, encrypt};
pub use content::{encrypt_content, read_header, unwrap_io, ContentHeader, ContentReader};
pub use kdf::{derive_key, KdfParams};
pub use keys::{ContentKey, MasterKey, NameKey, Salt};
pub use names::{decrypt_name, encrypt_name};
