//! Deterministic filename encryption.
//!
//! A name encrypts to the same string every time under the same directory
//! key, so a plaintext path can be resolved to its ciphertext path one
//! component at a time without listing directories. The nonce is a keyed
//! BLAKE2b of the name (synthetic IV) and is checked again on decryption.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use blake2::digest::consts::U24;
use blake2::{Blake2b, Digest};

use crate::aead::{decrypt_with_nonce, encrypt_with_nonce, NONCE_SIZE, TAG_SIZE};
use crate::keys::NameKey;
use vaultgate_common::{Error, Result};

/// Longest plaintext name accepted, keeping the encoded form under the
/// 255-byte limit of common filesystems.
pub const MAX_NAME_LENGTH: usize = 140;

fn synthetic_nonce(key: &NameKey, name: &[u8]) -> [u8; NONCE_SIZE] {
    let mut hasher = Blake2b::<U24>::new();
    hasher.update(key.as_bytes());
    hasher.update(name);

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&hasher.finalize());
    nonce
}

/// Encrypt `name` into a filesystem-safe string.
///
/// # Errors
/// - `InvalidInput` if the name is longer than [`MAX_NAME_LENGTH`] bytes
pub fn encrypt_name(key: &NameKey, name: &str) -> Result<String> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Name longer than {} bytes",
            MAX_NAME_LENGTH
        )));
    }

    let nonce = synthetic_nonce(key, name.as_bytes());
    let ciphertext = encrypt_with_nonce(key.as_bytes(), &nonce, name.as_bytes())?;

    let mut raw = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    raw.extend_from_slice(&nonce);
    raw.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

/// Decrypt a name produced by [`encrypt_name`] under the same key.
///
/// # Errors
/// - `Crypto` if the encoding is invalid, authentication fails, or the
///   embedded nonce does not match the decrypted name
pub fn decrypt_name(key: &NameKey, encoded: &str) -> Result<String> {
    let raw = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| Error::Crypto(format!("Invalid name encoding: {}", e)))?;
    if raw.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Crypto("Encrypted name too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);

    let plaintext = decrypt_with_nonce(key.as_bytes(), &nonce, ciphertext)?;
    if synthetic_nonce(key, &plaintext) != nonce {
        return Err(Error::Crypto("Name nonce mismatch".to_string()));
    }

    String::from_utf8(plaintext).map_err(|_| Error::Crypto("Name is not UTF-8".to_string()))
}
