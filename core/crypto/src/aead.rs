//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 has a 24-byte nonce that is safe for random generation.
//! Content blocks carry associated data; filenames use a synthetic nonce.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use vaultgate_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

fn cipher(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Encrypt with a random nonce and no associated data.
///
/// Returns `nonce || ciphertext || tag`.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    encrypt_with_aad(key, plaintext, &[])
}

/// Decrypt `nonce || ciphertext || tag` produced by [`encrypt`].
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    decrypt_with_aad(key, ciphertext, &[])
}

/// Encrypt with a random nonce, authenticating `aad` alongside the plaintext.
///
/// Returns `nonce || ciphertext || tag`.
pub fn encrypt_with_aad(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt `nonce || ciphertext || tag`, verifying `aad`.
///
/// # Errors
/// - Ciphertext shorter than nonce + tag
/// - Authentication failure (wrong key, tampered data or mismatched `aad`)
pub fn decrypt_with_aad(key: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Crypto("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);
    cipher
        .decrypt(
            GenericArray::from_slice(nonce_bytes),
            Payload {
                msg: encrypted,
                aad,
            },
        )
        .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))
}

/// Encrypt with a caller-chosen nonce.
///
/// Only for deterministic encryption where the nonce is derived from the
/// plaintext itself (filenames). Reusing a nonce for different plaintexts
/// under one key breaks confidentiality.
pub fn encrypt_with_nonce(
    key: &[u8],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    cipher(key)?
        .encrypt(GenericArray::from_slice(nonce), plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
}

/// Decrypt ciphertext produced by [`encrypt_with_nonce`].
pub fn decrypt_with_nonce(
    key: &[u8],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::Crypto("Ciphertext too short".to_string()));
    }
    cipher(key)?
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [42u8; KEY_LENGTH];
        let ciphertext = encrypt(&key, b"Hello, World!").unwrap();
        assert_eq!(ciphertext.len(), NONCE_SIZE + 13 + TAG_SIZE);
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = encrypt(&[1u8; KEY_LENGTH], b"Secret data").unwrap();
        assert!(decrypt(&[2u8; KEY_LENGTH], &ciphertext).is_err());
    }

    #[test]
    fn test_aad_must_match() {
        let key = [7u8; KEY_LENGTH];
        let ciphertext = encrypt_with_aad(&key, b"block", b"index-0").unwrap();

        assert_eq!(
            decrypt_with_aad(&key, &ciphertext, b"index-0").unwrap(),
            b"block"
        );
        assert!(decrypt_with_aad(&key, &ciphertext, b"index-1").is_err());
        assert!(decrypt(&key, &ciphertext).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [42u8; KEY_LENGTH];
        let mut ciphertext = encrypt(&key, b"Important data").unwrap();
        ciphertext[NONCE_SIZE + 5] ^= 0xFF;
        assert!(decrypt(&key, &ciphertext).is_err());
    }

    #[test]
    fn test_short_inputs_rejected() {
        let key = [42u8; KEY_LENGTH];
        assert!(decrypt(&key, &[0u8; NONCE_SIZE]).is_err());
        assert!(encrypt(&[0u8; 16], b"data").is_err());
    }

    #[test]
    fn test_encrypt_with_nonce_is_deterministic() {
        let key = [42u8; KEY_LENGTH];
        let nonce = [1u8; NONCE_SIZE];

        let ct1 = encrypt_with_nonce(&key, &nonce, b"report.pdf").unwrap();
        let ct2 = encrypt_with_nonce(&key, &nonce, b"report.pdf").unwrap();
        assert_eq!(ct1, ct2);
        assert_eq!(decrypt_with_nonce(&key, &nonce, &ct1).unwrap(), b"report.pdf");
    }
}
