//! Message body sealing for data at rest.
//!
//! Only the sealing format lives here; key management stays with the caller.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{KDF_CONTEXT_BODY_KEY, NONCE_SIZE, SEALED_BODY_MAGIC};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns magic || nonce || ciphertext
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output =
        Vec::with_capacity(SEALED_BODY_MAGIC.len() + NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(SEALED_BODY_MAGIC);
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// True when `data` carries the sealed-body marker.
pub fn is_sealed(data: &[u8]) -> bool {
    data.starts_with(SEALED_BODY_MAGIC)
}

pub fn open(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if !is_sealed(data) {
        return Err(CryptoError::NotSealed);
    }
    let data = &data[SEALED_BODY_MAGIC.len()..];
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// BLAKE3 KDF with domain separation
pub fn derive_body_key(secret: &[u8]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_BODY_KEY);
    hasher.update(secret);
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = generate_symmetric_key();
        let plaintext = "meet at noon".as_bytes();

        let sealed = seal(&key, plaintext).unwrap();
        assert!(is_sealed(&sealed));
        assert_eq!(open(&key, &sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&generate_symmetric_key(), b"Secret message").unwrap();
        assert!(open(&generate_symmetric_key(), &sealed).is_err());
    }

    #[test]
    fn test_plaintext_is_not_sealed() {
        let key = generate_symmetric_key();
        assert!(matches!(open(&key, b"hello"), Err(CryptoError::NotSealed)));
    }

    #[test]
    fn test_truncated_body_fails() {
        let key = generate_symmetric_key();
        let mut data = SEALED_BODY_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 4]);
        assert!(matches!(open(&key, &data), Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_body_key_derivation_deterministic() {
        assert_eq!(derive_body_key(b"pass"), derive_body_key(b"pass"));
        assert_ne!(derive_body_key(b"pass"), derive_body_key(b"other"));
    }
}
