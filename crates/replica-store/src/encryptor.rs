//! Message body transform applied at write and read time.

use replica_shared::crypto::{self, SymmetricKey};
use tracing::warn;

/// Turns message text into the bytes stored in the `message` column and back.
///
/// Implementations must never fail outright: the store has no error channel
/// towards its callers, so a body that cannot be decoded reads as empty.
pub trait MessageEncryptor: Send + Sync {
    /// `secret_chat` is set for bodies of secret-chat messages.
    fn encrypt(&self, text: &str, secret_chat: bool) -> Vec<u8>;
    fn decrypt(&self, stored: &[u8]) -> String;
}

/// Stores bodies as UTF-8. Used when no encryptor is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainEncryptor;

impl MessageEncryptor for PlainEncryptor {
    fn encrypt(&self, text: &str, _secret_chat: bool) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    fn decrypt(&self, stored: &[u8]) -> String {
        String::from_utf8_lossy(stored).into_owned()
    }
}

/// Seals bodies with XChaCha20-Poly1305.
///
/// Rows written before the key was configured are still plain text and are
/// read back as such.
pub struct SealingEncryptor {
    key: SymmetricKey,
}

impl SealingEncryptor {
    pub fn new(key: SymmetricKey) -> Self {
        Self { key }
    }

    /// Derive the body key from an application secret.
    pub fn from_secret(secret: &[u8]) -> Self {
        Self::new(crypto::derive_body_key(secret))
    }
}

impl MessageEncryptor for SealingEncryptor {
    fn encrypt(&self, text: &str, _secret_chat: bool) -> Vec<u8> {
        match crypto::seal(&self.key, text.as_bytes()) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(error = %e, "failed to seal message body, storing plain text");
                text.as_bytes().to_vec()
            }
        }
    }

    fn decrypt(&self, stored: &[u8]) -> String {
        if !crypto::is_sealed(stored) {
            return String::from_utf8_lossy(stored).into_owned();
        }
        match crypto::open(&self.key, stored) {
            Ok(plain) => String::from_utf8_lossy(&plain).into_owned(),
            Err(e) => {
                warn!(error = %e, "failed to open message body");
                String::new()
            }
        }
    }
}
