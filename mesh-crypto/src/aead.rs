//! Authenticated encryption for message payloads.
//!
//! Same crate the teacher already depends on for `ChaCha20Poly1305`; the
//! `XChaCha20Poly1305` member of `chacha20poly1305` gives us the 24-byte
//! nonce spec §4.1 calls for without adding a dependency.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::{CryptoError, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;

/// Encrypt `plaintext` under `key`, generating a fresh random nonce and
/// prefixing it to the ciphertext (spec: "randomly generated 24-byte nonce
/// per message, prefixed to ciphertext").
pub fn encrypt_envelope(plaintext: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::DecryptAuthFail)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an envelope produced by [`encrypt_envelope`].
pub fn decrypt_envelope(envelope: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>> {
    if envelope.len() < NONCE_LEN {
        return Err(CryptoError::InvalidKey { reason: "envelope shorter than nonce".into() });
    }
    let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptAuthFail)
}

/// Tracks (sender, counter) pairs to flag nonce reuse, matching spec's
/// "reuse detection on decrypt side via (sender, counter) table optional".
#[derive(Default)]
pub struct NonceReuseGuard {
    seen: std::collections::HashSet<(Vec<u8>, u64)>,
}

impl NonceReuseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Err(NonceReuse)` if this (sender, counter) pair was already
    /// observed, otherwise records it and returns `Ok(())`.
    pub fn check_and_record(&mut self, sender: &[u8], counter: u64) -> Result<()> {
        let key = (sender.to_vec(), counter);
        if self.seen.contains(&key) {
            return Err(CryptoError::NonceReuse);
        }
        self.seen.insert(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = [9u8; KEY_LEN];
        let plaintext = b"hello mesh";
        let envelope = encrypt_envelope(plaintext, &key).unwrap();
        let decrypted = decrypt_envelope(&envelope, &key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let key = [9u8; KEY_LEN];
        let mut envelope = encrypt_envelope(b"hello mesh", &key).unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0xFF;
        assert_eq!(decrypt_envelope(&envelope, &key).unwrap_err(), CryptoError::DecryptAuthFail);
    }

    #[test]
    fn nonce_reuse_guard_flags_repeats() {
        let mut guard = NonceReuseGuard::new();
        guard.check_and_record(b"peer-a", 1).unwrap();
        assert_eq!(guard.check_and_record(b"peer-a", 1).unwrap_err(), CryptoError::NonceReuse);
        assert!(guard.check_and_record(b"peer-a", 2).is_ok());
    }
}
