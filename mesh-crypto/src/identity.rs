//! Ed25519 identity: keypair generation, signing, verification.
//!
//! Generalized from the teacher's `lib-crypto::classical::ed25519` helpers,
//! trimmed to the 32/64-byte raw forms the wire header (`senderId`,
//! `signature`) expects.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

use crate::error::{CryptoError, Result};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// A locally generated mesh identity. The private key is zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Identity {
    #[zeroize(skip)]
    pub public: [u8; PUBLIC_KEY_LEN],
    private: [u8; PUBLIC_KEY_LEN],
}

impl Identity {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            public: signing_key.verifying_key().to_bytes(),
            private: signing_key.to_bytes(),
        }
    }

    /// Deterministic identity from a 32-byte seed, used by tests that need
    /// stable peer ids across runs.
    pub fn from_seed(seed: &[u8; PUBLIC_KEY_LEN]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self {
            public: signing_key.verifying_key().to_bytes(),
            private: signing_key.to_bytes(),
        }
    }

    pub fn private_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.private
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let signing_key = SigningKey::from_bytes(&self.private);
        signing_key.sign(message).to_bytes()
    }

    pub fn fingerprint(&self) -> String {
        crate::fingerprint::generate_fingerprint(&self.public)
    }
}

/// Verify a detached signature. Constant-time: `ed25519-dalek`'s `verify`
/// rejects malformed signatures without branching on message content.
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8; PUBLIC_KEY_LEN]) -> Result<bool> {
    if signature.len() != SIGNATURE_LEN {
        return Err(CryptoError::BadSignatureLen { got: signature.len() });
    }
    let mut sig_bytes = [0u8; SIGNATURE_LEN];
    sig_bytes.copy_from_slice(signature);
    let sig = Signature::from_bytes(&sig_bytes);

    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| CryptoError::InvalidKey { reason: e.to_string() })?;

    Ok(verifying_key.verify(message, &sig).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let id = Identity::generate();
        let msg = b"sovereign mesh test message";
        let sig = id.sign(msg);
        assert!(verify(msg, &sig, &id.public).unwrap());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let id = Identity::generate();
        let sig = id.sign(b"hello");
        assert!(!verify(b"hellp", &sig, &id.public).unwrap());
    }

    #[test]
    fn bad_signature_length_is_rejected() {
        let id = Identity::generate();
        let err = verify(b"hello", &[0u8; 10], &id.public).unwrap_err();
        assert_eq!(err, CryptoError::BadSignatureLen { got: 10 });
    }

    #[test]
    fn seeded_identities_are_deterministic() {
        let seed = [7u8; 32];
        let a = Identity::from_seed(&seed);
        let b = Identity::from_seed(&seed);
        assert_eq!(a.public, b.public);
    }
}
