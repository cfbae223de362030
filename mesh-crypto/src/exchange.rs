//! X25519 key exchange and HKDF-SHA256 key derivation.
//!
//! The teacher pulls in `x25519-dalek` explicitly for "ephemeral key
//! exchange (forward secrecy)" and `hkdf` generically over the hash; we
//! specialize it to SHA-256 per spec.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};

use crate::error::{CryptoError, Result};

pub const SHARED_SECRET_LEN: usize = 32;
pub const DERIVED_KEY_LEN: usize = 32;

/// An X25519 key exchange keypair, distinct from the Ed25519 identity key.
pub struct ExchangeKeyPair {
    secret: StaticSecret,
    pub public: [u8; 32],
}

impl ExchangeKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = XPublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    /// Derive an X25519 exchange keypair from an Ed25519 seed so a peer
    /// only needs to manage a single identity seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*seed);
        let public = XPublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    pub fn diffie_hellman(&self, peer_public: &[u8; 32]) -> [u8; SHARED_SECRET_LEN] {
        let peer = XPublicKey::from(*peer_public);
        self.secret.diffie_hellman(&peer).to_bytes()
    }
}

/// HKDF-SHA256 over a shared secret, with a caller-supplied `info` label
/// for domain separation (e.g. `b"sovereign-mesh-session-v1"`).
pub fn derive_key(shared_secret: &[u8], info: &[u8]) -> Result<[u8; DERIVED_KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut out = [0u8; DERIVED_KEY_LEN];
    hk.expand(info, &mut out)
        .map_err(|_| CryptoError::InvalidKey { reason: "HKDF output too long".into() })?;
    Ok(out)
}
