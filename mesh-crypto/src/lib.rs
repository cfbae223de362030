//! Cryptographic primitives for the Sovereign Communications mesh core.
//!
//! Identity generation, signing/verification, key exchange, key derivation,
//! authenticated encryption, and fingerprinting — the building blocks the
//! wire codec and relay engine in `mesh-core` build on.

pub mod aead;
pub mod error;
pub mod exchange;
pub mod fingerprint;
pub mod identity;
pub mod session;

pub use aead::{decrypt_envelope, encrypt_envelope, NonceReuseGuard};
pub use error::CryptoError;
pub use exchange::{derive_key, ExchangeKeyPair};
pub use fingerprint::generate_fingerprint;
pub use identity::{verify, Identity, PUBLIC_KEY_LEN, SIGNATURE_LEN};
pub use session::SessionKeyState;
