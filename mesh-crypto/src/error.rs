use std::fmt;

/// Cryptographic failures surfaced to callers in `mesh-core`.
///
/// Mirrors the error-taxonomy style used throughout the teacher pack's
/// handshake module: a flat tagged enum with a manual `Display` rather than
/// a derive macro, so every variant can carry exactly the context it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// A signature was not exactly 64 bytes.
    BadSignatureLen { got: usize },
    /// A key was malformed or the wrong length for its algorithm.
    InvalidKey { reason: String },
    /// AEAD decryption failed authentication.
    DecryptAuthFail,
    /// A nonce was reused for the same sender/counter pair.
    NonceReuse,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::BadSignatureLen { got } => {
                write!(f, "signature must be 64 bytes, got {got}")
            }
            CryptoError::InvalidKey { reason } => write!(f, "invalid key: {reason}"),
            CryptoError::DecryptAuthFail => write!(f, "AEAD authentication failed"),
            CryptoError::NonceReuse => write!(f, "nonce reuse detected"),
        }
    }
}

impl std::error::Error for CryptoError {}

pub type Result<T> = std::result::Result<T, CryptoError>;
