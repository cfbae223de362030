use std::fmt;

/// Tagged error kinds for the mesh core (spec §7).
///
/// Manual `Display`/`Error` impls in the style of
/// `lib-network::handshake::HandshakeError` rather than `thiserror` — the
/// teacher's networking crate never pulls in `thiserror`, so neither do we.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    InvalidMessage { reason: String },
    BadSignature,
    DecryptionFailed,
    TtlExpired,
    Duplicate,
    UnknownPeer { peer_id: String },
    PeerBlacklisted { peer_id: String },
    RateLimited,
    QuotaExceeded { reason: String },
    TransportError { reason: String },
    Timeout,
    Cancelled,
    PersistenceError { reason: String },
    FragmentReassemblyFailed { reason: String },
    ConfigInvalid { reason: String },
    NotInitialized,
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::InvalidMessage { reason } => write!(f, "invalid message: {reason}"),
            MeshError::BadSignature => write!(f, "signature verification failed"),
            MeshError::DecryptionFailed => write!(f, "decryption failed"),
            MeshError::TtlExpired => write!(f, "message ttl expired"),
            MeshError::Duplicate => write!(f, "duplicate message"),
            MeshError::UnknownPeer { peer_id } => write!(f, "unknown peer: {peer_id}"),
            MeshError::PeerBlacklisted { peer_id } => write!(f, "peer blacklisted: {peer_id}"),
            MeshError::RateLimited => write!(f, "rate limited"),
            MeshError::QuotaExceeded { reason } => write!(f, "quota exceeded: {reason}"),
            MeshError::TransportError { reason } => write!(f, "transport error: {reason}"),
            MeshError::Timeout => write!(f, "operation timed out"),
            MeshError::Cancelled => write!(f, "operation cancelled"),
            MeshError::PersistenceError { reason } => write!(f, "persistence error: {reason}"),
            MeshError::FragmentReassemblyFailed { reason } => {
                write!(f, "fragment reassembly failed: {reason}")
            }
            MeshError::ConfigInvalid { reason } => write!(f, "invalid configuration: {reason}"),
            MeshError::NotInitialized => write!(f, "mesh network not initialized"),
        }
    }
}

impl std::error::Error for MeshError {}

impl From<mesh_crypto::CryptoError> for MeshError {
    fn from(e: mesh_crypto::CryptoError) -> Self {
        use mesh_crypto::CryptoError::*;
        match e {
            BadSignatureLen { .. } => MeshError::BadSignature,
            DecryptAuthFail => MeshError::DecryptionFailed,
            NonceReuse => MeshError::DecryptionFailed,
            InvalidKey { reason } => MeshError::InvalidMessage { reason },
        }
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;

/// Outcome of [`crate::mesh::MeshNetwork::send`] (spec §7 "send returns
/// success, retryable-failure, or permanent-failure").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    RetryableFailure(MeshError),
    PermanentFailure(MeshError),
}
