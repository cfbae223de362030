//! Identity vault contract (spec §6, external collaborator).
//!
//! Out of scope for cryptographic strength; the core only requires that
//! private keys never leave the process image, so this trait hands back
//! owned bytes rather than any form of serialized blob.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct StoredIdentity {
    pub public_key: [u8; 32],
    pub private_key: [u8; 32],
    pub fingerprint: String,
    pub display_name: Option<String>,
}

#[async_trait]
pub trait IdentityVault: Send + Sync {
    async fn load_identity(&self) -> anyhow::Result<Option<StoredIdentity>>;
    async fn save_identity(&self, identity: StoredIdentity) -> anyhow::Result<()>;
    async fn delete_identity(&self) -> anyhow::Result<()>;
}
