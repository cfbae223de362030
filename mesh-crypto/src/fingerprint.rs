//! Public-key fingerprinting for display/debugging (never the private key).

use sha2::{Digest, Sha256};

pub fn generate_fingerprint(public_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_hex_sha256() {
        let fp = generate_fingerprint(&[0u8; 32]);
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, generate_fingerprint(&[0u8; 32]));
    }
}
