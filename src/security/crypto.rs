//! Opaque token generation and hashing.
//!
//! Raw tokens (CSRF secrets, reset tokens) are only ever returned to the
//! client; the store keeps the SHA-256 digest and lookups go through the hash.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const TOKEN_BYTES: usize = 32;

/// 32 random bytes, base64url without padding.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Compare a presented raw token against a stored digest in constant time.
#[must_use]
pub fn token_matches(token: &str, stored_hash: &[u8]) -> bool {
    let presented = hash_token(token);
    presented.as_slice().ct_eq(stored_hash).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn generated_tokens_are_32_bytes_and_unique() -> Result<()> {
        let first = generate_token()?;
        let second = generate_token()?;
        assert_eq!(URL_SAFE_NO_PAD.decode(first.as_bytes())?.len(), 32);
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn token_matches_only_its_own_hash() {
        let stored = hash_token("token");
        assert!(token_matches("token", &stored));
        assert!(!token_matches("other", &stored));
        assert!(!token_matches("token", &stored[..16]));
    }
}
