//! Argon2id hashing on a bounded blocking pool.
//!
//! Hashing is CPU-bound, so each call runs under `spawn_blocking` and must
//! first take a permit from a semaphore sized to the configured worker count.
//! Requests beyond that wait for a permit instead of starving the runtime.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, info_span};

/// OWASP recommended Argon2id cost: m=19456 KiB, t=2, p=1.
const MEMORY_KIB: u32 = 19_456;
const ITERATIONS: u32 = 2;
const PARALLELISM: u32 = 1;

#[derive(Clone, Debug)]
pub struct PasswordHasher {
    params: Params,
    permits: Arc<Semaphore>,
}

impl PasswordHasher {
    /// # Errors
    /// Returns an error if the Argon2 parameters are rejected.
    pub fn new(workers: usize) -> Result<Self> {
        Self::with_params(MEMORY_KIB, ITERATIONS, PARALLELISM, workers)
    }

    /// # Errors
    /// Returns an error if the Argon2 parameters are rejected.
    pub fn with_params(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
        workers: usize,
    ) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
        Ok(Self {
            params,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        })
    }

    /// Produce a PHC string with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if hashing fails or the worker pool is closed.
    pub async fn hash(&self, password: &str) -> Result<String> {
        let params = self.params.clone();
        let password = password.to_owned();
        self.run("hash", move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2(params)
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|err| anyhow!("password hashing failed: {err}"))
        })
        .await
    }

    /// Constant-time verification against a stored PHC string.
    ///
    /// # Errors
    /// Returns an error if the stored hash cannot be parsed.
    pub async fn verify(&self, password: &str, phc: &str) -> Result<bool> {
        let params = self.params.clone();
        let password = password.to_owned();
        let phc = phc.to_owned();
        self.run("verify", move || {
            let parsed =
                PasswordHash::new(&phc).map_err(|err| anyhow!("invalid password hash: {err}"))?;
            Ok(argon2(params)
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        })
        .await
    }

    async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let span = info_span!("password.hash", operation);
        async {
            let _permit = self
                .permits
                .acquire()
                .await
                .context("password hashing pool closed")?;
            tokio::task::spawn_blocking(work)
                .await
                .context("password hashing task failed")?
        }
        .instrument(span)
        .await
    }
}

fn argon2(params: Params) -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> Result<PasswordHasher> {
        PasswordHasher::with_params(1024, 1, 1, 2)
    }

    #[tokio::test]
    async fn hash_and_verify() -> Result<()> {
        let hasher = cheap()?;
        let hash = hasher.hash("Correct-h0rse").await?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Correct-h0rse", &hash).await?);
        assert!(!hasher.verify("wrong", &hash).await?);
        Ok(())
    }

    #[tokio::test]
    async fn salts_differ() -> Result<()> {
        let hasher = cheap()?;
        let first = hasher.hash("same").await?;
        let second = hasher.hash("same").await?;
        assert_ne!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() -> Result<()> {
        let hasher = cheap()?;
        assert!(hasher.verify("pw", "not-a-phc-string").await.is_err());
        Ok(())
    }

    #[test]
    fn rejects_invalid_params() {
        assert!(PasswordHasher::with_params(1, 0, 0, 1).is_err());
    }
}
