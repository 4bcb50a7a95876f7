//! Argon2id secret hashing
//!
//! Hashing is CPU bound, so both directions run on the blocking pool.

use argon2::{Algorithm, Argon2, Params, Version};
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::PasswordConfig;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct SecretHasher {
    params: Params,
}

impl SecretHasher {
    pub fn new(config: &PasswordConfig) -> Result<Self> {
        let params = Params::new(
            config.argon2_memory_cost,
            config.argon2_time_cost,
            config.argon2_parallelism,
            None,
        )
        .map_err(|e| Error::Config(format!("Invalid Argon2 parameters: {}", e)))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a secret into a PHC string
    pub async fn hash(&self, secret: &str) -> Result<String> {
        let hasher = self.clone();
        let secret = secret.to_string();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&secret)).await?
    }

    /// Check a secret against a stored PHC string
    pub async fn verify(&self, secret: &str, phc: &str) -> Result<bool> {
        let hasher = self.clone();
        let secret = secret.to_string();
        let phc = phc.to_string();
        tokio::task::spawn_blocking(move || hasher.verify_blocking(&secret, &phc)).await?
    }

    fn hash_blocking(&self, secret: &str) -> Result<String> {
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt)?;

        let hash = self.argon2().hash_password(secret.as_bytes(), &salt)?;
        Ok(hash.to_string())
    }

    fn verify_blocking(&self, secret: &str, phc: &str) -> Result<bool> {
        let parsed = PasswordHash::new(phc)?;
        match self.argon2().verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
