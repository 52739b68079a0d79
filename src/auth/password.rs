//! Password hashing.
//!
//! Login against an unknown account still runs a full verification against a
//! precomputed dummy hash, so both branches cost the same.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use std::sync::Arc;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("invalid hashing parameters: {0}")]
    Params(String),
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error("password hashing task failed: {0}")]
    Task(String),
}

pub struct Passwords {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl Passwords {
    /// Production parameters (argon2id defaults).
    pub fn new() -> Result<Self, PasswordError> {
        Self::with_params(Params::default())
    }

    /// Cheapest parameters argon2 accepts. For tests only.
    pub fn insecure_fast() -> Result<Self, PasswordError> {
        let params =
            Params::new(8, 1, 1, None).map_err(|e| PasswordError::Params(e.to_string()))?;
        Self::with_params(params)
    }

    pub fn with_params(params: Params) -> Result<Self, PasswordError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut this = Self {
            argon2,
            dummy_hash: String::new(),
        };
        this.dummy_hash = this.hash("dummy password for unknown accounts")?;
        Ok(this)
    }

    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let mut salt_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut salt_bytes);
        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| PasswordError::Hash(e.to_string()))?;
        let phc = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PasswordError::Hash(e.to_string()))?
            .to_string();
        Ok(phc)
    }

    pub fn verify(&self, hash: &str, password: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Burn one verification against the dummy hash. Always false.
    pub fn verify_dummy(&self, password: &str) -> bool {
        self.verify(&self.dummy_hash, password);
        false
    }

    /// [`hash`](Self::hash) on the blocking pool.
    pub async fn hash_blocking(self: &Arc<Self>, password: &str) -> Result<String, PasswordError> {
        let this = Arc::clone(self);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || this.hash(&password))
            .await
            .map_err(|e| PasswordError::Task(e.to_string()))?
    }

    /// [`verify`](Self::verify) on the blocking pool. A failed task never verifies.
    pub async fn verify_blocking(self: &Arc<Self>, hash: &str, password: &str) -> bool {
        let this = Arc::clone(self);
        let hash = hash.to_string();
        let password = password.to_string();
        match tokio::task::spawn_blocking(move || this.verify(&hash, &password)).await {
            Ok(valid) => valid,
            Err(e) => {
                error!(error = %e, "Password verification task failed");
                false
            }
        }
    }

    /// [`verify_dummy`](Self::verify_dummy) on the blocking pool.
    pub async fn verify_dummy_blocking(self: &Arc<Self>, password: &str) -> bool {
        let this = Arc::clone(self);
        let password = password.to_string();
        if let Err(e) = tokio::task::spawn_blocking(move || this.verify_dummy(&password)).await {
            error!(error = %e, "Password verification task failed");
        }
        false
    }
}
