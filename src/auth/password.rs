use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use std::fmt::Debug;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::HashingConfig;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid argon2 parameters: {0}")]
    InvalidParams(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// One-way password digesting.
///
/// `hash` salts every call independently, so two digests of the same
/// plaintext differ. `verify` never errors: a malformed digest, a digest
/// from another algorithm and an empty candidate all verify as `false`.
pub trait CredentialHasher: Send + Sync + Debug {
    fn hash(&self, plain: &str) -> Result<String, HashError>;

    fn verify(&self, plain: &str, digest: &str) -> bool;
}

/// Argon2id hasher producing PHC strings (`$argon2id$v=19$m=..,t=..,p=..$salt$key`).
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    pub fn new(cfg: &HashingConfig) -> Result<Self, HashError> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| HashError::InvalidParams(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                HashError::Hash(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    fn verify(&self, plain: &str, digest: &str) -> bool {
        if plain.is_empty() {
            return false;
        }
        let parsed = match PasswordHash::new(digest) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "unparseable password digest");
                return false;
            }
        };
        // Cost parameters come from the digest, not from `self`.
        self.argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }
}
