//! Password hashing with Argon2id.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use thiserror::Error;

use crate::config::PasswordConfig;

/// Error raised while hashing a password.
#[derive(Debug, Error)]
pub enum PasswordError {
    /// The hasher rejected its input.
    #[error("failed to hash password: {0}")]
    Hash(String),
    /// Invalid Argon2 parameters in configuration.
    #[error("invalid argon2 parameters: {0}")]
    Params(String),
}

/// Memory-hard password hasher.
///
/// Hash output is self-describing (algorithm, parameters, and salt are
/// embedded), so verification needs no separate salt storage.
#[derive(Debug, Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
}

impl PasswordService {
    /// Create a hasher with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }

    /// Create a hasher from configured parameters.
    ///
    /// # Errors
    ///
    /// Returns an error when the parameter combination is invalid.
    pub fn from_config(config: &PasswordConfig) -> Result<Self, PasswordError> {
        let params = Params::new(
            config.memory_cost,
            config.time_cost,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|e| PasswordError::Params(e.to_string()))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        Ok(Self { argon2 })
    }

    /// Hash a plaintext password with a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns an error when hashing fails.
    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| PasswordError::Hash(e.to_string()))?
            .to_string();
        Ok(hash)
    }

    /// Verify a plaintext against a stored hash.
    ///
    /// Never errors: a malformed hash or a mismatch both return `false`.
    #[must_use]
    pub fn verify(&self, hash: &str, plaintext: &str) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(hash) else {
            return false;
        };
        self.argon2
            .verify_password(plaintext.as_bytes(), &parsed_hash)
            .is_ok()
    }
}

impl Default for PasswordService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let service = PasswordService::new();
        let hash = service.hash("mysecretpassword").unwrap();

        assert!(service.verify(&hash, "mysecretpassword"));
        assert!(!service.verify(&hash, "wrongpassword"));
    }

    #[test]
    fn test_malformed_hash_verifies_false() {
        let service = PasswordService::new();
        assert!(!service.verify("invalid-hash-format", "password"));
        assert!(!service.verify("", "password"));
    }

    #[test]
    fn test_configured_params_produce_argon2id() {
        let service = PasswordService::from_config(&PasswordConfig::default()).unwrap();
        let hash = service.hash("testpassword").unwrap();
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_hashes_are_salted() {
        let service = PasswordService::new();
        let first = service.hash("samepassword").unwrap();
        let second = service.hash("samepassword").unwrap();
        assert_ne!(first, second);
        assert!(service.verify(&first, "samepassword"));
        assert!(service.verify(&second, "samepassword"));
    }
}
