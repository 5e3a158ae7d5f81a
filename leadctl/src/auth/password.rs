//! Password hashing and verification.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::{config::PasswordConfig, errors::Error};

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    fn to_argon2(self) -> Result<Argon2<'static>, Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None).map_err(|e| Error::Internal {
            operation: format!("create argon2 params: {e}"),
        })?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Params {
    /// Secure defaults for production (Argon2id RFC recommendations)
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MB
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl From<&PasswordConfig> for Argon2Params {
    fn from(config: &PasswordConfig) -> Self {
        Self {
            memory_kib: config.argon2_memory_kib,
            iterations: config.argon2_iterations,
            parallelism: config.argon2_parallelism,
        }
    }
}

/// Hash a password with Argon2id and a fresh random salt.
///
/// Uses the provided parameters or secure defaults if None.
pub fn hash_string_with_params(input: &str, params: Option<Argon2Params>) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = params.unwrap_or_default().to_argon2()?;

    let hash = argon2.hash_password(input.as_bytes(), &salt).map_err(|e| Error::Internal {
        operation: format!("hash string: {e}"),
    })?;

    Ok(hash.to_string())
}

/// Verify a password against a stored PHC hash string.
///
/// A hash that cannot be parsed counts as a mismatch. Verification uses the parameters
/// embedded in the hash itself.
pub fn verify_string(input: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed_hash) => Argon2::default().verify_password(input.as_bytes(), &parsed_hash).is_ok(),
        Err(e) => {
            tracing::warn!("Stored password hash could not be parsed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> Option<Argon2Params> {
        Some(Argon2Params {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
    }

    #[test]
    fn test_string_hashing() {
        let input = "test_password_123";
        let hash = hash_string_with_params(input, None).unwrap();

        assert!(!hash.is_empty());
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_string(input, &hash));
        assert!(!verify_string("wrong_password", &hash));
    }

    #[test]
    fn test_same_input_different_salts() {
        let hash1 = hash_string_with_params("password", fast_params()).unwrap();
        let hash2 = hash_string_with_params("password", fast_params()).unwrap();

        assert_ne!(hash1, hash2);
        assert!(verify_string("password", &hash1));
        assert!(verify_string("password", &hash2));
    }

    #[test]
    fn test_malformed_hash_is_mismatch() {
        assert!(!verify_string("password", "not-a-phc-string"));
        assert!(!verify_string("password", ""));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let result = hash_string_with_params(
            "password",
            Some(Argon2Params {
                memory_kib: 0,
                iterations: 0,
                parallelism: 0,
            }),
        );
        assert!(result.is_err());
    }
}
