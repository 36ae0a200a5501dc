//! Credential hashing.
//!
//! Credentials are stored as Argon2id PHC strings and compared by verification,
//! never by equality on the stored value.

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential must not be empty")]
    Empty,

    #[error("credential hashing failed: {0}")]
    Hashing(String),
}

/// Well-formed Argon2id hash with the default cost parameters that matches no
/// credential. Verifying against it costs as much as verifying a real account.
pub const UNKNOWN_USER_CREDENTIAL: &str = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

fn hasher() -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default())
}

/// Hash a plaintext credential with a fresh random salt.
pub fn hash_credential(plain: &str) -> Result<String, CredentialError> {
    if plain.is_empty() {
        return Err(CredentialError::Empty);
    }
    let salt = SaltString::generate(&mut rand_core::OsRng);
    let hash = hasher()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| CredentialError::Hashing(e.to_string()))?;
    Ok(hash.to_string())
}

/// Check a plaintext credential against a stored PHC string.
///
/// An unparsable stored value never verifies.
pub fn verify_credential(plain: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        tracing::warn!("stored credential is not a valid PHC string");
        return false;
    };
    hasher().verify_password(plain.as_bytes(), &parsed).is_ok()
}
