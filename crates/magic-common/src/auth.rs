//! Password verification for `MAGIC_AWARE` client credentials.
//!
//! MAGIC sessions are authenticated per-request via Diameter
//! `Client-Credentials` AVPs, not bearer tokens, so only the Argon2id
//! hashing/verification half of the teacher's auth module survives here.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password hashing failed: {0}")]
    HashError(String),
}

/// Hash a password using Argon2id with a random salt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::HashError(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against an Argon2id hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| AuthError::HashError(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_and_verify() {
        let hash = hash_password("EFB_NAV_APP_01_pw").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("EFB_NAV_APP_01_pw", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }
}
