//! Password hashing (argon2id, PHC string format).
//!
//! Both functions are CPU-bound; async callers should run them on the
//! blocking pool.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::TryRngCore;
use std::sync::OnceLock;

const SALT_BYTES: usize = 16;

static ABSENT_USER_HASH: OnceLock<String> = OnceLock::new();

#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("randomness source failed: {0}")]
    Randomness(#[from] rand::rand_core::OsError),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

impl From<argon2::password_hash::Error> for CredentialError {
    fn from(err: argon2::password_hash::Error) -> Self {
        Self::Hash(err.to_string())
    }
}

/// Hash `password` with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let mut salt = [0u8; SALT_BYTES];
    OsRng.try_fill_bytes(&mut salt)?;
    let salt = SaltString::encode_b64(&salt)?;
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Check `password` against a stored PHC string.
///
/// A wrong password is `Ok(false)`; a stored value that is not a valid
/// hash is an error.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, CredentialError> {
    let parsed = PasswordHash::new(stored)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Run the same verification work as [`verify_password`] for an account that
/// does not exist. Always `Ok(false)`.
pub fn verify_absent(password: &str) -> Result<bool, CredentialError> {
    let stored = match ABSENT_USER_HASH.get() {
        Some(stored) => stored,
        None => {
            let fresh = hash_password("ticketgate absent account")?;
            ABSENT_USER_HASH.get_or_init(|| fresh)
        }
    };
    verify_password(password, stored)?;
    Ok(false)
}
