use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::errors::{Error, Result};

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Minimum bar for new passwords: length plus character-class coverage.
pub fn check_password_strength(password: &str) -> Result<()> {
    if password.len() < 8 {
        return Err(Error::WeakPassword(
            "must be at least 8 characters long".into(),
        ));
    }

    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password
        .chars()
        .any(|c| c.is_ascii_punctuation() || !c.is_ascii_alphanumeric());

    if !has_upper || !has_lower || !has_digit || !has_special {
        return Err(Error::WeakPassword(
            "must contain uppercase, lowercase, number, and special characters".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(verify_password(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let password = "correct-horse-battery-staple";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(!verify_password("wrong-password", &hash).expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = verify_password("anything", "not-a-valid-hash").unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn strength_check_accepts_mixed_password() {
        assert!(check_password_strength("Secur3P@ssword").is_ok());
    }

    #[test]
    fn strength_check_rejects_short_or_uniform_passwords() {
        assert!(matches!(
            check_password_strength("Ab1!"),
            Err(Error::WeakPassword(_))
        ));
        assert!(matches!(
            check_password_strength("alllowercase1!"),
            Err(Error::WeakPassword(_))
        ));
        assert!(matches!(
            check_password_strength("NoDigitsHere!"),
            Err(Error::WeakPassword(_))
        ));
    }
}
