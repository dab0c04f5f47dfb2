// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Password hashing via bcrypt.

use super::{AuthError, AuthResult};

#[cfg(not(test))]
const BCRYPT_COST: u32 = 10;
#[cfg(test)]
const BCRYPT_COST: u32 = 4;

/// Shortest password accepted at registration.
pub const MIN_PASSWORD_LEN: usize = 8;

/// bcrypt only reads the first 72 bytes.
const MAX_PASSWORD_BYTES: usize = 72;

pub fn validate_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(AuthError::Validation(format!(
            "password must be at most {MAX_PASSWORD_BYTES} bytes"
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> AuthResult<String> {
    bcrypt::hash(password, BCRYPT_COST).map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> AuthResult<bool> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn short_password_is_rejected() {
        assert!(matches!(validate_password("short"), Err(AuthError::Validation(_))));
        assert!(validate_password("long enough").is_ok());
    }
}
