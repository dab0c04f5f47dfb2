// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sessions: access/refresh token pairs for local and external sign-ins.

use chrono::{DateTime, Utc};

use super::access_token::AccessTokenService;
use super::password::{hash_password, validate_password, verify_password};
use super::{AuthError, AuthResult};
use crate::storage::{normalize_email, IdentityStore, NewUser, RefreshTokenStore, UserAccount};

/// Freshly minted credentials for one session.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// Local registration request.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Composes access tokens and refresh tokens into sessions.
#[derive(Clone)]
pub struct SessionService {
    access_tokens: AccessTokenService,
    refresh_tokens: RefreshTokenStore,
    identities: IdentityStore,
}

impl SessionService {
    pub fn new(
        access_tokens: AccessTokenService,
        refresh_tokens: RefreshTokenStore,
        identities: IdentityStore,
    ) -> Self {
        Self {
            access_tokens,
            refresh_tokens,
            identities,
        }
    }

    pub fn access_tokens(&self) -> &AccessTokenService {
        &self.access_tokens
    }

    /// Issue a new token pair for an authenticated user.
    pub fn start_session(&self, user: &UserAccount, ip: &str, remember_me: bool) -> AuthResult<TokenPair> {
        let access = self.access_tokens.issue(user)?;
        let refresh = self.refresh_tokens.issue(&user.id, ip, remember_me)?;
        tracing::info!(user_id = %user.id, record_id = %refresh.record.id, remember_me, "Session started");
        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.plaintext,
            access_token_expires_at: access.expires_at,
            refresh_token_expires_at: refresh.record.expires_at,
        })
    }

    /// Create a password account and sign it in.
    pub fn register(&self, registration: Registration, ip: &str) -> AuthResult<(UserAccount, TokenPair)> {
        let email = registration.email.trim();
        if !email.contains('@') || email.len() < 3 {
            return Err(AuthError::Validation("a valid email address is required".to_string()));
        }
        validate_password(&registration.password)?;

        let user = self.identities.create_user(NewUser {
            email: email.to_string(),
            email_verified: false,
            first_name: registration.first_name,
            last_name: registration.last_name,
            avatar_url: None,
            password_hash: Some(hash_password(&registration.password)?),
        })?;
        let tokens = self.start_session(&user, ip, false)?;
        Ok((user, tokens))
    }

    /// Sign in with email and password.
    ///
    /// Unknown emails, accounts without a password and wrong passwords all
    /// fail with the same [`AuthError::InvalidCredentials`].
    pub fn login(
        &self,
        email: &str,
        password: &str,
        ip: &str,
        remember_me: bool,
    ) -> AuthResult<(UserAccount, TokenPair)> {
        let user = self.identities.find_by_email(email)?;
        let Some((user, hash)) = user.and_then(|u| u.password_hash.clone().map(|h| (u, h))) else {
            tracing::debug!(email = %normalize_email(email), "Login for unknown or passwordless account");
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password, &hash)? {
            tracing::debug!(user_id = %user.id, "Login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        let tokens = self.start_session(&user, ip, remember_me)?;
        Ok((user, tokens))
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// When the caller also presents its (possibly expired) access token, the
    /// token's signature is checked and its subject must own the refresh token.
    pub fn refresh(
        &self,
        refresh_token: &str,
        expired_access_token: Option<&str>,
        ip: &str,
        remember_me: bool,
    ) -> AuthResult<(UserAccount, TokenPair)> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::RefreshTokenNotFound);
        }
        if let Some(access_token) = expired_access_token {
            let subject = self.access_tokens.validate(access_token, false)?.claims.sub;
            if let Some(record) = self.refresh_tokens.find_by_token(refresh_token)? {
                if record.user_id != subject {
                    tracing::warn!(user_id = %subject, record_id = %record.id, "Refresh token presented with another user's access token");
                    return Err(AuthError::IdentityInvalid);
                }
            }
        }

        let rotation = self.refresh_tokens.validate_and_rotate(refresh_token, ip, remember_me)?;
        let access = self.access_tokens.issue(&rotation.user)?;
        Ok((
            rotation.user,
            TokenPair {
                access_token: access.token,
                refresh_token: rotation.plaintext,
                access_token_expires_at: access.expires_at,
                refresh_token_expires_at: rotation.record.expires_at,
            },
        ))
    }

    /// Revoke the refresh token of the current session.
    pub fn logout(&self, user_id: &str, refresh_token: &str, ip: &str) -> AuthResult<bool> {
        let revoked = self.refresh_tokens.revoke_token_for_user(refresh_token, user_id, ip)?;
        tracing::info!(user_id = %user_id, revoked, "Signed out");
        Ok(revoked)
    }

    /// Revoke a refresh token on behalf of whoever holds it.
    ///
    /// The refresh token is itself the credential, so no access token is
    /// needed. Unknown tokens are a no-op.
    pub fn logout_token(&self, refresh_token: &str, ip: &str) -> AuthResult<bool> {
        let Some(record) = self.refresh_tokens.find_by_token(refresh_token)? else {
            return Ok(false);
        };
        let revoked = self.refresh_tokens.revoke(&record.id, ip)?;
        tracing::info!(user_id = %record.user_id, record_id = %record.id, revoked, "Signed out");
        Ok(revoked)
    }

    /// Revoke every refresh token of the user.
    pub fn logout_all(&self, user_id: &str, ip: &str) -> AuthResult<usize> {
        self.refresh_tokens.revoke_all_for_user(user_id, ip)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::auth::{ClaimsCodec, SigningKeys};
    use crate::authorization::{AuthorizationClaimsCache, CacheSettings};
    use crate::storage::database::test_support::temp_db;
    use crate::storage::{AuthDatabase, GrantStore, RefreshTokenPolicy, TokenHasher};

    pub(crate) struct Fixture {
        pub db: Arc<AuthDatabase>,
        pub sessions: SessionService,
        pub identities: IdentityStore,
        pub refresh_tokens: RefreshTokenStore,
        pub grants: GrantStore,
        pub cache: Arc<AuthorizationClaimsCache>,
        pub _dir: tempfile::TempDir,
    }

    pub(crate) fn fixture() -> Fixture {
        let (db, dir) = temp_db();
        let grants = GrantStore::new(db.clone());
        grants.seed_admin_role().unwrap();
        let cache = Arc::new(AuthorizationClaimsCache::new(
            Arc::new(grants.clone()),
            CacheSettings::default(),
        ));
        let identities = IdentityStore::new(db.clone(), "customer");
        let refresh_tokens =
            RefreshTokenStore::new(db.clone(), TokenHasher::Sha256, RefreshTokenPolicy::default());
        let access_tokens = AccessTokenService::new(
            ClaimsCodec::new("https://id.example.com", "resys-api"),
            SigningKeys::hs256(b"session-test-secret-0123456789abcdef"),
            Duration::minutes(15),
            cache.clone(),
        );
        let sessions = SessionService::new(access_tokens, refresh_tokens.clone(), identities.clone());
        Fixture {
            db,
            sessions,
            identities,
            refresh_tokens,
            grants,
            cache,
            _dir: dir,
        }
    }

    pub(crate) fn registration(email: &str) -> Registration {
        Registration {
            email: email.to_string(),
            password: "correct horse battery".to_string(),
            first_name: Some("Ada".to_string()),
            last_name: None,
        }
    }
}
