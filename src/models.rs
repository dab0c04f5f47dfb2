// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. All types derive
//! `Serialize`, `Deserialize` and `ToSchema` for JSON handling and OpenAPI
//! documentation.
//!
//! ## Model Categories
//!
//! - **Sessions**: registration, login, refresh and logout
//! - **External logins**: provider token exchange and linked identities
//! - **Grants**: user grants and role permissions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::TokenPair;
use crate::storage::{ExternalIdentityLink, UserAccount, UserGrants};

/// Token type advertised with every issued pair.
pub const BEARER_TOKEN_TYPE: &str = "Bearer";

// =============================================================================
// Session Models
// =============================================================================

/// Local account registration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Email and password sign-in.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Use the long refresh-token lifetime.
    #[serde(default)]
    pub remember_me: bool,
}

/// Refresh-token exchange.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// Sign out of the session owning this refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// Access and refresh token pair.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
    /// Always `Bearer`.
    pub token_type: String,
}

impl From<TokenPair> for TokenPairResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            access_token_expires_at: pair.access_token_expires_at,
            refresh_token_expires_at: pair.refresh_token_expires_at,
            token_type: BEARER_TOKEN_TYPE.to_string(),
        }
    }
}

/// Public view of an account. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Whether the account can sign in with a password.
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&UserAccount> for UserProfile {
    fn from(user: &UserAccount) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            email_verified: user.email_verified,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            avatar_url: user.avatar_url.clone(),
            has_password: user.has_password(),
            created_at: user.created_at,
        }
    }
}

/// Result of registration or login.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub tokens: TokenPairResponse,
    pub user_profile: UserProfile,
}

/// Result of a logout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    /// Number of refresh tokens that were revoked by this call.
    pub revoked_sessions: usize,
}

// =============================================================================
// External Login Models
// =============================================================================

/// Exchange of an external provider credential for a local session.
///
/// At least one of `access_token`, `id_token` or `authorization_code` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExternalExchangeRequest {
    pub provider: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub authorization_code: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub remember_me: bool,
}

/// Result of an external exchange.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExternalExchangeResponse {
    #[serde(flatten)]
    pub tokens: TokenPairResponse,
    /// A new local account was created.
    pub is_new_user: bool,
    /// The provider identity was linked by this call.
    pub is_new_login: bool,
    pub user_profile: UserProfile,
}

/// A provider identity linked to the caller's account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExternalLoginResponse {
    pub provider: String,
    pub provider_key: String,
    pub linked_at: DateTime<Utc>,
}

impl From<ExternalIdentityLink> for ExternalLoginResponse {
    fn from(link: ExternalIdentityLink) -> Self {
        Self {
            provider: link.provider,
            provider_key: link.provider_user_id,
            linked_at: link.created_at,
        }
    }
}

/// Linked identities plus the providers this service accepts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExternalLoginsResponse {
    pub logins: Vec<ExternalLoginResponse>,
    pub available_providers: Vec<String>,
}

// =============================================================================
// Grant Models
// =============================================================================

/// Replacement grants for a user.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UserGrantsBody {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub policies: Vec<String>,
}

impl From<UserGrantsBody> for UserGrants {
    fn from(body: UserGrantsBody) -> Self {
        Self {
            roles: body.roles,
            permissions: body.permissions,
            policies: body.policies,
        }
    }
}

impl From<UserGrants> for UserGrantsBody {
    fn from(grants: UserGrants) -> Self {
        Self {
            roles: grants.roles,
            permissions: grants.permissions,
            policies: grants.policies,
        }
    }
}

/// Replacement permissions for a role.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePermissionsBody {
    pub permissions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_pair_response_is_flat_with_bearer_type() {
        let now = Utc::now();
        let response = SessionResponse {
            tokens: TokenPair {
                access_token: "at".into(),
                refresh_token: "rt".into(),
                access_token_expires_at: now,
                refresh_token_expires_at: now,
            }
            .into(),
            user_profile: UserProfile {
                id: "u1".into(),
                email: "ada@example.com".into(),
                email_verified: false,
                first_name: None,
                last_name: None,
                avatar_url: None,
                has_password: true,
                created_at: now,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["token_type"], "Bearer");
        assert_eq!(json["access_token"], "at");
        assert_eq!(json["user_profile"]["id"], "u1");
        assert!(json["user_profile"].get("password_hash").is_none());
    }

    #[test]
    fn exchange_request_defaults_optional_fields() {
        let request: ExternalExchangeRequest =
            serde_json::from_str(r#"{"provider":"google","id_token":"x"}"#).unwrap();
        assert!(request.access_token.is_none());
        assert!(!request.remember_me);
        assert_eq!(request.id_token.as_deref(), Some("x"));
    }
}
