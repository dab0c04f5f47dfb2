// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # External Identity Providers
//!
//! Sign-in through third-party identity providers.
//!
//! A provider token (OIDC id token, opaque access token or authorization
//! code) is verified by the provider's [`IdentityProvider`] implementation
//! and normalized into an [`ExternalUserTransfer`]. The
//! [`ExternalIdentityLinker`] then resolves that transfer to a local account.
//!
//! Providers are configured from a JSON file (`EXTERNAL_PROVIDERS_FILE`):
//!
//! ```json
//! [
//!   {
//!     "kind": "oidc",
//!     "name": "google",
//!     "issuer": "https://accounts.google.com",
//!     "client_id": "...",
//!     "client_secret": "...",
//!     "jwks_uri": "https://www.googleapis.com/oauth2/v3/certs",
//!     "token_endpoint": "https://oauth2.googleapis.com/token",
//!     "userinfo_endpoint": "https://openidconnect.googleapis.com/v1/userinfo",
//!     "allowed_redirect_uris": ["https://shop.example.com/auth/callback"]
//!   },
//!   {
//!     "kind": "userinfo",
//!     "name": "github",
//!     "userinfo_endpoint": "https://api.github.com/user",
//!     "subject_field": "id"
//!   }
//! ]
//! ```

pub mod linker;
pub mod oidc;
pub mod userinfo;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::{AuthError, AuthResult};

pub use linker::ExternalIdentityLinker;
pub use oidc::{OidcProvider, OidcProviderConfig};
pub use userinfo::{UserInfoProvider, UserInfoProviderConfig};

/// Provider identity normalized to one shape. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalUserTransfer {
    pub provider: String,
    pub provider_user_id: String,
    pub email: String,
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Remaining provider claims, untouched
    pub additional_claims: Map<String, Value>,
}

/// Credentials presented for an external sign-in. At least one is required.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub authorization_code: Option<String>,
    pub redirect_uri: Option<String>,
}

impl ProviderCredentials {
    fn non_empty(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn access_token(&self) -> Option<&str> {
        Self::non_empty(&self.access_token)
    }

    pub fn id_token(&self) -> Option<&str> {
        Self::non_empty(&self.id_token)
    }

    pub fn authorization_code(&self) -> Option<&str> {
        Self::non_empty(&self.authorization_code)
    }

    pub fn redirect_uri(&self) -> Option<&str> {
        Self::non_empty(&self.redirect_uri)
    }
}

/// Verifies provider credentials and normalizes the identity they carry.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name as used in requests and links (e.g. `google`).
    fn name(&self) -> &str;

    async fn validate(&self, credentials: &ProviderCredentials) -> AuthResult<ExternalUserTransfer>;
}

/// One configured provider, as read from the providers file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    Oidc(OidcProviderConfig),
    #[serde(rename = "userinfo")]
    UserInfo(UserInfoProviderConfig),
}

impl ProviderConfig {
    pub fn name(&self) -> &str {
        match self {
            ProviderConfig::Oidc(config) => &config.name,
            ProviderConfig::UserInfo(config) => &config.name,
        }
    }
}

/// Configured providers by name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build providers from configuration. Every HTTP call is bounded by `timeout`.
    pub fn from_configs(configs: Vec<ProviderConfig>, timeout: Duration) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Internal(format!("HTTP client: {e}")))?;

        let mut registry = Self::new();
        for config in configs {
            let provider: Arc<dyn IdentityProvider> = match config {
                ProviderConfig::Oidc(config) => Arc::new(OidcProvider::new(config, client.clone())),
                ProviderConfig::UserInfo(config) => {
                    Arc::new(UserInfoProvider::new(config, client.clone()))
                }
            };
            tracing::info!(provider = %provider.name(), "External provider configured");
            registry.register(provider);
        }
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

// =============================================================================
// Normalization
// =============================================================================

const SUBJECT_FIELDS: &[&str] = &["sub", "id", "user_id"];
const FIRST_NAME_FIELDS: &[&str] = &["given_name", "first_name"];
const LAST_NAME_FIELDS: &[&str] = &["family_name", "last_name"];
const AVATAR_FIELDS: &[&str] = &["picture", "avatar_url"];

/// Normalize a provider claim set (id-token payload or userinfo body).
///
/// `subject_field` overrides where the provider user id is read from.
pub(crate) fn normalize_claims(
    provider: &str,
    claims: Map<String, Value>,
    subject_field: Option<&str>,
) -> AuthResult<ExternalUserTransfer> {
    let mut claims = claims;

    let subject = match subject_field {
        Some(field) => take_string(&mut claims, &[field]),
        None => take_string(&mut claims, SUBJECT_FIELDS),
    }
    .ok_or_else(|| AuthError::ExternalTokenInvalid("provider did not return a subject".to_string()))?;

    let email = take_string(&mut claims, &["email"])
        .ok_or_else(|| AuthError::ExternalTokenInvalid("provider did not return an email".to_string()))?;

    let email_verified = match claims.remove("email_verified") {
        Some(Value::Bool(verified)) => verified,
        Some(Value::String(verified)) => verified.eq_ignore_ascii_case("true"),
        _ => false,
    };

    let first_name = take_string(&mut claims, FIRST_NAME_FIELDS);
    let last_name = take_string(&mut claims, LAST_NAME_FIELDS);
    let avatar_url = take_string(&mut claims, AVATAR_FIELDS);

    Ok(ExternalUserTransfer {
        provider: provider.to_string(),
        provider_user_id: subject,
        email,
        email_verified,
        first_name,
        last_name,
        avatar_url,
        additional_claims: claims,
    })
}

/// Remove and return the first usable field, accepting strings and numbers.
///
/// Fields after the match stay in `claims`.
fn take_string(claims: &mut Map<String, Value>, fields: &[&str]) -> Option<String> {
    for field in fields {
        let value = match claims.get(*field) {
            Some(Value::String(value)) if !value.trim().is_empty() => value.trim().to_string(),
            Some(Value::Number(value)) => value.to_string(),
            _ => continue,
        };
        claims.remove(*field);
        return Some(value);
    }
    None
}

/// Turn a provider HTTP response into JSON, classifying failures.
///
/// 5xx and unreadable bodies mean the provider is unavailable; 4xx means it
/// rejected the credential.
pub(crate) async fn read_provider_json(
    provider: &str,
    response: reqwest::Response,
) -> AuthResult<Map<String, Value>> {
    let status = response.status();
    if status.is_server_error() {
        return Err(AuthError::ExternalProviderUnreachable(format!(
            "{provider} returned HTTP {status}"
        )));
    }
    if !status.is_success() {
        return Err(AuthError::ExternalTokenInvalid(format!(
            "{provider} rejected the credential (HTTP {status})"
        )));
    }
    response
        .json::<Map<String, Value>>()
        .await
        .map_err(|e| AuthError::ExternalProviderUnreachable(format!("{provider} response: {e}")))
}

pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> AuthError {
    AuthError::ExternalProviderUnreachable(format!("{provider}: {err}"))
}
