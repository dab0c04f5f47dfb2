// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Providers that only issue opaque access tokens.
//!
//! The token is introspected by calling the provider's userinfo endpoint
//! with it; a successful answer is the proof of validity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    normalize_claims, read_provider_json, transport_error, ExternalUserTransfer, IdentityProvider,
    ProviderCredentials,
};
use crate::auth::{AuthError, AuthResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfoProviderConfig {
    pub name: String,
    pub userinfo_endpoint: String,
    /// Field holding the provider user id (default: `sub`, then `id`)
    #[serde(default)]
    pub subject_field: Option<String>,
    /// Treat returned emails as verified. Only for providers that never
    /// return unverified addresses.
    #[serde(default)]
    pub trust_email: bool,
}

pub struct UserInfoProvider {
    config: UserInfoProviderConfig,
    client: reqwest::Client,
}

impl UserInfoProvider {
    pub fn new(config: UserInfoProviderConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl IdentityProvider for UserInfoProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn validate(&self, credentials: &ProviderCredentials) -> AuthResult<ExternalUserTransfer> {
        let access_token = credentials.access_token().ok_or_else(|| {
            AuthError::Validation(format!(
                "provider '{}' requires an access_token",
                self.config.name
            ))
        })?;

        let response = self
            .client
            .get(&self.config.userinfo_endpoint)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, "resys-identity")
            .send()
            .await
            .map_err(|e| transport_error(&self.config.name, e))?;
        let claims = read_provider_json(&self.config.name, response).await?;

        let mut transfer =
            normalize_claims(&self.config.name, claims, self.config.subject_field.as_deref())?;
        if self.config.trust_email {
            transfer.email_verified = true;
        }
        Ok(transfer)
    }
}
