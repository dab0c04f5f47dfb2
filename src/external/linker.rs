// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Links provider identities to local accounts.

use std::sync::Arc;
use std::time::Duration;

use super::{ExternalUserTransfer, ProviderCredentials, ProviderRegistry};
use crate::auth::{AuthError, AuthResult};
use crate::storage::{ExternalIdentityLink, IdentityStore, LinkOutcome};

/// Validates provider credentials and resolves them to local accounts.
///
/// Provider calls are bounded by a timeout; a timeout is reported as
/// [`AuthError::ExternalProviderUnreachable`]. Retrying is left to the caller.
#[derive(Clone)]
pub struct ExternalIdentityLinker {
    providers: Arc<ProviderRegistry>,
    identities: IdentityStore,
    timeout: Duration,
}

impl ExternalIdentityLinker {
    pub fn new(providers: Arc<ProviderRegistry>, identities: IdentityStore, timeout: Duration) -> Self {
        Self {
            providers,
            identities,
            timeout,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Verify credentials with the named provider and normalize the identity.
    pub async fn validate_provider_token(
        &self,
        provider: &str,
        credentials: &ProviderCredentials,
    ) -> AuthResult<ExternalUserTransfer> {
        let verifier = self
            .providers
            .get(provider)
            .ok_or_else(|| AuthError::ExternalProviderNotConfigured(provider.to_string()))?;

        let transfer = match tokio::time::timeout(self.timeout, verifier.validate(credentials)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::ExternalProviderUnreachable(format!(
                "{provider} did not answer within {}s",
                self.timeout.as_secs()
            ))),
        }
        .inspect_err(|err| {
            tracing::info!(provider = %provider, error_code = err.error_code(), "External token rejected");
        })?;

        if transfer.provider != provider {
            return Err(AuthError::ExternalTokenInvalid(format!(
                "identity was issued for provider '{}'",
                transfer.provider
            )));
        }
        Ok(transfer)
    }

    /// Resolve a validated identity to a local account, creating or linking as needed.
    pub fn find_or_create_user(
        &self,
        transfer: &ExternalUserTransfer,
        provider: &str,
    ) -> AuthResult<LinkOutcome> {
        if transfer.provider != provider {
            return Err(AuthError::ExternalTokenInvalid(format!(
                "identity belongs to provider '{}'",
                transfer.provider
            )));
        }
        self.identities.resolve_external_login(transfer)
    }

    pub fn has_external_login(&self, user_id: &str, provider: &str) -> AuthResult<bool> {
        Ok(self.identities.has_external_login(user_id, provider)?)
    }

    pub fn list_external_logins(&self, user_id: &str) -> AuthResult<Vec<ExternalIdentityLink>> {
        Ok(self.identities.list_external_logins(user_id)?)
    }

    /// Unlink a provider identity, refusing to remove the account's last sign-in method.
    pub fn remove_external_login(&self, user_id: &str, provider: &str, provider_key: &str) -> AuthResult<()> {
        self.identities.remove_external_login(user_id, provider, provider_key)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;

    use super::*;
    use crate::external::IdentityProvider;

    /// Accepts any access token `<id>:<email>:<verified>`.
    pub(crate) struct StubProvider {
        pub name: String,
        pub delay: Duration,
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn validate(&self, credentials: &ProviderCredentials) -> AuthResult<ExternalUserTransfer> {
            tokio::time::sleep(self.delay).await;
            let token = credentials
                .access_token()
                .ok_or_else(|| AuthError::Validation("access_token required".into()))?;
            let mut parts = token.splitn(3, ':');
            let (Some(id), Some(email), Some(verified)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(AuthError::ExternalTokenInvalid("unknown token".into()));
            };
            Ok(ExternalUserTransfer {
                provider: self.name.clone(),
                provider_user_id: id.to_string(),
                email: email.to_string(),
                email_verified: verified == "true",
                first_name: None,
                last_name: None,
                avatar_url: None,
                additional_claims: Default::default(),
            })
        }
    }

    pub(crate) fn registry_with_stub(name: &str, delay: Duration) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider {
            name: name.to_string(),
            delay,
        }));
        registry
    }

    pub(crate) fn token(value: &str) -> ProviderCredentials {
        ProviderCredentials {
            access_token: Some(value.to_string()),
            ..ProviderCredentials::default()
        }
    }
}
