// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::auth::{AccessTokenService, AuthError, ClaimsCodec, SessionService, SigningKeys};
use crate::authorization::{AuthorizationClaimsCache, GrantManager};
use crate::config::AppConfig;
use crate::error::StartupError;
use crate::external::{ExternalIdentityLinker, ProviderRegistry};
use crate::storage::{AuthDatabase, GrantStore, IdentityStore, RefreshTokenStore};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<AuthDatabase>,
    pub sessions: SessionService,
    pub access_tokens: AccessTokenService,
    pub refresh_tokens: RefreshTokenStore,
    pub identities: IdentityStore,
    pub claims_cache: Arc<AuthorizationClaimsCache>,
    pub grants: GrantManager,
    pub linker: ExternalIdentityLinker,
}

impl AppState {
    /// Wire the services around an open database.
    pub fn new(
        db: Arc<AuthDatabase>,
        config: &AppConfig,
        keys: SigningKeys,
        providers: ProviderRegistry,
    ) -> Result<Self, StartupError> {
        let grant_store = GrantStore::new(db.clone());
        grant_store.seed_admin_role()?;

        let claims_cache = Arc::new(AuthorizationClaimsCache::new(
            Arc::new(grant_store.clone()),
            config.claims_cache,
        ));
        let access_ttl = chrono::Duration::from_std(config.access_token_ttl)
            .map_err(|e| AuthError::Internal(format!("access token TTL: {e}")))?;
        let access_tokens = AccessTokenService::new(
            ClaimsCodec::new(config.jwt_issuer.clone(), config.jwt_audience.clone()),
            keys,
            access_ttl,
            claims_cache.clone(),
        );
        let identities = IdentityStore::new(db.clone(), config.default_user_role.clone());
        let refresh_tokens =
            RefreshTokenStore::new(db.clone(), config.token_hasher(), config.refresh_tokens);
        let sessions = SessionService::new(
            access_tokens.clone(),
            refresh_tokens.clone(),
            identities.clone(),
        );
        let linker = ExternalIdentityLinker::new(
            Arc::new(providers),
            identities.clone(),
            config.provider_timeout,
        );

        Ok(Self {
            db,
            sessions,
            access_tokens,
            refresh_tokens,
            identities,
            grants: GrantManager::new(grant_store, claims_cache.clone()),
            claims_cache,
            linker,
        })
    }

    /// Open the database, load keys and providers, and wire everything.
    pub fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let db = Arc::new(AuthDatabase::open(&config.database_path())?);
        let keys = config.signing_keys()?;
        let providers = ProviderRegistry::from_configs(config.load_providers()?, config.provider_timeout)?;
        Self::new(db, config, keys, providers)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use super::*;
    use crate::external::linker::test_support::registry_with_stub;
    use crate::storage::database::test_support::temp_db;

    pub(crate) const TEST_JWT_SECRET: &str = "state-test-secret-0123456789abcdef";

    pub(crate) fn test_config() -> AppConfig {
        AppConfig::from_lookup(|name| match name {
            "JWT_SECRET" => Some(TEST_JWT_SECRET.to_string()),
            "JWT_ISSUER" => Some("https://id.example.com".to_string()),
            _ => None,
        })
        .unwrap()
    }

    /// State over a temporary database with an `acme` stub provider.
    pub(crate) fn test_state() -> (AppState, tempfile::TempDir) {
        let (db, dir) = temp_db();
        let config = test_config();
        let keys = config.signing_keys().unwrap();
        let providers = registry_with_stub("acme", Duration::ZERO);
        let state = AppState::new(db, &config, keys, providers).unwrap();
        (state, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_opens_database_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let data_dir_str = data_dir.to_str().unwrap().to_string();
        let config = AppConfig::from_lookup(|name| match name {
            "JWT_SECRET" => Some(test_support::TEST_JWT_SECRET.to_string()),
            "DATA_DIR" => Some(data_dir_str.clone()),
            _ => None,
        })
        .unwrap();

        let state = AppState::from_config(&config).unwrap();
        assert!(data_dir.join("auth.redb").exists());
        assert!(state.linker.providers().names().is_empty());
        assert!(state.claims_cache.is_empty());
    }
}
