// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User accounts and external identity links.
//!
//! The account-linking decision (existing link, verified-email merge, or new
//! account) runs inside a single write transaction so that two concurrent
//! exchanges of the same provider identity cannot both create a link.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{ReadableTable, ReadableTableMetadata, Table, WriteTransaction};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use super::database::{
    compound_key, decode, encode, prefix_range, AuthDatabase, StoreError, StoreResult, EXTERNAL_LOGINS,
    USERS, USER_EMAILS, USER_EXTERNAL_LOGINS, USER_GRANTS,
};
use super::grants::UserGrants;
use crate::auth::{AuthError, AuthResult};
use crate::external::ExternalUserTransfer;

/// Role granted to the very first account.
pub const BOOTSTRAP_ADMIN_ROLE: &str = "admin";

/// A local user account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAccount {
    /// Stable subject identifier (UUID)
    pub id: String,
    /// Email as provided
    pub email: String,
    /// Whether the email address was verified
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// bcrypt hash; `None` for accounts created through an external provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// Whether the account can sign in with a password.
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Fields for a new account.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub password_hash: Option<String>,
}

/// Durable link between a provider identity and a local account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalIdentityLink {
    pub provider: String,
    pub provider_user_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Result of resolving an external login to a local account.
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    pub user: UserAccount,
    /// A new local account was created
    pub is_new_user: bool,
    /// A new provider link was created
    pub is_new_login: bool,
}

/// Normalize an email for uniqueness checks (NFKC, trimmed, lowercase).
pub fn normalize_email(email: &str) -> String {
    email.trim().nfkc().collect::<String>().to_lowercase()
}

/// Store for user accounts and their external logins.
#[derive(Clone)]
pub struct IdentityStore {
    db: Arc<AuthDatabase>,
    default_role: String,
}

impl IdentityStore {
    pub fn new(db: Arc<AuthDatabase>, default_role: impl Into<String>) -> Self {
        Self {
            db,
            default_role: default_role.into(),
        }
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Look up a user by id.
    pub fn find_by_id(&self, user_id: &str) -> StoreResult<Option<UserAccount>> {
        let read_txn = self.db.begin_read()?;
        let users = read_txn.open_table(USERS)?;
        match users.get(user_id)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Look up a user by email (normalized).
    pub fn find_by_email(&self, email: &str) -> StoreResult<Option<UserAccount>> {
        let read_txn = self.db.begin_read()?;
        let emails = read_txn.open_table(USER_EMAILS)?;
        let users = read_txn.open_table(USERS)?;
        let Some(user_id) = emails
            .get(normalize_email(email).as_str())?
            .map(|v| v.value().to_string())
        else {
            return Ok(None);
        };
        match users.get(user_id.as_str())? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Create a local account. Fails if the email is taken.
    pub fn create_user(&self, new_user: NewUser) -> AuthResult<UserAccount> {
        let write_txn = self.db.begin_write()?;
        let created = self.create_user_within(&write_txn, new_user)?;
        let user = match created {
            Some(user) => user,
            None => return Err(AuthError::EmailAlreadyRegistered),
        };
        write_txn.commit().map_err(StoreError::from)?;
        tracing::info!(user_id = %user.id, "User account created");
        Ok(user)
    }

    /// Insert a user plus its initial grants. Returns `None` if the email is taken.
    fn create_user_within(
        &self,
        txn: &WriteTransaction,
        new_user: NewUser,
    ) -> StoreResult<Option<UserAccount>> {
        let mut users = txn.open_table(USERS)?;
        let mut emails = txn.open_table(USER_EMAILS)?;
        let mut grants = txn.open_table(USER_GRANTS)?;

        let normalized = normalize_email(&new_user.email);
        if emails.get(normalized.as_str())?.is_some() {
            return Ok(None);
        }

        let is_first_user = users.is_empty()?;
        let user = UserAccount {
            id: uuid::Uuid::new_v4().to_string(),
            email: new_user.email.trim().to_string(),
            email_verified: new_user.email_verified,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            avatar_url: new_user.avatar_url,
            password_hash: new_user.password_hash,
            created_at: Utc::now(),
        };

        let mut roles = vec![self.default_role.clone()];
        if is_first_user {
            roles.insert(0, BOOTSTRAP_ADMIN_ROLE.to_string());
            tracing::info!(user_id = %user.id, "First account granted admin role");
        }
        let initial = UserGrants {
            roles,
            ..UserGrants::default()
        };

        users.insert(user.id.as_str(), encode(&user)?.as_slice())?;
        emails.insert(normalized.as_str(), user.id.as_str())?;
        grants.insert(user.id.as_str(), encode(&initial)?.as_slice())?;
        Ok(Some(user))
    }

    // =========================================================================
    // External logins
    // =========================================================================

    /// Resolve a validated provider identity to a local account.
    ///
    /// Lookup order:
    /// 1. an existing link for `(provider, provider_user_id)` → that account
    /// 2. an account with the same email, only if both the provider and the
    ///    account have the email verified → link it (account merge)
    /// 3. otherwise → a new account plus the link
    ///
    /// An unverified email on either side never merges. If the email collides
    /// with an existing account the exchange is rejected with
    /// [`AuthError::EmailAlreadyRegistered`].
    pub fn resolve_external_login(
        &self,
        transfer: &ExternalUserTransfer,
    ) -> AuthResult<LinkOutcome> {
        let write_txn = self.db.begin_write()?;
        let outcome = self.resolve_within(&write_txn, transfer)?;
        write_txn.commit().map_err(StoreError::from)?;
        Ok(outcome)
    }

    fn resolve_within(
        &self,
        txn: &WriteTransaction,
        transfer: &ExternalUserTransfer,
    ) -> AuthResult<LinkOutcome> {
        let link_key = compound_key(&[&transfer.provider, &transfer.provider_user_id]);

        // (a) Existing link
        let existing_link = {
            let links = txn.open_table(EXTERNAL_LOGINS).map_err(StoreError::from)?;
            let found = links
                .get(link_key.as_str())
                .map_err(StoreError::from)?
                .map(|v| v.value().to_vec());
            match found {
                Some(bytes) => Some(decode::<ExternalIdentityLink>(&bytes)?),
                None => None,
            }
        };
        if let Some(link) = existing_link {
            let user = load_user_within(txn, &link.user_id)?.ok_or_else(|| {
                AuthError::Internal(format!("linked user {} is missing", link.user_id))
            })?;
            return Ok(LinkOutcome {
                user,
                is_new_user: false,
                is_new_login: false,
            });
        }

        // (b) Merge into an existing account by verified email
        let existing_user_id = {
            let emails = txn.open_table(USER_EMAILS).map_err(StoreError::from)?;
            let found = emails
                .get(normalize_email(&transfer.email).as_str())
                .map_err(StoreError::from)?
                .map(|v| v.value().to_string());
            found
        };
        if let Some(user_id) = existing_user_id {
            let user = load_user_within(txn, &user_id)?
                .ok_or_else(|| AuthError::Internal(format!("user {user_id} is missing")))?;
            // Both sides must have proven ownership of the address
            if !transfer.email_verified || !user.email_verified {
                tracing::warn!(
                    provider = %transfer.provider,
                    user_id = %user_id,
                    provider_verified = transfer.email_verified,
                    account_verified = user.email_verified,
                    "Refusing to merge external login on unverified email"
                );
                return Err(AuthError::EmailAlreadyRegistered);
            }
            insert_link_within(txn, transfer, &user.id)?;
            tracing::info!(
                provider = %transfer.provider,
                user_id = %user.id,
                "External login merged into existing account"
            );
            return Ok(LinkOutcome {
                user,
                is_new_user: false,
                is_new_login: true,
            });
        }

        // (c) Brand new account
        let new_user = NewUser {
            email: transfer.email.clone(),
            email_verified: transfer.email_verified,
            first_name: transfer.first_name.clone(),
            last_name: transfer.last_name.clone(),
            avatar_url: transfer.avatar_url.clone(),
            password_hash: None,
        };
        let user = self
            .create_user_within(txn, new_user)?
            .ok_or(AuthError::EmailAlreadyRegistered)?;
        insert_link_within(txn, transfer, &user.id)?;
        tracing::info!(
            provider = %transfer.provider,
            user_id = %user.id,
            "Account created from external login"
        );
        Ok(LinkOutcome {
            user,
            is_new_user: true,
            is_new_login: true,
        })
    }

    /// List all external logins of a user.
    pub fn list_external_logins(&self, user_id: &str) -> StoreResult<Vec<ExternalIdentityLink>> {
        let read_txn = self.db.begin_read()?;
        let by_user = read_txn.open_table(USER_EXTERNAL_LOGINS)?;
        let links = read_txn.open_table(EXTERNAL_LOGINS)?;

        let (start, end) = prefix_range(user_id);
        let mut result = Vec::new();
        for entry in by_user.range(start.as_str()..end.as_str())? {
            let (_, link_key) = entry?;
            if let Some(value) = links.get(link_key.value())? {
                result.push(decode(value.value())?);
            }
        }
        Ok(result)
    }

    /// Whether the user has a login with the given provider.
    pub fn has_external_login(&self, user_id: &str, provider: &str) -> StoreResult<bool> {
        Ok(self
            .list_external_logins(user_id)?
            .iter()
            .any(|link| link.provider == provider))
    }

    /// Remove an external login.
    ///
    /// Fails with [`AuthError::LastLoginMethodCannotBeRemoved`] when the
    /// account has no password and this is its only external login.
    pub fn remove_external_login(
        &self,
        user_id: &str,
        provider: &str,
        provider_key: &str,
    ) -> AuthResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let user = load_user_within(&write_txn, user_id)?.ok_or(AuthError::IdentityInvalid)?;
            let mut links = write_txn
                .open_table(EXTERNAL_LOGINS)
                .map_err(StoreError::from)?;
            let mut by_user = write_txn
                .open_table(USER_EXTERNAL_LOGINS)
                .map_err(StoreError::from)?;

            let link_key = compound_key(&[provider, provider_key]);
            let owned = links
                .get(link_key.as_str())
                .map_err(StoreError::from)?
                .map(|v| v.value().to_vec());
            let link: ExternalIdentityLink = match owned {
                Some(bytes) => decode(&bytes)?,
                None => return Err(AuthError::ExternalLoginNotFound),
            };
            if link.user_id != user.id {
                return Err(AuthError::ExternalLoginNotFound);
            }

            let login_count = count_logins(&by_user, user_id)?;
            if !user.has_password() && login_count <= 1 {
                return Err(AuthError::LastLoginMethodCannotBeRemoved);
            }

            links
                .remove(link_key.as_str())
                .map_err(StoreError::from)?;
            let index_key = compound_key(&[user_id, provider, provider_key]);
            by_user
                .remove(index_key.as_str())
                .map_err(StoreError::from)?;
        }
        write_txn.commit().map_err(StoreError::from)?;
        tracing::info!(user_id = %user_id, provider = %provider, "External login removed");
        Ok(())
    }
}

fn load_user_within(txn: &WriteTransaction, user_id: &str) -> StoreResult<Option<UserAccount>> {
    let users = txn.open_table(USERS)?;
    let found = users.get(user_id)?.map(|v| v.value().to_vec());
    match found {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

fn insert_link_within(
    txn: &WriteTransaction,
    transfer: &ExternalUserTransfer,
    user_id: &str,
) -> StoreResult<()> {
    let mut links = txn.open_table(EXTERNAL_LOGINS)?;
    let mut by_user = txn.open_table(USER_EXTERNAL_LOGINS)?;
    let link = ExternalIdentityLink {
        provider: transfer.provider.clone(),
        provider_user_id: transfer.provider_user_id.clone(),
        user_id: user_id.to_string(),
        created_at: Utc::now(),
    };
    let link_key = compound_key(&[&link.provider, &link.provider_user_id]);
    let index_key = compound_key(&[user_id, &link.provider, &link.provider_user_id]);
    links.insert(link_key.as_str(), encode(&link)?.as_slice())?;
    by_user.insert(index_key.as_str(), link_key.as_str())?;
    Ok(())
}

fn count_logins(
    by_user: &Table<'_, &'static str, &'static str>,
    user_id: &str,
) -> StoreResult<usize> {
    let (start, end) = prefix_range(user_id);
    let mut count = 0;
    for entry in by_user.range(start.as_str()..end.as_str())? {
        entry?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::test_support::temp_db;
    use crate::storage::GrantStore;

    fn transfer(provider_user_id: &str, email: &str, verified: bool) -> ExternalUserTransfer {
        ExternalUserTransfer {
            provider: "google".to_string(),
            provider_user_id: provider_user_id.to_string(),
            email: email.to_string(),
            email_verified: verified,
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            avatar_url: None,
            additional_claims: Default::default(),
        }
    }

    fn local_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            email_verified: true,
            password_hash: Some("$2b$04$hash".to_string()),
            ..NewUser::default()
        }
    }

    #[test]
    fn normalize_email_folds_case_and_width() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
        // Fullwidth 'Ａ' normalizes to 'a'
        assert_eq!(normalize_email("\u{FF21}da@example.com"), "ada@example.com");
    }

    #[test]
    fn first_user_is_admin() {
        let (db, _dir) = temp_db();
        let store = IdentityStore::new(db.clone(), "customer");
        let grants = GrantStore::new(db);

        let first = store.create_user(local_user("first@example.com")).unwrap();
        let second = store.create_user(local_user("second@example.com")).unwrap();

        assert_eq!(
            grants.user_grants(&first.id).unwrap().roles,
            vec!["admin".to_string(), "customer".to_string()]
        );
        assert_eq!(
            grants.user_grants(&second.id).unwrap().roles,
            vec!["customer".to_string()]
        );
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let (db, _dir) = temp_db();
        let store = IdentityStore::new(db, "customer");
        store.create_user(local_user("ada@example.com")).unwrap();
        let err = store.create_user(local_user("ADA@example.com")).unwrap_err();
        assert_eq!(err, AuthError::EmailAlreadyRegistered);
    }

    #[test]
    fn new_identity_creates_user_and_link() {
        let (db, _dir) = temp_db();
        let store = IdentityStore::new(db, "customer");

        let outcome = store
            .resolve_external_login(&transfer("g-1", "ada@example.com", true))
            .unwrap();
        assert!(outcome.is_new_user);
        assert!(outcome.is_new_login);
        assert!(!outcome.user.has_password());
        assert!(store.has_external_login(&outcome.user.id, "google").unwrap());
    }

    #[test]
    fn repeated_exchange_reuses_link() {
        let (db, _dir) = temp_db();
        let store = IdentityStore::new(db, "customer");
        let t = transfer("g-1", "ada@example.com", true);

        let first = store.resolve_external_login(&t).unwrap();
        let second = store.resolve_external_login(&t).unwrap();

        assert!(!second.is_new_user);
        assert!(!second.is_new_login);
        assert_eq!(first.user.id, second.user.id);
        assert_eq!(store.list_external_logins(&first.user.id).unwrap().len(), 1);
    }

    #[test]
    fn verified_email_merges_into_existing_account() {
        let (db, _dir) = temp_db();
        let store = IdentityStore::new(db, "customer");
        let local = store.create_user(local_user("ada@example.com")).unwrap();

        let outcome = store
            .resolve_external_login(&transfer("g-1", "Ada@Example.com", true))
            .unwrap();
        assert_eq!(outcome.user.id, local.id);
        assert!(!outcome.is_new_user);
        assert!(outcome.is_new_login);
    }

    #[test]
    fn unverified_email_never_merges() {
        let (db, _dir) = temp_db();
        let store = IdentityStore::new(db, "customer");
        let local = store.create_user(local_user("ada@example.com")).unwrap();

        let err = store
            .resolve_external_login(&transfer("g-1", "ada@example.com", false))
            .unwrap_err();
        assert_eq!(err, AuthError::EmailAlreadyRegistered);
        assert!(store.list_external_logins(&local.id).unwrap().is_empty());
    }

    #[test]
    fn unverified_local_account_never_absorbs_provider_login() {
        let (db, _dir) = temp_db();
        let store = IdentityStore::new(db, "customer");
        let squatter = store
            .create_user(NewUser {
                email_verified: false,
                ..local_user("ada@example.com")
            })
            .unwrap();

        let err = store
            .resolve_external_login(&transfer("g-1", "ada@example.com", true))
            .unwrap_err();
        assert_eq!(err, AuthError::EmailAlreadyRegistered);
        assert!(store.list_external_logins(&squatter.id).unwrap().is_empty());
        assert!(!store.has_external_login(&squatter.id, "google").unwrap());
    }

    #[test]
    fn last_login_method_cannot_be_removed() {
        let (db, _dir) = temp_db();
        let store = IdentityStore::new(db, "customer");
        let outcome = store
            .resolve_external_login(&transfer("g-1", "ada@example.com", true))
            .unwrap();

        let err = store
            .remove_external_login(&outcome.user.id, "google", "g-1")
            .unwrap_err();
        assert_eq!(err, AuthError::LastLoginMethodCannotBeRemoved);
        assert!(store.has_external_login(&outcome.user.id, "google").unwrap());
    }

    #[test]
    fn login_removable_when_password_exists() {
        let (db, _dir) = temp_db();
        let store = IdentityStore::new(db, "customer");
        let local = store.create_user(local_user("ada@example.com")).unwrap();
        store
            .resolve_external_login(&transfer("g-1", "ada@example.com", true))
            .unwrap();

        store.remove_external_login(&local.id, "google", "g-1").unwrap();
        assert!(!store.has_external_login(&local.id, "google").unwrap());

        let err = store
            .remove_external_login(&local.id, "google", "g-1")
            .unwrap_err();
        assert_eq!(err, AuthError::ExternalLoginNotFound);
    }

    #[test]
    fn cannot_remove_another_users_login() {
        let (db, _dir) = temp_db();
        let store = IdentityStore::new(db, "customer");
        let owner = store
            .resolve_external_login(&transfer("g-1", "owner@example.com", true))
            .unwrap();
        let other = store.create_user(local_user("other@example.com")).unwrap();

        let err = store
            .remove_external_login(&other.id, "google", "g-1")
            .unwrap_err();
        assert_eq!(err, AuthError::ExternalLoginNotFound);
        assert!(store.has_external_login(&owner.user.id, "google").unwrap());
    }
}
