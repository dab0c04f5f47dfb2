// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Roles, permissions and policies: the source of truth behind the
//! authorization claims cache.

use std::sync::Arc;

use redb::ReadableTable;
use serde::{Deserialize, Serialize};

use super::database::{decode, encode, AuthDatabase, StoreResult, ROLE_PERMISSIONS, USER_GRANTS};
use crate::authorization::{AuthorizationSource, AuthorizeClaimData};

/// Permission required to change another user's grants.
pub const MANAGE_GRANTS_PERMISSION: &str = "users.manage_grants";

/// Permission required to change a role's permissions.
pub const MANAGE_ROLES_PERMISSION: &str = "roles.manage";

/// Grants assigned directly to a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserGrants {
    #[serde(default)]
    pub roles: Vec<String>,
    /// Permissions granted in addition to those of the roles
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub policies: Vec<String>,
}

/// Store for user grants and role permissions.
#[derive(Clone)]
pub struct GrantStore {
    db: Arc<AuthDatabase>,
}

impl GrantStore {
    pub fn new(db: Arc<AuthDatabase>) -> Self {
        Self { db }
    }

    /// Give the bootstrap admin role its management permissions if it has none yet.
    pub fn seed_admin_role(&self) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ROLE_PERMISSIONS)?;
            let exists = table.get(super::BOOTSTRAP_ADMIN_ROLE)?.is_some();
            if !exists {
                let permissions = vec![
                    MANAGE_GRANTS_PERMISSION.to_string(),
                    MANAGE_ROLES_PERMISSION.to_string(),
                ];
                table.insert(super::BOOTSTRAP_ADMIN_ROLE, encode(&permissions)?.as_slice())?;
                tracing::info!("Seeded admin role permissions");
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Grants assigned to a user (empty if none).
    pub fn user_grants(&self, user_id: &str) -> StoreResult<UserGrants> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USER_GRANTS)?;
        match table.get(user_id)? {
            Some(value) => decode(value.value()),
            None => Ok(UserGrants::default()),
        }
    }

    /// Replace a user's grants.
    ///
    /// Callers must invalidate the user's cached claims afterwards; use
    /// [`crate::authorization::GrantManager`] rather than calling this directly.
    pub fn set_user_grants(&self, user_id: &str, grants: &UserGrants) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(USER_GRANTS)?;
            table.insert(user_id, encode(grants)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Permissions attached to a role (empty if the role is unknown).
    pub fn role_permissions(&self, role: &str) -> StoreResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ROLE_PERMISSIONS)?;
        match table.get(role)? {
            Some(value) => decode(value.value()),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the permissions of a role.
    pub fn set_role_permissions(&self, role: &str, permissions: &[String]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ROLE_PERMISSIONS)?;
            table.insert(role, encode(&permissions)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Effective authorization of a user, read from one snapshot.
    ///
    /// Permissions are the user's direct permissions followed by those of each
    /// role, deduplicated in first-seen order.
    pub fn load_authorization(&self, user_id: &str) -> StoreResult<AuthorizeClaimData> {
        let read_txn = self.db.begin_read()?;
        let grants_table = read_txn.open_table(USER_GRANTS)?;
        let roles_table = read_txn.open_table(ROLE_PERMISSIONS)?;

        let grants: UserGrants = match grants_table.get(user_id)? {
            Some(value) => decode(value.value())?,
            None => UserGrants::default(),
        };

        let mut permissions = grants.permissions.clone();
        for role in &grants.roles {
            if let Some(value) = roles_table.get(role.as_str())? {
                let role_permissions: Vec<String> = decode(value.value())?;
                permissions.extend(role_permissions);
            }
        }

        Ok(AuthorizeClaimData::new(
            user_id,
            grants.roles,
            permissions,
            grants.policies,
        ))
    }
}

impl AuthorizationSource for GrantStore {
    fn load(&self, user_id: &str) -> StoreResult<AuthorizeClaimData> {
        self.load_authorization(user_id)
    }
}
