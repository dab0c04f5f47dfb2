// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authorization
//!
//! Per-user roles, permissions and policies, served through
//! [`AuthorizationClaimsCache`] and mutated through [`GrantManager`].
//!
//! The grant tables in storage are the source of truth. The cache is a
//! performance layer only and rebuilds from cold after eviction or restart.

pub mod cache;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::AuthResult;
use crate::storage::{GrantStore, StoreResult, UserGrants};

pub use cache::{AuthorizationClaimsCache, CacheSettings};

/// Effective authorization of one user.
///
/// Lists keep first-seen order on the wire, but equality ignores order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeClaimData {
    pub user_id: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub policies: Vec<String>,
}

impl AuthorizeClaimData {
    /// Build claim data, dropping duplicate and blank entries.
    pub fn new(
        user_id: impl Into<String>,
        roles: Vec<String>,
        permissions: Vec<String>,
        policies: Vec<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            roles: dedup(roles),
            permissions: dedup(permissions),
            policies: dedup(policies),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn has_policy(&self, policy: &str) -> bool {
        self.policies.iter().any(|p| p == policy)
    }
}

impl PartialEq for AuthorizeClaimData {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && same_set(&self.roles, &other.roles)
            && same_set(&self.permissions, &other.permissions)
            && same_set(&self.policies, &other.policies)
    }
}

impl Eq for AuthorizeClaimData {}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| !v.trim().is_empty() && seen.insert(v.clone()))
        .collect()
}

/// Order-insensitive comparison of two claim lists.
pub(crate) fn same_set(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    a == b
}

/// Source of truth the claims cache recomputes from.
pub trait AuthorizationSource: Send + Sync {
    fn load(&self, user_id: &str) -> StoreResult<AuthorizeClaimData>;
}

/// Grant mutations that keep the claims cache consistent.
///
/// Every write commits first and invalidates second, so a reader that
/// repopulates after the invalidation always sees the new grants.
#[derive(Clone)]
pub struct GrantManager {
    store: GrantStore,
    cache: Arc<AuthorizationClaimsCache>,
}

impl GrantManager {
    pub fn new(store: GrantStore, cache: Arc<AuthorizationClaimsCache>) -> Self {
        Self { store, cache }
    }

    pub fn user_grants(&self, user_id: &str) -> AuthResult<UserGrants> {
        Ok(self.store.user_grants(user_id)?)
    }

    /// Replace a user's grants and drop their cached claims.
    pub fn set_user_grants(&self, user_id: &str, grants: UserGrants) -> AuthResult<UserGrants> {
        let grants = UserGrants {
            roles: dedup(grants.roles),
            permissions: dedup(grants.permissions),
            policies: dedup(grants.policies),
        };
        self.store.set_user_grants(user_id, &grants)?;
        self.cache.invalidate_user_authorization(user_id);
        tracing::debug!(user_id = %user_id, roles = ?grants.roles, "User grants updated");
        Ok(grants)
    }

    /// Replace a role's permissions and drop every cached entry holding it.
    pub fn set_role_permissions(&self, role: &str, permissions: Vec<String>) -> AuthResult<Vec<String>> {
        let permissions = dedup(permissions);
        self.store.set_role_permissions(role, &permissions)?;
        self.cache.invalidate_role(role);
        tracing::debug!(role = %role, count = permissions.len(), "Role permissions updated");
        Ok(permissions)
    }
}
