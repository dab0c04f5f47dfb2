// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Grant management endpoints.
//!
//! Changes take effect for authorization checks on the next request; access
//! tokens already issued keep their embedded claims until they expire.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::auth::{Auth, AuthError};
use crate::models::{RolePermissionsBody, UserGrantsBody};
use crate::state::AppState;
use crate::storage::{MANAGE_GRANTS_PERMISSION, MANAGE_ROLES_PERMISSION};

/// Replace a user's roles, direct permissions and policies.
#[utoipa::path(
    put,
    path = "/v1/users/{user_id}/grants",
    tag = "Grants",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Local user id")),
    request_body = UserGrantsBody,
    responses(
        (status = 200, description = "Stored grants", body = UserGrantsBody),
        (status = 400, description = "Unknown user", body = crate::auth::AuthErrorBody),
        (status = 401, description = "Not authenticated", body = crate::auth::AuthErrorBody),
        (status = 403, description = "Missing users.manage_grants", body = crate::auth::AuthErrorBody)
    )
)]
pub async fn put_user_grants(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<UserGrantsBody>,
) -> Result<Json<UserGrantsBody>, AuthError> {
    state
        .claims_cache
        .require_permission(&caller.user_id, MANAGE_GRANTS_PERMISSION)?;
    if state.identities.find_by_id(&user_id)?.is_none() {
        return Err(AuthError::Validation(format!("user '{user_id}' does not exist")));
    }

    let stored = state.grants.set_user_grants(&user_id, body.into())?;
    tracing::info!(user_id = %user_id, changed_by = %caller.user_id, "User grants replaced");
    Ok(Json(stored.into()))
}

/// Replace the permissions attached to a role.
#[utoipa::path(
    put,
    path = "/v1/roles/{role}/permissions",
    tag = "Grants",
    security(("bearer_auth" = [])),
    params(("role" = String, Path, description = "Role name")),
    request_body = RolePermissionsBody,
    responses(
        (status = 200, description = "Stored permissions", body = RolePermissionsBody),
        (status = 401, description = "Not authenticated", body = crate::auth::AuthErrorBody),
        (status = 403, description = "Missing roles.manage", body = crate::auth::AuthErrorBody)
    )
)]
pub async fn put_role_permissions(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(role): Path<String>,
    Json(body): Json<RolePermissionsBody>,
) -> Result<Json<RolePermissionsBody>, AuthError> {
    state
        .claims_cache
        .require_permission(&caller.user_id, MANAGE_ROLES_PERMISSION)?;
    if role.trim().is_empty() {
        return Err(AuthError::Validation("role name is required".to_string()));
    }

    let permissions = state.grants.set_role_permissions(&role, body.permissions)?;
    tracing::info!(role = %role, changed_by = %caller.user_id, "Role permissions replaced");
    Ok(Json(RolePermissionsBody { permissions }))
}
