// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External provider sign-in and linked-login management.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::auth::{Auth, AuthError, ClientIp};
use crate::external::ProviderCredentials;
use crate::models::{
    ExternalExchangeRequest, ExternalExchangeResponse, ExternalLoginResponse, ExternalLoginsResponse,
    UserProfile,
};
use crate::state::AppState;

/// Exchange a provider credential for a local session.
///
/// An existing link signs the linked account in. Otherwise an account with
/// the same *verified* email is linked, or a new account is created. An
/// unverified provider email never links to an existing account.
#[utoipa::path(
    post,
    path = "/v1/auth/external",
    tag = "External",
    request_body = ExternalExchangeRequest,
    responses(
        (status = 200, description = "Signed in", body = ExternalExchangeResponse),
        (status = 400, description = "Unknown provider or missing credential", body = crate::auth::AuthErrorBody),
        (status = 401, description = "Provider rejected the credential", body = crate::auth::AuthErrorBody),
        (status = 409, description = "Email belongs to another account", body = crate::auth::AuthErrorBody),
        (status = 502, description = "Provider unreachable", body = crate::auth::AuthErrorBody)
    )
)]
pub async fn exchange(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<ExternalExchangeRequest>,
) -> Result<Json<ExternalExchangeResponse>, AuthError> {
    let credentials = ProviderCredentials {
        access_token: request.access_token,
        id_token: request.id_token,
        authorization_code: request.authorization_code,
        redirect_uri: request.redirect_uri,
    };
    let transfer = state
        .linker
        .validate_provider_token(&request.provider, &credentials)
        .await?;
    let outcome = state.linker.find_or_create_user(&transfer, &request.provider)?;
    let tokens = state
        .sessions
        .start_session(&outcome.user, &ip, request.remember_me)?;

    tracing::info!(
        user_id = %outcome.user.id,
        provider = %request.provider,
        is_new_user = outcome.is_new_user,
        is_new_login = outcome.is_new_login,
        "External sign-in"
    );
    Ok(Json(ExternalExchangeResponse {
        tokens: tokens.into(),
        is_new_user: outcome.is_new_user,
        is_new_login: outcome.is_new_login,
        user_profile: UserProfile::from(&outcome.user),
    }))
}

/// Provider identities linked to the caller.
#[utoipa::path(
    get,
    path = "/v1/auth/external-logins",
    tag = "External",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Linked logins", body = ExternalLoginsResponse),
        (status = 401, description = "Not authenticated", body = crate::auth::AuthErrorBody)
    )
)]
pub async fn list_logins(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<ExternalLoginsResponse>, AuthError> {
    let logins = state
        .linker
        .list_external_logins(&user.user_id)?
        .into_iter()
        .map(ExternalLoginResponse::from)
        .collect();
    Ok(Json(ExternalLoginsResponse {
        logins,
        available_providers: state.linker.providers().names(),
    }))
}

/// Unlink a provider identity from the caller.
///
/// Refused when it is the account's only way to sign in.
#[utoipa::path(
    delete,
    path = "/v1/auth/external-logins/{provider}/{provider_key}",
    tag = "External",
    security(("bearer_auth" = [])),
    params(
        ("provider" = String, Path, description = "Provider name"),
        ("provider_key" = String, Path, description = "User id at the provider")
    ),
    responses(
        (status = 204, description = "Login removed"),
        (status = 404, description = "No such login for the caller", body = crate::auth::AuthErrorBody),
        (status = 409, description = "Last remaining login method", body = crate::auth::AuthErrorBody)
    )
)]
pub async fn remove_login(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path((provider, provider_key)): Path<(String, String)>,
) -> Result<StatusCode, AuthError> {
    state
        .linker
        .remove_external_login(&user.user_id, &provider, &provider_key)?;
    Ok(StatusCode::NO_CONTENT)
}
