// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session endpoints: registration, login, refresh and logout.

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{bearer_token, Auth, AuthError, AuthResult, ClientIp, Registration};
use crate::authorization::AuthorizeClaimData;
use crate::models::{
    LoginRequest, LogoutRequest, LogoutResponse, RefreshRequest, RegisterRequest, SessionResponse,
    TokenPairResponse, UserProfile,
};
use crate::state::AppState;

/// Response for GET /v1/auth/me
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub user_profile: UserProfile,
    /// Current grants, which may be newer than those in the access token.
    pub authorization: AuthorizeClaimData,
}

/// Run password hashing off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> AuthResult<T>
where
    F: FnOnce() -> AuthResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::Internal(format!("worker task failed: {e}")))?
}

/// Create a password account and start a session.
///
/// The first account ever registered receives the `admin` role.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = SessionResponse),
        (status = 400, description = "Invalid email or weak password", body = crate::auth::AuthErrorBody),
        (status = 409, description = "Email already registered", body = crate::auth::AuthErrorBody)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AuthError> {
    let sessions = state.sessions.clone();
    let (user, tokens) = blocking(move || {
        sessions.register(
            Registration {
                email: request.email,
                password: request.password,
                first_name: request.first_name,
                last_name: request.last_name,
            },
            &ip,
        )
    })
    .await?;
    tracing::info!(user_id = %user.id, "Account registered");

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            tokens: tokens.into(),
            user_profile: UserProfile::from(&user),
        }),
    ))
}

/// Sign in with email and password.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 401, description = "Invalid credentials", body = crate::auth::AuthErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AuthError> {
    let sessions = state.sessions.clone();
    let (user, tokens) = blocking(move || {
        sessions.login(&request.email, &request.password, &ip, request.remember_me)
    })
    .await?;

    Ok(Json(SessionResponse {
        tokens: tokens.into(),
        user_profile: UserProfile::from(&user),
    }))
}

/// Exchange a refresh token for a new token pair.
///
/// The presented refresh token is revoked. Presenting it again revokes every
/// session of the user and fails with `refresh_token_reused`. An expired
/// access token may be sent in the `Authorization` header; its subject must
/// own the refresh token.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenPairResponse),
        (status = 401, description = "Refresh token unknown, expired or reused", body = crate::auth::AuthErrorBody)
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, AuthError> {
    let access_token = if headers.contains_key(AUTHORIZATION) {
        Some(bearer_token(&headers)?)
    } else {
        None
    };
    let (_, tokens) =
        state
            .sessions
            .refresh(&request.refresh_token, access_token, &ip, request.remember_me)?;
    Ok(Json(tokens.into()))
}

/// Sign out of one session.
///
/// The refresh token identifies the session. When an access token is also
/// sent, the refresh token must belong to the same user.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Session ended", body = LogoutResponse)
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    Json(request): Json<LogoutRequest>,
) -> Result<Json<LogoutResponse>, AuthError> {
    let revoked = if headers.contains_key(AUTHORIZATION) {
        let token = bearer_token(&headers)?;
        let user_id = state.access_tokens.validate(token, false)?.claims.sub;
        state.sessions.logout(&user_id, &request.refresh_token, &ip)?
    } else {
        state.sessions.logout_token(&request.refresh_token, &ip)?
    };
    Ok(Json(LogoutResponse {
        revoked_sessions: usize::from(revoked),
    }))
}

/// Sign out of every session of the caller.
#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All sessions ended", body = LogoutResponse),
        (status = 401, description = "Not authenticated", body = crate::auth::AuthErrorBody)
    )
)]
pub async fn logout_all(
    Auth(user): Auth,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Result<Json<LogoutResponse>, AuthError> {
    let revoked_sessions = state.sessions.logout_all(&user.user_id, &ip)?;
    Ok(Json(LogoutResponse { revoked_sessions }))
}

/// Profile and current grants of the caller.
#[utoipa::path(
    get,
    path = "/v1/auth/me",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Not authenticated", body = crate::auth::AuthErrorBody)
    )
)]
pub async fn me(Auth(user): Auth, State(state): State<AppState>) -> Result<Json<MeResponse>, AuthError> {
    let account = state
        .identities
        .find_by_id(&user.user_id)?
        .ok_or(AuthError::IdentityInvalid)?;
    let authorization = state.claims_cache.get_user_authorization(&account.id)?;
    Ok(Json(MeResponse {
        user_profile: UserProfile::from(&account),
        authorization,
    }))
}
