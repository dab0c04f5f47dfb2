// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated callers.
//!
//! Use the `Auth` extractor in handlers to require a valid access token:
//!
//! ```rust,ignore
//! async fn me(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use serde::Serialize;
use utoipa::ToSchema;

use super::AuthError;
use crate::state::AppState;

/// Identity taken from a validated access token.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Local user id (`sub`)
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Roles at the time the token was issued
    pub roles: Vec<String>,
    /// Token id (`jti`)
    #[serde(skip)]
    pub token_id: Option<String>,
    /// Token expiration (Unix seconds)
    #[serde(skip)]
    pub expires_at: i64,
}

/// Extractor for authenticated users.
///
/// Validates the bearer token from the `Authorization` header, including its
/// lifetime. An expired token is rejected with `token_expired`, which clients
/// answer by refreshing.
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        let token = bearer_token(&parts.headers)?;
        let result = state.access_tokens.validate(token, true)?;
        let claims = result.claims;
        let user = AuthenticatedUser {
            user_id: claims.sub,
            email: claims.email,
            roles: claims.roles,
            token_id: claims.jti,
            expires_at: claims.exp,
        };
        parts.extensions.insert(user.clone());
        Ok(Auth(user))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidAuthHeader)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

/// Best-effort client address, recorded on refresh-token records.
///
/// Taken from the first `X-Forwarded-For` hop, then `X-Real-IP`.
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(&parts.headers)))
    }
}

fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    forwarded
        .or_else(real_ip)
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/test");
        if let Some(value) = header {
            builder = builder.header("Authorization", value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn auth_extractor_requires_auth_header() {
        let (state, _dir) = test_state();
        let mut parts = parts_with(None);
        let result = Auth::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::MissingAuthHeader)));
    }

    #[tokio::test]
    async fn auth_extractor_rejects_non_bearer() {
        let (state, _dir) = test_state();
        let mut parts = parts_with(Some("Basic dXNlcjpwYXNz"));
        let result = Auth::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::InvalidAuthHeader)));
    }

    #[tokio::test]
    async fn auth_extractor_accepts_issued_token() {
        let (state, _dir) = test_state();
        let (user, tokens) = state
            .sessions
            .register(crate::auth::session::test_support::registration("ada@example.com"), "::1")
            .unwrap();

        let mut parts = parts_with(Some(&format!("Bearer {}", tokens.access_token)));
        let Auth(authenticated) = Auth::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(authenticated.user_id, user.id);
        assert!(parts.extensions.get::<AuthenticatedUser>().is_some());
    }

    #[tokio::test]
    async fn auth_extractor_rejects_garbage_token() {
        let (state, _dir) = test_state();
        let mut parts = parts_with(Some("Bearer not.a.token"));
        let result = Auth::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::TokenMalformed)));
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&headers), "10.0.0.2");
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.9");
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }
}
