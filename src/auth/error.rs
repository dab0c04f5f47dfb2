// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Every failure that can cross the HTTP boundary is one of these variants.
//! Clients branch on [`AuthError::error_code`], never on the message text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::StoreError;

/// Result alias used by the services in this crate.
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No authorization header present
    #[error("Authorization header is required")]
    MissingAuthHeader,
    /// Invalid authorization header format
    #[error("Invalid authorization header format (expected 'Bearer <token>')")]
    InvalidAuthHeader,
    /// Token could not be parsed
    #[error("Token is malformed")]
    TokenMalformed,
    /// Token signature does not verify
    #[error("Token signature is invalid")]
    TokenSignatureInvalid,
    /// Access token has expired
    #[error("Token has expired")]
    TokenExpired,
    /// Token was not issued by this service
    #[error("Token issuer is invalid")]
    TokenIssuerMismatch,
    /// Token was issued for another audience
    #[error("Token audience is invalid")]
    TokenAudienceMismatch,
    /// Token `nbf` is in the future
    #[error("Token is not yet valid")]
    TokenNotYetValid,
    /// The user has no stable subject identifier
    #[error("User identity is invalid")]
    IdentityInvalid,
    /// Email or password is wrong
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// Refresh token is unknown
    #[error("Refresh token was not found")]
    RefreshTokenNotFound,
    /// A revoked refresh token was presented again
    #[error("Refresh token was already used; all sessions were signed out")]
    RefreshTokenReused,
    /// Refresh token lifetime has elapsed
    #[error("Refresh token has expired")]
    RefreshTokenExpired,
    /// No verifier is configured for the named provider
    #[error("External provider '{0}' is not configured")]
    ExternalProviderNotConfigured(String),
    /// Provider rejected the token, or its claims are unusable
    #[error("External token is invalid: {0}")]
    ExternalTokenInvalid(String),
    /// Provider could not be reached in time
    #[error("External provider is unreachable: {0}")]
    ExternalProviderUnreachable(String),
    /// The external login to remove does not exist
    #[error("External login not found")]
    ExternalLoginNotFound,
    /// Removing this login would leave the account without any sign-in method
    #[error("The last login method of an account cannot be removed")]
    LastLoginMethodCannotBeRemoved,
    /// Another account already owns this email
    #[error("Email is already registered")]
    EmailAlreadyRegistered,
    /// Insufficient permissions
    #[error("Insufficient permissions for this operation")]
    InsufficientPermissions,
    /// Request payload failed validation
    #[error("Validation failed: {0}")]
    Validation(String),
    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),
    /// Internal error
    #[error("Internal authentication error: {0}")]
    Internal(String),
}

/// Error categories used by clients to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Never retried, always 401.
    Format,
    /// Access-token expiry is handled by refresh; refresh expiry forces sign-in.
    Temporal,
    /// Refresh-token reuse; every session was revoked.
    SecurityIncident,
    /// Provider failures; the caller may retry with backoff.
    ExternalProvider,
    /// Rejected locally, nothing applied.
    AccountState,
    /// Authenticated but not allowed.
    Authorization,
    /// Request shape problems.
    Request,
    /// Server-side failures.
    Internal,
}

/// Wire representation of an [`AuthError`].
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthErrorBody {
    /// Human-readable description
    pub error: String,
    /// Machine-readable code
    pub error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::TokenMalformed => "token_malformed",
            AuthError::TokenSignatureInvalid => "token_signature_invalid",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenIssuerMismatch => "token_issuer_mismatch",
            AuthError::TokenAudienceMismatch => "token_audience_mismatch",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::IdentityInvalid => "identity_invalid",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::RefreshTokenNotFound => "refresh_token_not_found",
            AuthError::RefreshTokenReused => "refresh_token_reused",
            AuthError::RefreshTokenExpired => "refresh_token_expired",
            AuthError::ExternalProviderNotConfigured(_) => "external_provider_not_configured",
            AuthError::ExternalTokenInvalid(_) => "external_token_invalid",
            AuthError::ExternalProviderUnreachable(_) => "external_provider_unreachable",
            AuthError::ExternalLoginNotFound => "external_login_not_found",
            AuthError::LastLoginMethodCannotBeRemoved => "last_login_method_cannot_be_removed",
            AuthError::EmailAlreadyRegistered => "email_already_registered",
            AuthError::InsufficientPermissions => "insufficient_permissions",
            AuthError::Validation(_) => "validation_error",
            AuthError::Storage(_) => "storage_error",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Rebuild an error from its wire code.
    ///
    /// Used by the client SDK to turn a server error body back into a typed
    /// error. Unknown codes become [`AuthError::Internal`].
    pub fn from_code(code: &str, message: &str) -> Self {
        match code {
            "missing_auth_header" => AuthError::MissingAuthHeader,
            "invalid_auth_header" => AuthError::InvalidAuthHeader,
            "token_malformed" => AuthError::TokenMalformed,
            "token_signature_invalid" => AuthError::TokenSignatureInvalid,
            "token_expired" => AuthError::TokenExpired,
            "token_issuer_mismatch" => AuthError::TokenIssuerMismatch,
            "token_audience_mismatch" => AuthError::TokenAudienceMismatch,
            "token_not_yet_valid" => AuthError::TokenNotYetValid,
            "identity_invalid" => AuthError::IdentityInvalid,
            "invalid_credentials" => AuthError::InvalidCredentials,
            "refresh_token_not_found" => AuthError::RefreshTokenNotFound,
            "refresh_token_reused" => AuthError::RefreshTokenReused,
            "refresh_token_expired" => AuthError::RefreshTokenExpired,
            "external_provider_not_configured" => {
                AuthError::ExternalProviderNotConfigured(message.to_string())
            }
            "external_token_invalid" => AuthError::ExternalTokenInvalid(message.to_string()),
            "external_provider_unreachable" => {
                AuthError::ExternalProviderUnreachable(message.to_string())
            }
            "external_login_not_found" => AuthError::ExternalLoginNotFound,
            "last_login_method_cannot_be_removed" => AuthError::LastLoginMethodCannotBeRemoved,
            "email_already_registered" => AuthError::EmailAlreadyRegistered,
            "insufficient_permissions" => AuthError::InsufficientPermissions,
            "validation_error" => AuthError::Validation(message.to_string()),
            "storage_error" => AuthError::Storage(message.to_string()),
            _ => AuthError::Internal(message.to_string()),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::TokenMalformed
            | AuthError::TokenSignatureInvalid
            | AuthError::TokenIssuerMismatch
            | AuthError::TokenAudienceMismatch
            | AuthError::IdentityInvalid
            | AuthError::InvalidCredentials
            | AuthError::RefreshTokenNotFound => ErrorCategory::Format,
            AuthError::TokenExpired
            | AuthError::TokenNotYetValid
            | AuthError::RefreshTokenExpired => ErrorCategory::Temporal,
            AuthError::RefreshTokenReused => ErrorCategory::SecurityIncident,
            AuthError::ExternalProviderNotConfigured(_)
            | AuthError::ExternalTokenInvalid(_)
            | AuthError::ExternalProviderUnreachable(_) => ErrorCategory::ExternalProvider,
            AuthError::ExternalLoginNotFound
            | AuthError::LastLoginMethodCannotBeRemoved
            | AuthError::EmailAlreadyRegistered => ErrorCategory::AccountState,
            AuthError::InsufficientPermissions => ErrorCategory::Authorization,
            AuthError::Validation(_) => ErrorCategory::Request,
            AuthError::Storage(_) | AuthError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether a client holding this error must discard its session and sign in again.
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            AuthError::RefreshTokenReused
                | AuthError::RefreshTokenExpired
                | AuthError::RefreshTokenNotFound
                | AuthError::IdentityInvalid
        )
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::TokenMalformed
            | AuthError::TokenSignatureInvalid
            | AuthError::TokenExpired
            | AuthError::TokenIssuerMismatch
            | AuthError::TokenAudienceMismatch
            | AuthError::TokenNotYetValid
            | AuthError::IdentityInvalid
            | AuthError::InvalidCredentials
            | AuthError::RefreshTokenNotFound
            | AuthError::RefreshTokenReused
            | AuthError::RefreshTokenExpired
            | AuthError::ExternalTokenInvalid(_) => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
            AuthError::ExternalLoginNotFound => StatusCode::NOT_FOUND,
            AuthError::LastLoginMethodCannotBeRemoved | AuthError::EmailAlreadyRegistered => {
                StatusCode::CONFLICT
            }
            AuthError::ExternalProviderNotConfigured(_) | AuthError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            AuthError::ExternalProviderUnreachable(_) => StatusCode::BAD_GATEWAY,
            AuthError::Storage(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Storage(err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Server-side detail stays in the logs
        let error = match &self {
            AuthError::Storage(_) | AuthError::Internal(_) => {
                tracing::error!(error_code = self.error_code(), error = %self, "Request failed");
                "Internal server error".to_string()
            }
            AuthError::ExternalProviderUnreachable(_) => {
                tracing::warn!(error_code = self.error_code(), error = %self, "Request failed");
                "External provider is unreachable".to_string()
            }
            _ => self.to_string(),
        };
        let body = Json(AuthErrorBody {
            error,
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}
