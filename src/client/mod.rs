// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Client SDK
//!
//! Helpers for applications that call this service.
//!
//! - [`RefreshCoordinator`]: single-flight refresh of expired access tokens,
//!   with replay of the requests that were waiting on it
//! - [`TokenRefresher`]: how a refresh or a logout reaches the server
//!   ([`HttpTokenRefresher`] over reqwest)
//! - [`Notifier`]: user-facing notices ([`TracingNotifier`] by default)

pub mod coordinator;
pub mod http;
pub mod notifier;

use async_trait::async_trait;

use crate::auth::AuthResult;

pub use coordinator::{RefreshCoordinator, RequestKind, DEFAULT_REFRESH_TIMEOUT};
pub use http::HttpTokenRefresher;
pub use notifier::{Notifier, TracingNotifier};

/// Tokens held by one client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Capability to exchange and revoke refresh tokens.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Rotate the refresh token and return the new pair.
    async fn refresh(&self, refresh_token: &str) -> AuthResult<ClientTokens>;

    /// Revoke the refresh token on the server.
    async fn logout(&self, refresh_token: &str) -> AuthResult<()>;
}
