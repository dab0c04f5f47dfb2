// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Access tokens, refresh-token sessions and password sign-in.
//!
//! ## Token Flow
//!
//! 1. A caller signs in (password or external provider)
//! 2. [`SessionService`] issues an access token (minutes) and a refresh
//!    token (days)
//! 3. Requests carry `Authorization: Bearer <access token>`; the [`Auth`]
//!    extractor validates signature, issuer, audience and lifetime
//! 4. On `token_expired` the client exchanges its refresh token; the old
//!    refresh token is revoked in the same transaction that creates the new one
//!
//! ## Security
//!
//! - Refresh tokens are stored hashed, never in plaintext
//! - A revoked refresh token presented again revokes every session of the user
//! - Tokens are never logged

pub mod access_token;
pub mod claims;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod password;
pub mod session;

pub use access_token::{AccessTokenService, IssuedAccessToken, SigningKeys, ValidationResult};
pub use claims::{AccessTokenClaims, ClaimsCodec};
pub use error::{AuthError, AuthErrorBody, AuthResult, ErrorCategory};
pub use extractor::{bearer_token, Auth, AuthenticatedUser, ClientIp};
pub use jwks::JwksManager;
pub use session::{Registration, SessionService, TokenPair};
