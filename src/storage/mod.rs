// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Storage
//!
//! Persistent state of the identity service, kept in a single embedded redb
//! database (`$DATA_DIR/auth.redb`).
//!
//! ## Stores
//!
//! - [`IdentityStore`]: user accounts and external-login links
//! - [`RefreshTokenStore`]: hashed refresh tokens, rotation and revocation
//! - [`GrantStore`]: roles, permissions and policies
//!
//! All stores share one [`AuthDatabase`]. Multi-step updates run inside one
//! write transaction, which redb serializes.

pub mod database;
pub mod grants;
pub mod identities;
pub mod refresh_tokens;

pub use database::{AuthDatabase, StoreError, StoreResult};
pub use grants::{GrantStore, UserGrants, MANAGE_GRANTS_PERMISSION, MANAGE_ROLES_PERMISSION};
pub use identities::{
    normalize_email, ExternalIdentityLink, IdentityStore, LinkOutcome, NewUser, UserAccount,
    BOOTSTRAP_ADMIN_ROLE,
};
pub use refresh_tokens::{
    IssuedRefreshToken, RefreshTokenPolicy, RefreshTokenRecord, RefreshTokenStatus,
    RefreshTokenStore, RevocationReason, Rotation, TokenHasher,
};
