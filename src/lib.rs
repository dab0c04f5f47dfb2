// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ReSys Identity - Token and Session Lifecycle Service
//!
//! Issues short-lived access tokens and long-lived refresh tokens, rotates
//! refresh tokens with reuse detection, links external identity-provider
//! logins to local accounts and caches per-user authorization claims.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Access tokens, sessions and password sign-in
//! - `authorization` - Roles, permissions and the claims cache
//! - `client` - Client-side single-flight token refresh
//! - `external` - External identity providers and account linking
//! - `storage` - Persistent stores (redb)
//! - `sweeper` - Background purge of expired refresh tokens

pub mod api;
pub mod auth;
pub mod authorization;
pub mod client;
pub mod config;
pub mod error;
pub mod external;
pub mod models;
pub mod state;
pub mod storage;
pub mod sweeper;
