// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Errors that stop the service from starting.
//!
//! Request-time failures are [`crate::auth::AuthError`]; this type only
//! covers wiring the service together and binding the listener.

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Store(#[from] StoreError),

    #[error("initialization error: {0}")]
    Auth(#[from] AuthError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
