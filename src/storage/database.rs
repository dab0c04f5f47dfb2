// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded identity database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `refresh_tokens`: record id → serialized RefreshTokenRecord
//! - `refresh_token_hashes`: token hash → record id
//! - `user_refresh_tokens`: `user_id|record_id` → record id
//! - `users`: user id → serialized UserAccount
//! - `user_emails`: normalized email → user id
//! - `external_logins`: `provider|provider_user_id` → serialized ExternalIdentityLink
//! - `user_external_logins`: `user_id|provider|provider_user_id` → link key
//! - `user_grants`: user id → serialized UserGrants
//! - `role_permissions`: role → serialized permission list
//!
//! redb allows a single write transaction at a time. Every read-check-write
//! sequence that must be atomic runs inside one write transaction.

use std::path::Path;

use redb::{Database, ReadTransaction, TableDefinition, WriteTransaction};
use serde::{de::DeserializeOwned, Serialize};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: record id → serialized RefreshTokenRecord (JSON bytes).
pub(crate) const REFRESH_TOKENS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("refresh_tokens");

/// Index: one-way token hash → record id.
pub(crate) const REFRESH_TOKEN_HASHES: TableDefinition<&str, &str> =
    TableDefinition::new("refresh_token_hashes");

/// Index: `user_id|record_id` → record id, for per-user range scans.
pub(crate) const USER_REFRESH_TOKENS: TableDefinition<&str, &str> =
    TableDefinition::new("user_refresh_tokens");

/// Primary table: user id → serialized UserAccount.
pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Unique index: normalized email → user id.
pub(crate) const USER_EMAILS: TableDefinition<&str, &str> = TableDefinition::new("user_emails");

/// Unique on `(provider, provider_user_id)`.
pub(crate) const EXTERNAL_LOGINS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("external_logins");

/// Index: `user_id|provider|provider_user_id` → `provider|provider_user_id`.
pub(crate) const USER_EXTERNAL_LOGINS: TableDefinition<&str, &str> =
    TableDefinition::new("user_external_logins");

/// Source of truth for per-user roles, direct permissions and policies.
pub(crate) const USER_GRANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("user_grants");

/// Role → permission list.
pub(crate) const ROLE_PERMISSIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("role_permissions");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Key Helpers
// =============================================================================

/// Join key segments with `|`.
pub(crate) fn compound_key(parts: &[&str]) -> String {
    parts.join("|")
}

/// Half-open range covering every compound key that starts with `prefix|`.
///
/// `}` is the byte right after `|`, so `prefix}` is the first key past the prefix.
pub(crate) fn prefix_range(prefix: &str) -> (String, String) {
    (format!("{prefix}|"), format!("{prefix}}}"))
}

pub(crate) fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

// =============================================================================
// AuthDatabase
// =============================================================================

/// Embedded ACID identity database shared by every store.
pub struct AuthDatabase {
    db: Database,
}

impl AuthDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(REFRESH_TOKENS)?;
            let _ = write_txn.open_table(REFRESH_TOKEN_HASHES)?;
            let _ = write_txn.open_table(USER_REFRESH_TOKENS)?;
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USER_EMAILS)?;
            let _ = write_txn.open_table(EXTERNAL_LOGINS)?;
            let _ = write_txn.open_table(USER_EXTERNAL_LOGINS)?;
            let _ = write_txn.open_table(USER_GRANTS)?;
            let _ = write_txn.open_table(ROLE_PERMISSIONS)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "Identity database opened");
        Ok(Self { db })
    }

    pub(crate) fn begin_write(&self) -> StoreResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    pub(crate) fn begin_read(&self) -> StoreResult<ReadTransaction> {
        use redb::ReadableDatabase;
        Ok(self.db.begin_read()?)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::AuthDatabase;

    /// Open a database in a fresh temporary directory.
    pub(crate) fn temp_db() -> (Arc<AuthDatabase>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = AuthDatabase::open(&dir.path().join("auth.redb")).unwrap();
        (Arc::new(db), dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_range_covers_compound_keys() {
        let (start, end) = prefix_range("user-1");
        let key = compound_key(&["user-1", "record-9"]);
        assert!(start.as_str() <= key.as_str());
        assert!(key.as_str() < end.as_str());

        let other = compound_key(&["user-10", "record-1"]);
        assert!(!(start.as_str() <= other.as_str() && other.as_str() < end.as_str()));
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("auth.redb");
        let db = AuthDatabase::open(&path).unwrap();
        assert!(path.exists());
        drop(db);

        // Re-opening an existing file keeps working
        AuthDatabase::open(&path).unwrap();
    }
}
