// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Refresh-token persistence with rotation and reuse detection.
//!
//! ## Lifecycle
//!
//! `Active → Revoked` (explicit, terminal) or `Active → Expired` (time-based,
//! terminal). A revoked record never validates again.
//!
//! ## Storage
//!
//! Only a one-way hash of each token is stored. The plaintext leaves this
//! module exactly once, in the return value of [`RefreshTokenStore::issue`] or
//! [`RefreshTokenStore::validate_and_rotate`].
//!
//! Rotation runs in a single redb write transaction. redb serialises write
//! transactions, so the check "record is still active" and the update
//! "revoke it and insert its replacement" form one compare-and-set: of two
//! concurrent rotations of the same token exactly one succeeds and the other
//! observes a revoked record.

use std::sync::Arc;

use base64ct::Encoding;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use redb::{ReadableTable, Table, WriteTransaction};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::database::{
    compound_key, decode, encode, prefix_range, AuthDatabase, StoreError, StoreResult,
    REFRESH_TOKENS, REFRESH_TOKEN_HASHES, USERS, USER_REFRESH_TOKENS,
};
use super::identities::UserAccount;
use crate::auth::{AuthError, AuthResult};

/// Random bytes per refresh token (384 bits).
const TOKEN_BYTES: usize = 48;

type RecordTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type IndexTable<'txn> = Table<'txn, &'static str, &'static str>;

// =============================================================================
// Records
// =============================================================================

/// Why a record was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// Replaced by a newer token during refresh
    Rotated,
    /// Signed out of this session
    Logout,
    /// Signed out of every session
    LogoutAll,
    /// A revoked token was presented again
    ReuseDetected,
}

/// Lifecycle state of a record at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenStatus {
    Active,
    Revoked,
    Expired,
}

/// A persisted refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub user_id: String,
    /// Hex digest of the plaintext token
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_by_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_by_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_reason: Option<RevocationReason>,
}

impl RefreshTokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> RefreshTokenStatus {
        if self.is_revoked() {
            RefreshTokenStatus::Revoked
        } else if self.expires_at <= now {
            RefreshTokenStatus::Expired
        } else {
            RefreshTokenStatus::Active
        }
    }

    /// Mark the record revoked. Returns `false` if it already was.
    fn revoke(
        &mut self,
        now: DateTime<Utc>,
        ip: &str,
        reason: RevocationReason,
        replaced_by_id: Option<String>,
    ) -> bool {
        if self.is_revoked() {
            return false;
        }
        self.revoked_at = Some(now);
        self.revoked_by_ip = Some(ip.to_string());
        self.revoked_reason = Some(reason);
        self.replaced_by_id = replaced_by_id;
        true
    }
}

/// A freshly issued token. `plaintext` is never retrievable again.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub plaintext: String,
    pub record: RefreshTokenRecord,
}

/// Successful rotation: the replacement token plus the owning user.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub plaintext: String,
    pub record: RefreshTokenRecord,
    pub user: UserAccount,
}

// =============================================================================
// Token material
// =============================================================================

/// One-way hashing of refresh tokens.
///
/// With a pepper configured the hash is HMAC-SHA256, so a leaked database
/// alone cannot be used to confirm guessed tokens.
#[derive(Clone)]
pub enum TokenHasher {
    Sha256,
    Hmac(Vec<u8>),
}

impl TokenHasher {
    pub fn from_pepper(pepper: Option<&[u8]>) -> Self {
        match pepper {
            Some(key) if !key.is_empty() => TokenHasher::Hmac(key.to_vec()),
            _ => TokenHasher::Sha256,
        }
    }

    pub fn hash(&self, token: &str) -> String {
        match self {
            TokenHasher::Sha256 => format!("{:x}", Sha256::digest(token.as_bytes())),
            TokenHasher::Hmac(key) => {
                // HMAC accepts keys of any length
                let mut mac = match Hmac::<Sha256>::new_from_slice(key) {
                    Ok(mac) => mac,
                    Err(_) => return format!("{:x}", Sha256::digest(token.as_bytes())),
                };
                mac.update(token.as_bytes());
                format!("{:x}", mac.finalize().into_bytes())
            }
        }
    }
}

/// Lifetimes applied to new records.
#[derive(Debug, Clone, Copy)]
pub struct RefreshTokenPolicy {
    pub ttl: Duration,
    /// Used when the client asked to be remembered
    pub remember_me_ttl: Duration,
}

impl RefreshTokenPolicy {
    fn lifetime(&self, remember_me: bool) -> Duration {
        if remember_me {
            self.remember_me_ttl
        } else {
            self.ttl
        }
    }
}

impl Default for RefreshTokenPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::days(7),
            remember_me_ttl: Duration::days(30),
        }
    }
}

enum RotationOutcome {
    NotFound,
    Reused { user_id: String, revoked: usize },
    Expired { record_id: String },
    Rotated { record: RefreshTokenRecord, user: UserAccount },
}

// =============================================================================
// RefreshTokenStore
// =============================================================================

/// Durable store of refresh-token records.
#[derive(Clone)]
pub struct RefreshTokenStore {
    db: Arc<AuthDatabase>,
    hasher: TokenHasher,
    policy: RefreshTokenPolicy,
    rng: SystemRandom,
}

impl RefreshTokenStore {
    pub fn new(db: Arc<AuthDatabase>, hasher: TokenHasher, policy: RefreshTokenPolicy) -> Self {
        Self {
            db,
            hasher,
            policy,
            rng: SystemRandom::new(),
        }
    }

    fn generate_token(&self) -> AuthResult<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| AuthError::Internal("secure random generator failed".to_string()))?;
        Ok(base64ct::Base64UrlUnpadded::encode_string(&bytes))
    }

    fn new_record(
        &self,
        user_id: &str,
        token_hash: String,
        ip: &str,
        remember_me: bool,
    ) -> AuthResult<RefreshTokenRecord> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.policy.lifetime(remember_me))
            .ok_or_else(|| AuthError::Internal("refresh token lifetime out of range".to_string()))?;
        Ok(RefreshTokenRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token_hash,
            created_at: now,
            expires_at,
            created_by_ip: ip.to_string(),
            revoked_at: None,
            revoked_by_ip: None,
            replaced_by_id: None,
            revoked_reason: None,
        })
    }

    /// Issue a new refresh token for a user.
    pub fn issue(
        &self,
        user_id: &str,
        created_by_ip: &str,
        remember_me: bool,
    ) -> AuthResult<IssuedRefreshToken> {
        let plaintext = self.generate_token()?;
        let record = self.new_record(user_id, self.hasher.hash(&plaintext), created_by_ip, remember_me)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut records = write_txn.open_table(REFRESH_TOKENS).map_err(StoreError::from)?;
            let mut hashes = write_txn
                .open_table(REFRESH_TOKEN_HASHES)
                .map_err(StoreError::from)?;
            let mut by_user = write_txn
                .open_table(USER_REFRESH_TOKENS)
                .map_err(StoreError::from)?;
            insert_record(&mut records, &mut hashes, &mut by_user, &record)?;
        }
        write_txn.commit().map_err(StoreError::from)?;

        tracing::debug!(user_id = %user_id, record_id = %record.id, "Refresh token issued");
        Ok(IssuedRefreshToken { plaintext, record })
    }

    /// Validate a presented token and atomically replace it with a new one.
    ///
    /// - unknown token → [`AuthError::RefreshTokenNotFound`]
    /// - revoked token → every active token of the user is revoked in the same
    ///   transaction, then [`AuthError::RefreshTokenReused`]
    /// - expired token → [`AuthError::RefreshTokenExpired`]
    pub fn validate_and_rotate(
        &self,
        plaintext: &str,
        ip: &str,
        remember_me: bool,
    ) -> AuthResult<Rotation> {
        let token_hash = self.hasher.hash(plaintext);
        let new_plaintext = self.generate_token()?;
        let replacement = self.new_record("", self.hasher.hash(&new_plaintext), ip, remember_me)?;

        let write_txn = self.db.begin_write()?;
        let outcome = rotate_within(&write_txn, &token_hash, replacement, ip, Utc::now())?;
        write_txn.commit().map_err(StoreError::from)?;

        match outcome {
            RotationOutcome::NotFound => Err(AuthError::RefreshTokenNotFound),
            RotationOutcome::Reused { user_id, revoked } => {
                tracing::warn!(
                    user_id = %user_id,
                    revoked_sessions = revoked,
                    ip = %ip,
                    "Refresh token reuse detected; all sessions revoked"
                );
                Err(AuthError::RefreshTokenReused)
            }
            RotationOutcome::Expired { record_id } => {
                tracing::debug!(record_id = %record_id, "Expired refresh token presented");
                Err(AuthError::RefreshTokenExpired)
            }
            RotationOutcome::Rotated { record, user } => {
                tracing::debug!(user_id = %user.id, record_id = %record.id, "Refresh token rotated");
                Ok(Rotation {
                    plaintext: new_plaintext,
                    record,
                    user,
                })
            }
        }
    }

    /// Fetch a record by id.
    pub fn get(&self, record_id: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let read_txn = self.db.begin_read()?;
        let records = read_txn.open_table(REFRESH_TOKENS)?;
        match records.get(record_id)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Find the record of a plaintext token.
    pub fn find_by_token(&self, plaintext: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let token_hash = self.hasher.hash(plaintext);
        let read_txn = self.db.begin_read()?;
        let hashes = read_txn.open_table(REFRESH_TOKEN_HASHES)?;
        let records = read_txn.open_table(REFRESH_TOKENS)?;
        let Some(record_id) = hashes
            .get(token_hash.as_str())?
            .map(|v| v.value().to_string())
        else {
            return Ok(None);
        };
        match records.get(record_id.as_str())? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Active (not revoked, not expired) records of a user.
    pub fn list_active_for_user(&self, user_id: &str) -> StoreResult<Vec<RefreshTokenRecord>> {
        let now = Utc::now();
        let read_txn = self.db.begin_read()?;
        let by_user = read_txn.open_table(USER_REFRESH_TOKENS)?;
        let records = read_txn.open_table(REFRESH_TOKENS)?;

        let (start, end) = prefix_range(user_id);
        let mut active = Vec::new();
        for entry in by_user.range(start.as_str()..end.as_str())? {
            let (_, record_id) = entry?;
            if let Some(value) = records.get(record_id.value())? {
                let record: RefreshTokenRecord = decode(value.value())?;
                if record.status_at(now) == RefreshTokenStatus::Active {
                    active.push(record);
                }
            }
        }
        Ok(active)
    }

    /// Revoke one record. Revoking an already-revoked record is a no-op.
    ///
    /// Returns whether the record changed.
    pub fn revoke(&self, record_id: &str, ip: &str) -> AuthResult<bool> {
        self.revoke_with_reason(record_id, ip, RevocationReason::Logout)
    }

    fn revoke_with_reason(
        &self,
        record_id: &str,
        ip: &str,
        reason: RevocationReason,
    ) -> AuthResult<bool> {
        let write_txn = self.db.begin_write()?;
        let changed = {
            let mut records = write_txn.open_table(REFRESH_TOKENS).map_err(StoreError::from)?;
            revoke_one(&mut records, record_id, ip, reason, Utc::now())?
        };
        write_txn.commit().map_err(StoreError::from)?;
        Ok(changed)
    }

    /// Revoke the record of a plaintext token, if it belongs to `user_id`.
    ///
    /// Unknown tokens and tokens of other users are ignored.
    pub fn revoke_token_for_user(&self, plaintext: &str, user_id: &str, ip: &str) -> AuthResult<bool> {
        match self.find_by_token(plaintext)? {
            Some(record) if record.user_id == user_id => {
                self.revoke_with_reason(&record.id, ip, RevocationReason::Logout)
            }
            _ => Ok(false),
        }
    }

    /// Revoke every active record of a user. Idempotent.
    ///
    /// Returns the number of records that changed.
    pub fn revoke_all_for_user(&self, user_id: &str, ip: &str) -> AuthResult<usize> {
        let write_txn = self.db.begin_write()?;
        let revoked = {
            let mut records = write_txn.open_table(REFRESH_TOKENS).map_err(StoreError::from)?;
            let by_user = write_txn
                .open_table(USER_REFRESH_TOKENS)
                .map_err(StoreError::from)?;
            revoke_all_within(
                &mut records,
                &by_user,
                user_id,
                ip,
                RevocationReason::LogoutAll,
                Utc::now(),
            )?
        };
        write_txn.commit().map_err(StoreError::from)?;
        tracing::info!(user_id = %user_id, revoked_sessions = revoked, "All sessions revoked");
        Ok(revoked)
    }

    /// Delete records whose expiry lies more than `grace` in the past.
    ///
    /// Revoked records are kept for the same window so reuse of a recently
    /// rotated token is still detected.
    pub fn purge_expired(&self, grace: Duration, now: DateTime<Utc>) -> StoreResult<usize> {
        let cutoff = now - grace;
        let write_txn = self.db.begin_write()?;
        let purged = {
            let mut records = write_txn.open_table(REFRESH_TOKENS)?;
            let mut hashes = write_txn.open_table(REFRESH_TOKEN_HASHES)?;
            let mut by_user = write_txn.open_table(USER_REFRESH_TOKENS)?;

            let mut stale = Vec::new();
            for entry in records.iter()? {
                let (_, value) = entry?;
                let record: RefreshTokenRecord = decode(value.value())?;
                if record.expires_at < cutoff {
                    stale.push(record);
                }
            }

            for record in &stale {
                records.remove(record.id.as_str())?;
                hashes.remove(record.token_hash.as_str())?;
                let index_key = compound_key(&[&record.user_id, &record.id]);
                by_user.remove(index_key.as_str())?;
            }
            stale.len()
        };
        write_txn.commit()?;
        Ok(purged)
    }
}

// =============================================================================
// Transaction helpers
// =============================================================================

fn rotate_within(
    txn: &WriteTransaction,
    token_hash: &str,
    mut replacement: RefreshTokenRecord,
    ip: &str,
    now: DateTime<Utc>,
) -> StoreResult<RotationOutcome> {
    let mut records = txn.open_table(REFRESH_TOKENS)?;
    let mut hashes = txn.open_table(REFRESH_TOKEN_HASHES)?;
    let mut by_user = txn.open_table(USER_REFRESH_TOKENS)?;
    let users = txn.open_table(USERS)?;

    let Some(record_id) = hashes.get(token_hash)?.map(|v| v.value().to_string()) else {
        return Ok(RotationOutcome::NotFound);
    };
    let Some(mut current) = load_record(&records, &record_id)? else {
        return Ok(RotationOutcome::NotFound);
    };

    match current.status_at(now) {
        RefreshTokenStatus::Revoked => {
            let revoked = revoke_all_within(
                &mut records,
                &by_user,
                &current.user_id,
                ip,
                RevocationReason::ReuseDetected,
                now,
            )?;
            return Ok(RotationOutcome::Reused {
                user_id: current.user_id,
                revoked,
            });
        }
        RefreshTokenStatus::Expired => {
            return Ok(RotationOutcome::Expired {
                record_id: current.id,
            });
        }
        RefreshTokenStatus::Active => {}
    }

    let user_bytes = users
        .get(current.user_id.as_str())?
        .map(|v| v.value().to_vec());
    let Some(user_bytes) = user_bytes else {
        // Account no longer exists; the token is useless from now on
        current.revoke(now, ip, RevocationReason::LogoutAll, None);
        records.insert(current.id.as_str(), encode(&current)?.as_slice())?;
        return Ok(RotationOutcome::NotFound);
    };
    let user: UserAccount = decode(&user_bytes)?;

    replacement.user_id = current.user_id.clone();
    current.revoke(now, ip, RevocationReason::Rotated, Some(replacement.id.clone()));
    records.insert(current.id.as_str(), encode(&current)?.as_slice())?;
    insert_record(&mut records, &mut hashes, &mut by_user, &replacement)?;

    Ok(RotationOutcome::Rotated {
        record: replacement,
        user,
    })
}

fn load_record(
    records: &RecordTable<'_>,
    record_id: &str,
) -> StoreResult<Option<RefreshTokenRecord>> {
    let bytes = records.get(record_id)?.map(|v| v.value().to_vec());
    match bytes {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

fn insert_record(
    records: &mut RecordTable<'_>,
    hashes: &mut IndexTable<'_>,
    by_user: &mut IndexTable<'_>,
    record: &RefreshTokenRecord,
) -> StoreResult<()> {
    let index_key = compound_key(&[&record.user_id, &record.id]);
    records.insert(record.id.as_str(), encode(record)?.as_slice())?;
    hashes.insert(record.token_hash.as_str(), record.id.as_str())?;
    by_user.insert(index_key.as_str(), record.id.as_str())?;
    Ok(())
}

fn revoke_one(
    records: &mut RecordTable<'_>,
    record_id: &str,
    ip: &str,
    reason: RevocationReason,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let Some(mut record) = load_record(records, record_id)? else {
        return Ok(false);
    };
    if !record.revoke(now, ip, reason, None) {
        return Ok(false);
    }
    records.insert(record.id.as_str(), encode(&record)?.as_slice())?;
    Ok(true)
}

fn revoke_all_within(
    records: &mut RecordTable<'_>,
    by_user: &IndexTable<'_>,
    user_id: &str,
    ip: &str,
    reason: RevocationReason,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let (start, end) = prefix_range(user_id);
    let mut record_ids = Vec::new();
    for entry in by_user.range(start.as_str()..end.as_str())? {
        let (_, record_id) = entry?;
        record_ids.push(record_id.value().to_string());
    }

    let mut revoked = 0;
    for record_id in record_ids {
        if revoke_one(records, &record_id, ip, reason, now)? {
            revoked += 1;
        }
    }
    Ok(revoked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::test_support::temp_db;
    use crate::storage::{IdentityStore, NewUser};

    const IP: &str = "203.0.113.7";

    fn setup() -> (RefreshTokenStore, UserAccount, tempfile::TempDir) {
        let (db, dir) = temp_db();
        let identities = IdentityStore::new(db.clone(), "customer");
        let user = identities
            .create_user(NewUser {
                email: "ada@example.com".into(),
                email_verified: true,
                password_hash: Some("$2b$04$hash".into()),
                ..NewUser::default()
            })
            .unwrap();
        let store = RefreshTokenStore::new(db, TokenHasher::Sha256, RefreshTokenPolicy::default());
        (store, user, dir)
    }

    #[test]
    fn plaintext_is_never_stored() {
        let (store, user, _dir) = setup();
        let issued = store.issue(&user.id, IP, false).unwrap();

        assert_ne!(issued.record.token_hash, issued.plaintext);
        assert_eq!(issued.record.token_hash.len(), 64);
        let stored = store.get(&issued.record.id).unwrap().unwrap();
        assert_eq!(stored, issued.record);
        assert!(!serde_json::to_string(&stored).unwrap().contains(&issued.plaintext));
    }

    #[test]
    fn hmac_hasher_differs_from_plain_sha256() {
        let plain = TokenHasher::Sha256.hash("token");
        let peppered = TokenHasher::from_pepper(Some(b"pepper")).hash("token");
        assert_ne!(plain, peppered);
        assert_eq!(peppered.len(), 64);
        assert_eq!(peppered, TokenHasher::from_pepper(Some(b"pepper")).hash("token"));
    }

    #[test]
    fn remember_me_extends_lifetime() {
        let (store, user, _dir) = setup();
        let short = store.issue(&user.id, IP, false).unwrap().record;
        let long = store.issue(&user.id, IP, true).unwrap().record;
        assert!(long.expires_at - long.created_at > short.expires_at - short.created_at);
    }

    #[test]
    fn unknown_token_is_not_found() {
        let (store, _user, _dir) = setup();
        let err = store.validate_and_rotate("nope", IP, false).unwrap_err();
        assert_eq!(err, AuthError::RefreshTokenNotFound);
    }

    #[test]
    fn rotation_links_old_record_to_replacement() {
        let (store, user, _dir) = setup();
        let r1 = store.issue(&user.id, IP, false).unwrap();

        let rotation = store.validate_and_rotate(&r1.plaintext, IP, false).unwrap();
        assert_eq!(rotation.user.id, user.id);
        assert_eq!(rotation.record.user_id, user.id);
        assert_ne!(rotation.plaintext, r1.plaintext);

        let old = store.get(&r1.record.id).unwrap().unwrap();
        assert!(old.is_revoked());
        assert_eq!(old.replaced_by_id.as_deref(), Some(rotation.record.id.as_str()));
        assert_eq!(old.revoked_reason, Some(RevocationReason::Rotated));
        assert_eq!(old.revoked_by_ip.as_deref(), Some(IP));
    }

    #[test]
    fn reuse_revokes_every_session() {
        let (store, user, _dir) = setup();
        let r1 = store.issue(&user.id, IP, false).unwrap();
        let other_device = store.issue(&user.id, "198.51.100.1", false).unwrap();
        let r2 = store.validate_and_rotate(&r1.plaintext, IP, false).unwrap();

        let err = store.validate_and_rotate(&r1.plaintext, IP, false).unwrap_err();
        assert_eq!(err, AuthError::RefreshTokenReused);

        let r2_record = store.get(&r2.record.id).unwrap().unwrap();
        assert_eq!(r2_record.revoked_reason, Some(RevocationReason::ReuseDetected));
        assert!(store.list_active_for_user(&user.id).unwrap().is_empty());

        // The other device's token is revoked too and now counts as reuse
        let err = store
            .validate_and_rotate(&other_device.plaintext, IP, false)
            .unwrap_err();
        assert_eq!(err, AuthError::RefreshTokenReused);
    }

    #[test]
    fn concurrent_rotation_has_exactly_one_winner() {
        let (store, user, _dir) = setup();
        let issued = store.issue(&user.id, IP, false).unwrap();
        let store = Arc::new(store);
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                let token = issued.plaintext.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.validate_and_rotate(&token, IP, false)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for result in results.iter().filter(|r| r.is_err()) {
            assert_eq!(result.as_ref().unwrap_err(), &AuthError::RefreshTokenReused);
        }
        // The losers' reuse detection also revoked the winner's replacement
        assert!(store.list_active_for_user(&user.id).unwrap().is_empty());
    }

    #[test]
    fn expired_token_is_rejected_without_mutation() {
        let (db, _dir) = temp_db();
        let identities = IdentityStore::new(db.clone(), "customer");
        let user = identities
            .create_user(NewUser {
                email: "ada@example.com".into(),
                ..NewUser::default()
            })
            .unwrap();
        let policy = RefreshTokenPolicy {
            ttl: Duration::seconds(-1),
            remember_me_ttl: Duration::seconds(-1),
        };
        let store = RefreshTokenStore::new(db, TokenHasher::Sha256, policy);
        let issued = store.issue(&user.id, IP, false).unwrap();

        let err = store.validate_and_rotate(&issued.plaintext, IP, false).unwrap_err();
        assert_eq!(err, AuthError::RefreshTokenExpired);
        assert!(!store.get(&issued.record.id).unwrap().unwrap().is_revoked());
    }

    #[test]
    fn revoke_is_idempotent() {
        let (store, user, _dir) = setup();
        let issued = store.issue(&user.id, IP, false).unwrap();

        assert!(store.revoke(&issued.record.id, IP).unwrap());
        assert!(!store.revoke(&issued.record.id, IP).unwrap());
        assert!(!store.revoke("missing", IP).unwrap());

        assert_eq!(store.revoke_all_for_user(&user.id, IP).unwrap(), 0);
    }

    #[test]
    fn revoke_token_for_user_checks_ownership() {
        let (store, user, _dir) = setup();
        let issued = store.issue(&user.id, IP, false).unwrap();

        assert!(!store
            .revoke_token_for_user(&issued.plaintext, "someone-else", IP)
            .unwrap());
        assert!(store
            .revoke_token_for_user(&issued.plaintext, &user.id, IP)
            .unwrap());
    }

    #[test]
    fn purge_removes_only_records_past_grace() {
        let (store, user, _dir) = setup();
        let fresh = store.issue(&user.id, IP, false).unwrap();

        let now = Utc::now();
        assert_eq!(store.purge_expired(Duration::days(1), now).unwrap(), 0);

        let far_future = now + Duration::days(30);
        assert_eq!(store.purge_expired(Duration::days(1), far_future).unwrap(), 1);
        assert!(store.get(&fresh.record.id).unwrap().is_none());
        assert!(store.find_by_token(&fresh.plaintext).unwrap().is_none());
    }
}
