// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cache-aside LRU of per-user authorization claims.
//!
//! Entries expire on a sliding window and on an absolute ceiling, whichever
//! comes first. Invalidation is explicit and always wins over a concurrent
//! population: every invalidation bumps a generation counter, and a
//! recompute that started before the latest invalidation affecting its user
//! returns its result to the caller but never stores it.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;

use super::{AuthorizationSource, AuthorizeClaimData};
use crate::auth::{AuthError, AuthResult};

/// Invalidation epochs are tracked for more users than there are entries so
/// that an epoch outlives the entry it invalidated.
const EPOCH_CAPACITY_FACTOR: usize = 4;

/// Expiry and sizing of the claims cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub capacity: usize,
    /// Entry expires when not read for this long
    pub sliding: Duration,
    /// Entry expires this long after population regardless of reads
    pub absolute: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            sliding: Duration::from_secs(300),
            absolute: Duration::from_secs(1800),
        }
    }
}

struct CacheEntry {
    data: AuthorizeClaimData,
    cached_at: Instant,
    last_access: Instant,
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    /// Generation of the latest invalidation per user
    user_epochs: LruCache<String, u64>,
    /// Incremented by every invalidation
    generation: u64,
    /// Populations started before this generation are discarded for every user
    floor: u64,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn invalidation_epoch(&self, user_id: &str) -> u64 {
        let user_epoch = self.user_epochs.peek(user_id).copied().unwrap_or(0);
        user_epoch.max(self.floor)
    }
}

/// In-process claims cache in front of an [`AuthorizationSource`].
pub struct AuthorizationClaimsCache {
    source: Arc<dyn AuthorizationSource>,
    state: Mutex<CacheState>,
    settings: CacheSettings,
}

impl AuthorizationClaimsCache {
    pub fn new(source: Arc<dyn AuthorizationSource>, settings: CacheSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.capacity).unwrap_or(NonZeroUsize::MIN);
        let epoch_capacity = capacity.saturating_mul(
            NonZeroUsize::new(EPOCH_CAPACITY_FACTOR).unwrap_or(NonZeroUsize::MIN),
        );
        Self {
            source,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                user_epochs: LruCache::new(epoch_capacity),
                generation: 0,
                floor: 0,
            }),
            settings,
        }
    }

    // The lock only guards in-memory bookkeeping; a poisoned state is still consistent.
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Roles, permissions and policies of a user.
    pub fn get_user_authorization(&self, user_id: &str) -> AuthResult<AuthorizeClaimData> {
        let started_at = {
            let mut state = self.state();
            let now = Instant::now();
            let mut expired = false;
            if let Some(entry) = state.entries.get_mut(user_id) {
                if now.duration_since(entry.last_access) < self.settings.sliding
                    && now.duration_since(entry.cached_at) < self.settings.absolute
                {
                    entry.last_access = now;
                    return Ok(entry.data.clone());
                }
                expired = true;
            }
            if expired {
                state.entries.pop(user_id);
            }
            state.generation
        };

        // Recompute without holding the lock
        let data = self.source.load(user_id).map_err(AuthError::from)?;

        let mut state = self.state();
        if started_at >= state.invalidation_epoch(user_id) {
            let now = Instant::now();
            state.entries.put(
                user_id.to_string(),
                CacheEntry {
                    data: data.clone(),
                    cached_at: now,
                    last_access: now,
                },
            );
        } else {
            tracing::debug!(user_id = %user_id, "Discarded claims recomputed across an invalidation");
        }
        Ok(data)
    }

    /// Drop a user's cached claims and any population of them already in flight.
    pub fn invalidate_user_authorization(&self, user_id: &str) {
        let mut state = self.state();
        let generation = state.bump();
        if let Some((evicted_user, evicted_epoch)) =
            state.user_epochs.push(user_id.to_string(), generation)
        {
            // Forgetting another user's epoch must not let their stale population in
            if evicted_user != user_id {
                state.floor = state.floor.max(evicted_epoch);
            }
        }
        state.entries.pop(user_id);
        tracing::debug!(user_id = %user_id, "Authorization claims invalidated");
    }

    /// Drop every cached entry that holds `role`.
    ///
    /// In-flight populations cannot be attributed to a role before they
    /// finish, so all of them are discarded.
    pub fn invalidate_role(&self, role: &str) {
        let mut state = self.state();
        let generation = state.bump();
        state.floor = generation;
        let stale: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.data.has_role(role))
            .map(|(user_id, _)| user_id.clone())
            .collect();
        for user_id in &stale {
            state.entries.pop(user_id);
        }
        tracing::debug!(role = %role, dropped = stale.len(), "Authorization claims invalidated for role");
    }

    /// Drop everything.
    pub fn invalidate_all(&self) {
        let mut state = self.state();
        let generation = state.bump();
        state.floor = generation;
        state.entries.clear();
    }

    /// Fail with [`AuthError::InsufficientPermissions`] unless the user holds `permission`.
    pub fn require_permission(&self, user_id: &str, permission: &str) -> AuthResult<AuthorizeClaimData> {
        let data = self.get_user_authorization(user_id)?;
        if data.has_permission(permission) {
            Ok(data)
        } else {
            tracing::debug!(user_id = %user_id, permission = %permission, "Permission denied");
            Err(AuthError::InsufficientPermissions)
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
