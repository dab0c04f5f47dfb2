// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Refresh Token Retention Sweeper
//!
//! Background task that deletes refresh-token records once their expiry plus
//! the retention grace period has passed. Revoked records stay until then so
//! that a replayed token is still recognised as reuse rather than as unknown.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::storage::RefreshTokenStore;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Periodically purges refresh tokens past their retention window.
pub struct RetentionSweeper {
    refresh_tokens: RefreshTokenStore,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(refresh_tokens: RefreshTokenStore, retention: Duration) -> Self {
        Self {
            refresh_tokens,
            retention,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_secs = self.retention.as_secs(),
            "Refresh token sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Refresh token sweeper shutting down");
                return;
            }

            self.sweep_once();

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Refresh token sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// One sweep. Returns the number of deleted records.
    pub fn sweep_once(&self) -> usize {
        let grace = match chrono::Duration::from_std(self.retention) {
            Ok(grace) => grace,
            Err(e) => {
                warn!(error = %e, "Retention period out of range, skipping sweep");
                return 0;
            }
        };
        match self.refresh_tokens.purge_expired(grace, Utc::now()) {
            Ok(0) => 0,
            Ok(purged) => {
                info!(purged, "Purged expired refresh tokens");
                purged
            }
            Err(e) => {
                warn!(error = %e, "Refresh token sweep failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::test_support::temp_db;
    use crate::storage::{RefreshTokenPolicy, TokenHasher};

    fn store(ttl: chrono::Duration) -> (RefreshTokenStore, tempfile::TempDir) {
        let (db, dir) = temp_db();
        let policy = RefreshTokenPolicy {
            ttl,
            remember_me_ttl: ttl,
        };
        (RefreshTokenStore::new(db, TokenHasher::Sha256, policy), dir)
    }

    #[test]
    fn sweep_keeps_records_inside_retention() {
        let (store, _dir) = store(chrono::Duration::seconds(-10));
        let issued = store.issue("user-1", "127.0.0.1", false).unwrap();

        let keep = RetentionSweeper::new(store.clone(), Duration::from_secs(3600));
        assert_eq!(keep.sweep_once(), 0);
        assert!(store.get(&issued.record.id).unwrap().is_some());

        let purge = RetentionSweeper::new(store.clone(), Duration::ZERO);
        assert_eq!(purge.sweep_once(), 1);
        assert!(store.get(&issued.record.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (store, _dir) = store(chrono::Duration::days(1));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            RetentionSweeper::new(store, Duration::ZERO)
                .with_interval(Duration::from_secs(3600))
                .run(shutdown.clone()),
        );
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
