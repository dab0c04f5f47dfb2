// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-flight access-token refresh.
//!
//! When several requests learn at once that the access token expired, only
//! the first one starts a refresh. Every caller, the first included, waits on
//! a queue that the refresh drains in order once it has fully completed.
//! Each request is replayed at most once with the new token.
//!
//! The refresh itself runs on its own task, so dropping a waiting request
//! only removes that waiter; the refresh and the other waiters carry on.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use super::{ClientTokens, Notifier, TokenRefresher};
use crate::auth::{AuthError, AuthResult};

/// Upper bound for one refresh round-trip.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// What a request is, as far as refresh handling goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Regular authenticated call; refreshed and replayed on token expiry.
    Resource,
    /// Login, registration or refresh call; never retried.
    Auth,
}

type Waiter = oneshot::Sender<AuthResult<String>>;

#[derive(Default)]
struct CoordinatorState {
    tokens: Option<ClientTokens>,
    refreshing: bool,
    waiters: VecDeque<Waiter>,
}

struct Inner {
    refresher: Arc<dyn TokenRefresher>,
    notifier: Arc<dyn Notifier>,
    refresh_timeout: Duration,
    state: Mutex<CoordinatorState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-client refresh coordinator. Clones share the same session.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        notifier: Arc<dyn Notifier>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                refresher,
                notifier,
                refresh_timeout,
                state: Mutex::new(CoordinatorState::default()),
            }),
        }
    }

    /// Install the tokens of a freshly signed-in session.
    pub fn set_tokens(&self, tokens: ClientTokens) {
        self.inner.state().tokens = Some(tokens);
    }

    pub fn tokens(&self) -> Option<ClientTokens> {
        self.inner.state().tokens.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state().tokens.as_ref().map(|t| t.access_token.clone())
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state().refreshing
    }

    /// Forget the session and revoke its refresh token on the server.
    pub async fn logout(&self) -> AuthResult<()> {
        let tokens = self.inner.state().tokens.take();
        if let Some(tokens) = tokens {
            self.inner.refresher.logout(&tokens.refresh_token).await?;
            self.inner.notifier.info("You have been signed out.");
        }
        Ok(())
    }

    /// Run an authenticated call, refreshing and replaying it once if the
    /// server reports an expired access token.
    ///
    /// `call` receives the access token to send, if any.
    pub async fn execute<T, F, Fut>(&self, kind: RequestKind, mut call: F) -> AuthResult<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        let sent = self.access_token();
        match call(sent.clone()).await {
            Err(AuthError::TokenExpired) if kind == RequestKind::Resource => {}
            other => return other,
        }

        tracing::debug!("Access token expired, waiting for a fresh one");
        let fresh = self.fresh_access_token(sent.as_deref()).await?;
        call(Some(fresh)).await
    }

    /// Current access token if it differs from `stale`, otherwise the token
    /// produced by the (possibly already running) refresh.
    async fn fresh_access_token(&self, stale: Option<&str>) -> AuthResult<String> {
        let receiver = {
            let mut state = self.inner.state();
            if !state.refreshing {
                let Some(tokens) = state.tokens.clone() else {
                    return Err(AuthError::RefreshTokenNotFound);
                };
                if stale != Some(tokens.access_token.as_str()) {
                    // Someone else already refreshed
                    return Ok(tokens.access_token);
                }
                state.refreshing = true;
                tokio::spawn(run_refresh(self.inner.clone(), tokens.refresh_token));
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            receiver
        };

        receiver
            .await
            .unwrap_or_else(|_| Err(AuthError::Internal("token refresh was abandoned".to_string())))
    }
}

async fn run_refresh(inner: Arc<Inner>, refresh_token: String) {
    let outcome = match tokio::time::timeout(inner.refresh_timeout, inner.refresher.refresh(&refresh_token)).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::Internal(format!(
            "token refresh timed out after {}ms",
            inner.refresh_timeout.as_millis()
        ))),
    };

    let (waiters, result) = {
        let mut state = inner.state();
        let result = match outcome {
            Ok(tokens) => {
                let access_token = tokens.access_token.clone();
                state.tokens = Some(tokens);
                Ok(access_token)
            }
            Err(err) => {
                state.tokens = None;
                Err(err)
            }
        };
        state.refreshing = false;
        (std::mem::take(&mut state.waiters), result)
    };

    tracing::debug!(waiters = waiters.len(), success = result.is_ok(), "Token refresh finished");
    for waiter in waiters {
        // A closed channel means that caller went away
        let _ = waiter.send(result.clone());
    }

    if let Err(err) = result {
        tracing::warn!(error_code = err.error_code(), "Token refresh failed, signing out");
        match tokio::time::timeout(inner.refresh_timeout, inner.refresher.logout(&refresh_token)).await {
            Ok(Ok(())) => {}
            Ok(Err(logout_err)) => {
                tracing::debug!(error_code = logout_err.error_code(), "Server-side logout failed")
            }
            Err(_) => tracing::debug!("Server-side logout timed out"),
        }
        inner.notifier.error(sign_out_notice(&err));
    }
}

fn sign_out_notice(err: &AuthError) -> &'static str {
    match err {
        AuthError::RefreshTokenReused => {
            "For your security all sessions were signed out. Please sign in again."
        }
        err if err.requires_sign_in() => "Your session has expired. Please sign in again.",
        _ => "Your session could not be renewed. Please sign in again.",
    }
}
