// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! [`TokenRefresher`] that talks to this service's REST API.

use async_trait::async_trait;
use url::Url;

use super::{ClientTokens, TokenRefresher};
use crate::auth::{AuthError, AuthErrorBody, AuthResult};
use crate::models::{LogoutRequest, RefreshRequest, TokenPairResponse};

const REFRESH_PATH: &str = "v1/auth/refresh";
const LOGOUT_PATH: &str = "v1/auth/logout";

/// Calls `POST /v1/auth/refresh` and `POST /v1/auth/logout`.
#[derive(Clone)]
pub struct HttpTokenRefresher {
    base_url: Url,
    client: reqwest::Client,
    remember_me: bool,
}

impl HttpTokenRefresher {
    /// `base_url` is the service root, e.g. `https://id.example.com/`.
    pub fn new(base_url: Url, client: reqwest::Client) -> Self {
        Self {
            base_url,
            client,
            remember_me: false,
        }
    }

    /// Ask for the long refresh-token lifetime on every rotation.
    pub fn remember_me(mut self, remember_me: bool) -> Self {
        self.remember_me = remember_me;
        self
    }

    fn endpoint(&self, path: &str) -> AuthResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| AuthError::Internal(format!("invalid service URL: {e}")))
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> AuthResult<ClientTokens> {
        let response = self
            .client
            .post(self.endpoint(REFRESH_PATH)?)
            .json(&RefreshRequest {
                refresh_token: refresh_token.to_string(),
                remember_me: self.remember_me,
            })
            .send()
            .await
            .map_err(|e| AuthError::Internal(format!("token refresh request failed: {e}")))?;

        let pair: TokenPairResponse = read_json(response).await?;
        Ok(ClientTokens {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }

    async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        let response = self
            .client
            .post(self.endpoint(LOGOUT_PATH)?)
            .json(&LogoutRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await
            .map_err(|e| AuthError::Internal(format!("logout request failed: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> AuthResult<T> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| AuthError::Internal(format!("invalid response body: {e}")))
}

/// Turn a `{ error, error_code }` body back into a typed error.
async fn error_from_response(response: reqwest::Response) -> AuthError {
    let status = response.status();
    match response.json::<AuthErrorBody>().await {
        Ok(body) => AuthError::from_code(&body.error_code, &body.error),
        Err(_) => AuthError::Internal(format!("service returned HTTP {status}")),
    }
}
