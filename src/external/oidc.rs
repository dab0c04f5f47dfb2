// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OpenID Connect providers.
//!
//! Accepts, in order of preference:
//! - an id token, verified against the provider's JWKS (signature, issuer,
//!   audience, lifetime)
//! - an authorization code, exchanged at the token endpoint; the redirect
//!   URI must be on the provider's allow-list
//! - an opaque access token, introspected at the userinfo endpoint

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    normalize_claims, read_provider_json, transport_error, ExternalUserTransfer, IdentityProvider,
    ProviderCredentials,
};
use crate::auth::{AuthError, AuthResult, JwksManager};

/// Clock skew tolerated on provider tokens (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Protocol claims that carry no user information.
const PROTOCOL_CLAIMS: &[&str] = &[
    "iss", "aud", "exp", "iat", "nbf", "azp", "auth_time", "nonce", "at_hash", "c_hash", "jti",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcProviderConfig {
    pub name: String,
    /// Expected `iss` of id tokens
    pub issuer: String,
    /// Expected `aud` of id tokens
    pub client_id: String,
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,
    pub jwks_uri: String,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    /// Redirect URIs accepted with an authorization code
    #[serde(default)]
    pub allowed_redirect_uris: Vec<String>,
    /// Further accepted audiences (e.g. mobile client ids)
    #[serde(default)]
    pub additional_audiences: Vec<String>,
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

pub struct OidcProvider {
    config: OidcProviderConfig,
    jwks: JwksManager,
    client: reqwest::Client,
}

impl OidcProvider {
    pub fn new(config: OidcProviderConfig, client: reqwest::Client) -> Self {
        let jwks = JwksManager::new(config.jwks_uri.clone(), client.clone());
        Self::with_jwks(config, jwks, client)
    }

    pub fn with_jwks(config: OidcProviderConfig, jwks: JwksManager, client: reqwest::Client) -> Self {
        Self {
            config,
            jwks,
            client,
        }
    }

    async fn verify_id_token(&self, id_token: &str) -> AuthResult<ExternalUserTransfer> {
        let header = decode_header(id_token)
            .map_err(|_| AuthError::ExternalTokenInvalid("malformed id token".to_string()))?;
        let (key, algorithm) = match &header.kid {
            Some(kid) => self.jwks.get_decoding_key(kid).await?,
            None => self.jwks.get_any_decoding_key().await?,
        };
        if header.alg != algorithm {
            return Err(AuthError::ExternalTokenInvalid(
                "id token algorithm does not match its key".to_string(),
            ));
        }

        let mut audiences = vec![self.config.client_id.clone()];
        audiences.extend(self.config.additional_audiences.iter().cloned());

        let mut validation = Validation::new(algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&audiences);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        let data = decode::<Map<String, Value>>(id_token, &key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => "id token has expired",
                ErrorKind::InvalidSignature => "id token signature is invalid",
                ErrorKind::InvalidIssuer => "id token issuer is invalid",
                ErrorKind::InvalidAudience => "id token audience is invalid",
                ErrorKind::ImmatureSignature => "id token is not yet valid",
                _ => "id token is malformed",
            };
            AuthError::ExternalTokenInvalid(reason.to_string())
        })?;

        let mut claims = data.claims;
        for claim in PROTOCOL_CLAIMS {
            claims.remove(*claim);
        }
        normalize_claims(&self.config.name, claims, None)
    }

    fn check_redirect_uri(&self, redirect_uri: &str) -> AuthResult<()> {
        if self
            .config
            .allowed_redirect_uris
            .iter()
            .any(|allowed| allowed == redirect_uri)
        {
            Ok(())
        } else {
            tracing::warn!(provider = %self.config.name, redirect_uri = %redirect_uri, "Redirect URI not allowed");
            Err(AuthError::Validation("redirect_uri is not allowed".to_string()))
        }
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> AuthResult<TokenEndpointResponse> {
        let endpoint = self.config.token_endpoint.as_deref().ok_or_else(|| {
            AuthError::Validation(format!(
                "provider '{}' does not accept authorization codes",
                self.config.name
            ))
        })?;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .client
            .post(endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error(&self.config.name, e))?;
        let body = read_provider_json(&self.config.name, response).await?;
        serde_json::from_value(Value::Object(body)).map_err(|e| {
            AuthError::ExternalProviderUnreachable(format!("{} token response: {e}", self.config.name))
        })
    }

    async fn fetch_userinfo(&self, access_token: &str) -> AuthResult<ExternalUserTransfer> {
        let endpoint = self.config.userinfo_endpoint.as_deref().ok_or_else(|| {
            AuthError::Validation(format!("provider '{}' requires an id_token", self.config.name))
        })?;
        let response = self
            .client
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(&self.config.name, e))?;
        let claims = read_provider_json(&self.config.name, response).await?;
        normalize_claims(&self.config.name, claims, None)
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn validate(&self, credentials: &ProviderCredentials) -> AuthResult<ExternalUserTransfer> {
        if let Some(id_token) = credentials.id_token() {
            return self.verify_id_token(id_token).await;
        }

        if let Some(code) = credentials.authorization_code() {
            let redirect_uri = credentials.redirect_uri().ok_or_else(|| {
                AuthError::Validation("redirect_uri is required with an authorization code".to_string())
            })?;
            self.check_redirect_uri(redirect_uri)?;
            let tokens = self.exchange_code(code, redirect_uri).await?;
            if let Some(id_token) = tokens.id_token.as_deref() {
                return self.verify_id_token(id_token).await;
            }
            if let Some(access_token) = tokens.access_token.as_deref() {
                return self.fetch_userinfo(access_token).await;
            }
            return Err(AuthError::ExternalTokenInvalid(
                "token endpoint returned no token".to_string(),
            ));
        }

        if let Some(access_token) = credentials.access_token() {
            return self.fetch_userinfo(access_token).await;
        }

        Err(AuthError::Validation(
            "an id_token, access_token or authorization_code is required".to_string(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    use super::*;
    use crate::auth::jwks::test_support::octet_jwks;

    pub(crate) const PROVIDER_SECRET: &[u8] = b"provider-signing-secret-0123456789";
    pub(crate) const ISSUER: &str = "https://login.example.com";
    pub(crate) const CLIENT_ID: &str = "shop-web";

    pub(crate) fn config(base_url: Option<&str>) -> OidcProviderConfig {
        OidcProviderConfig {
            name: "acme".to_string(),
            issuer: ISSUER.to_string(),
            client_id: CLIENT_ID.to_string(),
            client_secret: Some("s3cret".to_string()),
            jwks_uri: format!("{}/jwks", base_url.unwrap_or("http://127.0.0.1:9")),
            token_endpoint: base_url.map(|b| format!("{b}/token")),
            userinfo_endpoint: base_url.map(|b| format!("{b}/userinfo")),
            allowed_redirect_uris: vec!["https://shop.example.com/callback".to_string()],
            additional_audiences: vec![],
        }
    }

    pub(crate) fn provider(base_url: Option<&str>) -> OidcProvider {
        OidcProvider::with_jwks(
            config(base_url),
            JwksManager::with_static_keys(octet_jwks("acme-1", PROVIDER_SECRET)),
            reqwest::Client::new(),
        )
    }

    /// Sign an id token; `overrides` replace default claims.
    pub(crate) fn id_token(overrides: Value) -> String {
        let now = Utc::now().timestamp();
        let mut claims = json!({
            "iss": ISSUER,
            "aud": CLIENT_ID,
            "sub": "acme-user-1",
            "email": "ada@example.com",
            "email_verified": true,
            "given_name": "Ada",
            "iat": now,
            "exp": now + 300,
        });
        if let (Some(target), Value::Object(extra)) = (claims.as_object_mut(), overrides) {
            for (key, value) in extra {
                target.insert(key, value);
            }
        }
        let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
        header.kid = Some("acme-1".to_string());
        encode(&header, &claims, &EncodingKey::from_secret(PROVIDER_SECRET)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::external::test_support::spawn_server;
    use axum::{http::StatusCode, routing::get, routing::post, Json, Router};
    use chrono::Utc;
    use serde_json::json;

    fn with_id_token(token: String) -> ProviderCredentials {
        ProviderCredentials {
            id_token: Some(token),
            ..ProviderCredentials::default()
        }
    }

    #[tokio::test]
    async fn valid_id_token_normalizes() {
        let transfer = provider(None)
            .validate(&with_id_token(id_token(json!({}))))
            .await
            .unwrap();
        assert_eq!(transfer.provider, "acme");
        assert_eq!(transfer.provider_user_id, "acme-user-1");
        assert!(transfer.email_verified);
        assert_eq!(transfer.first_name.as_deref(), Some("Ada"));
        assert!(transfer.additional_claims.get("iss").is_none());
    }

    #[tokio::test]
    async fn id_token_checks_audience_issuer_and_expiry() {
        let provider = provider(None);
        for overrides in [
            json!({ "aud": "someone-else" }),
            json!({ "iss": "https://evil.example.com" }),
            json!({ "exp": Utc::now().timestamp() - 3600 }),
        ] {
            let err = provider
                .validate(&with_id_token(id_token(overrides)))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::ExternalTokenInvalid(_)), "{err:?}");
        }
    }

    #[tokio::test]
    async fn tampered_id_token_is_rejected() {
        let token = id_token(json!({}));
        let forged = format!("{}x", token);
        let err = provider(None).validate(&with_id_token(forged)).await.unwrap_err();
        assert!(matches!(err, AuthError::ExternalTokenInvalid(_)));
    }

    #[tokio::test]
    async fn code_requires_allowed_redirect_uri() {
        let credentials = ProviderCredentials {
            authorization_code: Some("code-1".into()),
            redirect_uri: Some("https://evil.example.com/callback".into()),
            ..ProviderCredentials::default()
        };
        let err = provider(Some("http://127.0.0.1:9")).validate(&credentials).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn code_is_exchanged_for_id_token() {
        let token = id_token(json!({ "sub": "from-code" }));
        let app = Router::new().route(
            "/token",
            post(move || {
                let token = token.clone();
                async move { Json(json!({ "id_token": token, "token_type": "Bearer" })) }
            }),
        );
        let addr = spawn_server(app).await;
        let base = format!("http://{addr}");

        let credentials = ProviderCredentials {
            authorization_code: Some("code-1".into()),
            redirect_uri: Some("https://shop.example.com/callback".into()),
            ..ProviderCredentials::default()
        };
        let transfer = provider(Some(&base)).validate(&credentials).await.unwrap();
        assert_eq!(transfer.provider_user_id, "from-code");
    }

    #[tokio::test]
    async fn access_token_uses_userinfo() {
        let app = Router::new().route(
            "/userinfo",
            get(|| async { Json(json!({ "sub": "u-9", "email": "bob@example.com" })) }),
        );
        let addr = spawn_server(app).await;
        let base = format!("http://{addr}");

        let credentials = ProviderCredentials {
            access_token: Some("opaque".into()),
            ..ProviderCredentials::default()
        };
        let transfer = provider(Some(&base)).validate(&credentials).await.unwrap();
        assert_eq!(transfer.provider_user_id, "u-9");
        assert!(!transfer.email_verified);
    }

    #[tokio::test]
    async fn provider_errors_are_classified() {
        let app = Router::new()
            .route("/userinfo", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route("/token", post(|| async { StatusCode::BAD_REQUEST }));
        let addr = spawn_server(app).await;
        let base = format!("http://{addr}");
        let provider = provider(Some(&base));

        let err = provider
            .validate(&ProviderCredentials {
                access_token: Some("opaque".into()),
                ..ProviderCredentials::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ExternalProviderUnreachable(_)));

        let err = provider
            .validate(&ProviderCredentials {
                authorization_code: Some("used-code".into()),
                redirect_uri: Some("https://shop.example.com/callback".into()),
                ..ProviderCredentials::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ExternalTokenInvalid(_)));
    }

    #[tokio::test]
    async fn no_credential_is_a_validation_error() {
        let err = provider(None)
            .validate(&ProviderCredentials::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }
}
