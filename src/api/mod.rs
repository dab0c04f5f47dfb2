// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::Request,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{AuthErrorBody, AuthenticatedUser, ErrorCategory},
    authorization::AuthorizeClaimData,
    models::{
        ExternalExchangeRequest, ExternalExchangeResponse, ExternalLoginResponse,
        ExternalLoginsResponse, LoginRequest, LogoutRequest, LogoutResponse, RefreshRequest,
        RegisterRequest, RolePermissionsBody, SessionResponse, TokenPairResponse, UserGrantsBody,
        UserProfile,
    },
    state::AppState,
};

pub mod auth;
pub mod external;
pub mod health;
pub mod users;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout-all", post(auth::logout_all))
        .route("/auth/me", get(auth::me))
        .route("/auth/external", post(external::exchange))
        .route("/auth/external-logins", get(external::list_logins))
        .route(
            "/auth/external-logins/{provider}/{provider_key}",
            delete(external::remove_login),
        )
        .route("/users/{user_id}/grants", put(users::put_user_grants))
        .route("/roles/{role}/permissions", put(users::put_role_permissions));

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    });

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(trace)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::register,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::logout_all,
        auth::me,
        external::exchange,
        external::list_logins,
        external::remove_login,
        users::put_user_grants,
        users::put_role_permissions,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            RegisterRequest,
            LoginRequest,
            RefreshRequest,
            LogoutRequest,
            LogoutResponse,
            TokenPairResponse,
            SessionResponse,
            UserProfile,
            auth::MeResponse,
            AuthorizeClaimData,
            AuthenticatedUser,
            ExternalExchangeRequest,
            ExternalExchangeResponse,
            ExternalLoginResponse,
            ExternalLoginsResponse,
            UserGrantsBody,
            RolePermissionsBody,
            AuthErrorBody,
            ErrorCategory,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Sessions and token rotation"),
        (name = "External", description = "External identity provider sign-in"),
        (name = "Grants", description = "Roles, permissions and policies"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::state::test_support::test_state;

    struct TestApp {
        app: Router,
        _dir: tempfile::TempDir,
    }

    fn app() -> TestApp {
        let (state, dir) = test_state();
        TestApp {
            app: router(state),
            _dir: dir,
        }
    }

    impl TestApp {
        async fn send(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = axum::http::Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("Authorization", format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => builder
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, value)
        }

        async fn register(&self, email: &str) -> Value {
            let (status, body) = self
                .send(
                    Method::POST,
                    "/v1/auth/register",
                    None,
                    Some(json!({ "email": email, "password": "correct horse battery" })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
            body
        }
    }

    fn str_of<'a>(value: &'a Value, key: &str) -> &'a str {
        value[key].as_str().unwrap()
    }

    #[tokio::test]
    async fn register_returns_bearer_pair_and_profile() {
        let app = app();
        let body = app.register("ada@example.com").await;
        assert_eq!(body["token_type"], "Bearer");
        assert!(body["access_token"].is_string());
        assert!(body["refresh_token"].is_string());
        assert_eq!(body["user_profile"]["email"], "ada@example.com");

        let (status, body) = app
            .send(
                Method::POST,
                "/v1/auth/register",
                None,
                Some(json!({ "email": "ADA@example.com", "password": "correct horse battery" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error_code"], "email_already_registered");
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let app = app();
        app.register("ada@example.com").await;
        let (status, body) = app
            .send(
                Method::POST,
                "/v1/auth/login",
                None,
                Some(json!({ "email": "ada@example.com", "password": "nope-nope-nope" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "invalid_credentials");
    }

    #[tokio::test]
    async fn refresh_rotates_and_detects_reuse() {
        let app = app();
        let first = app.register("ada@example.com").await;
        let r1 = str_of(&first, "refresh_token");

        let (status, second) = app
            .send(Method::POST, "/v1/auth/refresh", None, Some(json!({ "refresh_token": r1 })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["token_type"], "Bearer");
        let r2 = str_of(&second, "refresh_token");
        assert_ne!(r1, r2);

        let (status, body) = app
            .send(Method::POST, "/v1/auth/refresh", None, Some(json!({ "refresh_token": r1 })))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "refresh_token_reused");

        // The replacement went down with it
        let (status, body) = app
            .send(Method::POST, "/v1/auth/refresh", None, Some(json!({ "refresh_token": r2 })))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "refresh_token_reused");
    }

    #[tokio::test]
    async fn me_requires_valid_bearer() {
        let app = app();
        let (status, body) = app.send(Method::GET, "/v1/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "missing_auth_header");

        let session = app.register("ada@example.com").await;
        let (status, body) = app
            .send(Method::GET, "/v1/auth/me", Some(str_of(&session, "access_token")), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_profile"]["id"], session["user_profile"]["id"]);
        assert!(body["user_profile"].get("password_hash").is_none());
        assert_eq!(body["authorization"]["roles"], json!(["admin", "customer"]));
    }

    #[tokio::test]
    async fn logout_and_logout_all() {
        let app = app();
        let phone = app.register("ada@example.com").await;
        let (_, laptop) = app
            .send(
                Method::POST,
                "/v1/auth/login",
                None,
                Some(json!({ "email": "ada@example.com", "password": "correct horse battery" })),
            )
            .await;

        let (status, body) = app
            .send(
                Method::POST,
                "/v1/auth/logout",
                None,
                Some(json!({ "refresh_token": str_of(&phone, "refresh_token") })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["revoked_sessions"], 1);

        let (status, body) = app
            .send(
                Method::POST,
                "/v1/auth/logout-all",
                Some(str_of(&laptop, "access_token")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["revoked_sessions"], 1);
    }

    #[tokio::test]
    async fn external_exchange_links_once() {
        let app = app();
        let request = json!({ "provider": "acme", "access_token": "acme-42:grace@example.com:true" });

        let (status, first) = app
            .send(Method::POST, "/v1/auth/external", None, Some(request.clone()))
            .await;
        assert_eq!(status, StatusCode::OK, "{first}");
        assert_eq!(first["is_new_user"], true);
        assert_eq!(first["is_new_login"], true);
        assert_eq!(first["token_type"], "Bearer");

        let (status, second) = app
            .send(Method::POST, "/v1/auth/external", None, Some(request))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["is_new_user"], false);
        assert_eq!(second["is_new_login"], false);
        assert_eq!(second["user_profile"]["id"], first["user_profile"]["id"]);

        let token = str_of(&second, "access_token");
        let (status, body) = app
            .send(Method::GET, "/v1/auth/external-logins", Some(token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["logins"].as_array().unwrap().len(), 1);
        assert_eq!(body["available_providers"], json!(["acme"]));

        // Only sign-in method of a passwordless account
        let (status, body) = app
            .send(Method::DELETE, "/v1/auth/external-logins/acme/acme-42", Some(token), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error_code"], "last_login_method_cannot_be_removed");
    }

    #[tokio::test]
    async fn registered_unverified_email_blocks_external_merge() {
        let app = app();
        let squatter = app.register("grace@example.com").await;

        let (status, body) = app
            .send(
                Method::POST,
                "/v1/auth/external",
                None,
                Some(json!({ "provider": "acme", "access_token": "acme-42:grace@example.com:true" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error_code"], "email_already_registered");

        let (_, logins) = app
            .send(
                Method::GET,
                "/v1/auth/external-logins",
                Some(str_of(&squatter, "access_token")),
                None,
            )
            .await;
        assert!(logins["logins"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_provider_is_bad_request() {
        let app = app();
        let (status, body) = app
            .send(
                Method::POST,
                "/v1/auth/external",
                None,
                Some(json!({ "provider": "myspace", "access_token": "x" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "external_provider_not_configured");
    }

    #[tokio::test]
    async fn grant_changes_apply_on_next_request() {
        let app = app();
        let admin = app.register("admin@example.com").await;
        let member = app.register("member@example.com").await;
        let admin_token = str_of(&admin, "access_token");
        let member_token = str_of(&member, "access_token");
        let member_id = member["user_profile"]["id"].as_str().unwrap();

        let (status, body) = app
            .send(
                Method::PUT,
                &format!("/v1/users/{member_id}/grants"),
                Some(member_token),
                Some(json!({ "roles": ["admin"] })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error_code"], "insufficient_permissions");

        // Warm the member's cache entry
        let (_, me) = app.send(Method::GET, "/v1/auth/me", Some(member_token), None).await;
        assert_eq!(me["authorization"]["roles"], json!(["customer"]));

        let (status, _) = app
            .send(
                Method::PUT,
                &format!("/v1/users/{member_id}/grants"),
                Some(admin_token),
                Some(json!({ "roles": ["editor"], "permissions": ["catalog.read"] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, me) = app.send(Method::GET, "/v1/auth/me", Some(member_token), None).await;
        assert_eq!(me["authorization"]["roles"], json!(["editor"]));

        let (status, _) = app
            .send(
                Method::PUT,
                "/v1/roles/editor/permissions",
                Some(admin_token),
                Some(json!({ "permissions": ["catalog.write"] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, me) = app.send(Method::GET, "/v1/auth/me", Some(member_token), None).await;
        let permissions = me["authorization"]["permissions"].as_array().unwrap();
        assert!(permissions.contains(&json!("catalog.write")));
        assert!(permissions.contains(&json!("catalog.read")));
    }

    #[tokio::test]
    async fn health_and_docs_are_served() {
        let app = app();
        let (status, body) = app.send(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["database"], "ok");
        assert_eq!(body["checks"]["external_providers"], 1);

        let (status, _) = app.send(Method::GET, "/health/live", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, doc) = app.send(Method::GET, "/api-doc/openapi.json", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(doc["paths"]["/v1/auth/refresh"].is_object());
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let app = app();
        let response = app
            .app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }
}
