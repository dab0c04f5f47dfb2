// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access-token claim set and its codec.
//!
//! Required claims are `sub`, `iss`, `aud`, `exp` and `iat`. Roles,
//! permissions and policies travel as `role`, `permission` and `policy`,
//! each accepted either as a single string or as an array. Times are Unix
//! epoch seconds (UTC).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{AuthError, AuthResult};
use crate::authorization::{same_set, AuthorizeClaimData};

/// Claims carried by an access token.
///
/// Equality ignores the order of roles, permissions and policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (local user id)
    pub sub: String,
    pub iss: String,
    #[serde(deserialize_with = "one_or_many", serialize_with = "single_or_array")]
    pub aud: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Unique token id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(
        rename = "role",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub roles: Vec<String>,
    #[serde(
        rename = "permission",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub permissions: Vec<String>,
    #[serde(
        rename = "policy",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub policies: Vec<String>,
}

impl PartialEq for AccessTokenClaims {
    fn eq(&self, other: &Self) -> bool {
        self.sub == other.sub
            && self.iss == other.iss
            && self.aud == other.aud
            && self.exp == other.exp
            && self.iat == other.iat
            && self.nbf == other.nbf
            && self.jti == other.jti
            && self.email == other.email
            && same_set(&self.roles, &other.roles)
            && same_set(&self.permissions, &other.permissions)
            && same_set(&self.policies, &other.policies)
    }
}

impl Eq for AccessTokenClaims {}

impl AccessTokenClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Authorization carried by the token.
    pub fn authorization(&self) -> AuthorizeClaimData {
        AuthorizeClaimData::new(
            self.sub.clone(),
            self.roles.clone(),
            self.permissions.clone(),
            self.policies.clone(),
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

fn single_or_array<S>(values: &[String], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match values {
        [single] => serializer.serialize_str(single),
        _ => values.serialize(serializer),
    }
}

/// Builds and parses access-token claim sets. Pure, no I/O.
#[derive(Debug, Clone)]
pub struct ClaimsCodec {
    issuer: String,
    audience: String,
}

impl ClaimsCodec {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Claim set for `subject`, valid from `issued_at` for `ttl`.
    pub fn build(
        &self,
        subject: &str,
        email: Option<&str>,
        authorization: &AuthorizeClaimData,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> AuthResult<AccessTokenClaims> {
        if subject.trim().is_empty() {
            return Err(AuthError::IdentityInvalid);
        }
        let iat = issued_at.timestamp();
        let exp = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::Internal("access token lifetime out of range".to_string()))?
            .timestamp();
        Ok(AccessTokenClaims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            aud: vec![self.audience.clone()],
            exp,
            iat,
            nbf: Some(iat),
            jti: Some(uuid::Uuid::new_v4().to_string()),
            email: email.map(str::to_string),
            roles: authorization.roles.clone(),
            permissions: authorization.permissions.clone(),
            policies: authorization.policies.clone(),
        })
    }

    /// Serialize a claim set to its JSON payload.
    pub fn encode(&self, claims: &AccessTokenClaims) -> AuthResult<serde_json::Value> {
        serde_json::to_value(claims).map_err(|e| AuthError::Internal(format!("claims encoding: {e}")))
    }

    /// Parse a JSON payload into a claim set.
    pub fn decode(&self, payload: &serde_json::Value) -> AuthResult<AccessTokenClaims> {
        let claims: AccessTokenClaims =
            serde_json::from_value(payload.clone()).map_err(|_| AuthError::TokenMalformed)?;
        if claims.sub.trim().is_empty() {
            return Err(AuthError::TokenMalformed);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> ClaimsCodec {
        ClaimsCodec::new("https://id.example.com", "resys-api")
    }

    #[test]
    fn build_uses_epoch_seconds() {
        let issued_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let claims = codec()
            .build(
                "user-1",
                Some("ada@example.com"),
                &AuthorizeClaimData::new("user-1", vec!["admin".into()], vec![], vec![]),
                issued_at,
                Duration::minutes(15),
            )
            .unwrap();
        assert_eq!(claims.iat, 1_700_000_000);
        assert_eq!(claims.exp, 1_700_000_900);
        assert_eq!(claims.aud, vec!["resys-api"]);
        assert_eq!(claims.expires_at(), issued_at + Duration::minutes(15));
    }

    #[test]
    fn blank_subject_is_rejected() {
        let err = codec()
            .build(" ", None, &AuthorizeClaimData::default(), Utc::now(), Duration::minutes(1))
            .unwrap_err();
        assert_eq!(err, AuthError::IdentityInvalid);
    }

    #[test]
    fn single_values_and_arrays_both_decode() {
        let payload = json!({
            "sub": "user-1",
            "iss": "https://id.example.com",
            "aud": ["resys-api", "other"],
            "exp": 2,
            "iat": 1,
            "role": "admin",
            "permission": ["orders.read", "orders.write"],
        });
        let claims = codec().decode(&payload).unwrap();
        assert_eq!(claims.roles, vec!["admin"]);
        assert_eq!(claims.permissions, vec!["orders.read", "orders.write"]);
        assert!(claims.policies.is_empty());
        assert_eq!(claims.aud.len(), 2);
    }

    #[test]
    fn wire_format_preserves_order_and_omits_empty_lists() {
        let claims = codec()
            .build(
                "user-1",
                None,
                &AuthorizeClaimData::new("user-1", vec!["b".into(), "a".into()], vec![], vec![]),
                Utc::now(),
                Duration::minutes(1),
            )
            .unwrap();
        let payload = codec().encode(&claims).unwrap();
        assert_eq!(payload["role"], json!(["b", "a"]));
        assert_eq!(payload["aud"], json!("resys-api"));
        assert!(payload.get("permission").is_none());
        assert_eq!(codec().decode(&payload).unwrap(), claims);
    }

    #[test]
    fn claim_order_does_not_affect_equality() {
        let build = |roles: Vec<String>, permissions: Vec<String>| {
            let mut claims = codec()
                .build(
                    "user-1",
                    None,
                    &AuthorizeClaimData::new("user-1", roles, permissions, vec![]),
                    DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
                    Duration::minutes(15),
                )
                .unwrap();
            claims.jti = None;
            claims
        };
        let a = build(vec!["admin".into(), "customer".into()], vec!["a".into(), "b".into()]);
        let b = build(vec!["customer".into(), "admin".into()], vec!["b".into(), "a".into()]);
        assert_eq!(a, b);
        assert_ne!(a, build(vec!["admin".into()], vec!["a".into(), "b".into()]));
    }

    #[test]
    fn out_of_range_lifetime_is_an_error() {
        let err = codec()
            .build(
                "user-1",
                None,
                &AuthorizeClaimData::default(),
                Utc::now(),
                Duration::MAX,
            )
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[test]
    fn missing_required_claim_is_malformed() {
        let payload = json!({ "sub": "user-1", "iss": "x", "aud": "y", "exp": 2 });
        assert_eq!(codec().decode(&payload).unwrap_err(), AuthError::TokenMalformed);
    }
}
