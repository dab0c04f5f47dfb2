// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access-token issuance and validation.
//!
//! Access tokens are stateless: validity is a function of signature,
//! issuer, audience and lifetime only. No store lookup is made.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::claims::{AccessTokenClaims, ClaimsCodec};
use super::{AuthError, AuthResult};
use crate::authorization::AuthorizationClaimsCache;
use crate::storage::UserAccount;

/// Key material for signing and verifying access tokens.
#[derive(Clone)]
pub struct SigningKeys {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    key_id: Option<String>,
}

impl SigningKeys {
    /// Symmetric HS256 key.
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            key_id: None,
        }
    }

    /// Asymmetric key pair from PEM (RS256/RS384/RS512 or ES256/ES384).
    pub fn from_pem(algorithm: Algorithm, private_pem: &[u8], public_pem: &[u8]) -> AuthResult<Self> {
        let bad_key = |e: jsonwebtoken::errors::Error| AuthError::Internal(format!("invalid signing key: {e}"));
        let (encoding, decoding) = match algorithm {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => (
                EncodingKey::from_rsa_pem(private_pem).map_err(bad_key)?,
                DecodingKey::from_rsa_pem(public_pem).map_err(bad_key)?,
            ),
            Algorithm::ES256 | Algorithm::ES384 => (
                EncodingKey::from_ec_pem(private_pem).map_err(bad_key)?,
                DecodingKey::from_ec_pem(public_pem).map_err(bad_key)?,
            ),
            other => {
                return Err(AuthError::Internal(format!(
                    "unsupported asymmetric algorithm {other:?}"
                )))
            }
        };
        Ok(Self {
            algorithm,
            encoding,
            decoding,
            key_id: None,
        })
    }

    /// Advertise a key id in the `kid` header.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

/// A signed access token.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub claims: AccessTokenClaims,
}

/// Successful validation: the decoded claims and the signer that produced them.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub claims: AccessTokenClaims,
    pub key_id: Option<String>,
    pub algorithm: Algorithm,
}

/// Issues and validates signed access tokens.
#[derive(Clone)]
pub struct AccessTokenService {
    codec: ClaimsCodec,
    keys: SigningKeys,
    ttl: Duration,
    claims_cache: Arc<AuthorizationClaimsCache>,
}

impl AccessTokenService {
    pub fn new(
        codec: ClaimsCodec,
        keys: SigningKeys,
        ttl: Duration,
        claims_cache: Arc<AuthorizationClaimsCache>,
    ) -> Self {
        Self {
            codec,
            keys,
            ttl,
            claims_cache,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a token for `user` carrying their current authorization.
    ///
    /// Roles and permissions are read through the claims cache.
    pub fn issue(&self, user: &UserAccount) -> AuthResult<IssuedAccessToken> {
        if user.id.trim().is_empty() {
            return Err(AuthError::IdentityInvalid);
        }
        let authorization = self.claims_cache.get_user_authorization(&user.id)?;
        let claims = self.codec.build(
            &user.id,
            Some(&user.email),
            &authorization,
            Utc::now(),
            self.ttl,
        )?;

        let mut header = Header::new(self.keys.algorithm);
        header.kid = self.keys.key_id.clone();
        let token = encode(&header, &claims, &self.keys.encoding)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))?;

        Ok(IssuedAccessToken {
            token,
            expires_at: claims.expires_at(),
            claims,
        })
    }

    /// Verify signature, issuer and audience, and the lifetime if requested.
    ///
    /// `validate_lifetime = false` still checks the signature; it only skips
    /// `exp`/`nbf` so identity can be read from an expired token.
    pub fn validate(&self, token: &str, validate_lifetime: bool) -> AuthResult<ValidationResult> {
        let header = decode_header(token).map_err(|_| AuthError::TokenMalformed)?;
        if let (Some(expected), Some(presented)) = (&self.keys.key_id, &header.kid) {
            if expected != presented {
                return Err(AuthError::TokenSignatureInvalid);
            }
        }

        let mut validation = Validation::new(self.keys.algorithm);
        validation.leeway = 0;
        validation.validate_exp = validate_lifetime;
        validation.validate_nbf = validate_lifetime;
        validation.set_issuer(&[self.codec.issuer()]);
        validation.set_audience(&[self.codec.audience()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        let data = decode::<serde_json::Value>(token, &self.keys.decoding, &validation)
            .map_err(map_jwt_error)?;
        let claims = self.codec.decode(&data.claims)?;

        Ok(ValidationResult {
            claims,
            key_id: data.header.kid,
            algorithm: data.header.alg,
        })
    }

    /// Time left until `exp`, zero if already past.
    ///
    /// Only the token's format is checked; never use this for access decisions.
    pub fn remaining_time(&self, token: &str) -> AuthResult<std::time::Duration> {
        let data = jsonwebtoken::dangerous::insecure_decode::<serde_json::Value>(token)
            .map_err(|_| AuthError::TokenMalformed)?;
        let claims = self.codec.decode(&data.claims)?;
        let remaining = claims.expires_at() - Utc::now();
        Ok(remaining.to_std().unwrap_or(std::time::Duration::ZERO))
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::TokenSignatureInvalid,
        ErrorKind::InvalidIssuer => AuthError::TokenIssuerMismatch,
        ErrorKind::InvalidAudience => AuthError::TokenAudienceMismatch,
        ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
        _ => AuthError::TokenMalformed,
    }
}
