// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup and validated
//! into [`AppConfig`]. Bad values fail startup with a [`ConfigError`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding `auth.redb` | `./data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `JWT_ISSUER` | `iss` of issued access tokens | `resys-identity` |
//! | `JWT_AUDIENCE` | `aud` of issued access tokens | `resys-api` |
//! | `JWT_SECRET` | HS256 signing secret (32+ bytes) | Required unless PEM keys are set |
//! | `JWT_ALGORITHM` | Algorithm for PEM keys (`RS256`, `ES256`, ...) | `RS256` |
//! | `JWT_PRIVATE_KEY_PATH` | PEM private key | Optional |
//! | `JWT_PUBLIC_KEY_PATH` | PEM public key | Optional |
//! | `JWT_KEY_ID` | `kid` header of issued tokens | Optional |
//! | `ACCESS_TOKEN_TTL_SECS` | Access-token lifetime | `900` |
//! | `REFRESH_TOKEN_TTL_DAYS` | Refresh-token lifetime | `7` |
//! | `REMEMBER_ME_TTL_DAYS` | Refresh-token lifetime with `remember_me` | `30` |
//! | `REFRESH_TOKEN_RETENTION_DAYS` | Days kept after expiry before deletion | `7` |
//! | `REFRESH_TOKEN_PEPPER` | HMAC key for stored token hashes | Optional |
//! | `SWEEP_INTERVAL_SECS` | Retention sweep period | `3600` |
//! | `AUTHZ_CACHE_CAPACITY` | Max cached users | `10000` |
//! | `AUTHZ_CACHE_SLIDING_SECS` | Idle expiry of cached claims | `300` |
//! | `AUTHZ_CACHE_ABSOLUTE_SECS` | Hard expiry of cached claims | `1800` |
//! | `EXTERNAL_PROVIDERS_FILE` | JSON list of identity providers | Optional |
//! | `EXTERNAL_PROVIDER_TIMEOUT_SECS` | Timeout of provider calls | `10` |
//! | `DEFAULT_USER_ROLE` | Role of new accounts after the first | `customer` |
//! | `TLS_CERT_PATH` | PEM certificate chain, enables HTTPS | Optional |
//! | `TLS_KEY_PATH` | PEM private key for `TLS_CERT_PATH` | Optional |

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;

use crate::auth::SigningKeys;
use crate::authorization::CacheSettings;
use crate::external::ProviderConfig;
use crate::storage::{RefreshTokenPolicy, TokenHasher};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Directory of the identity database. The file itself is `auth.redb`.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const JWT_ISSUER_ENV: &str = "JWT_ISSUER";
pub const JWT_AUDIENCE_ENV: &str = "JWT_AUDIENCE";

/// Symmetric signing secret. Takes precedence over PEM keys when both are set.
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";

pub const JWT_ALGORITHM_ENV: &str = "JWT_ALGORITHM";
pub const JWT_PRIVATE_KEY_PATH_ENV: &str = "JWT_PRIVATE_KEY_PATH";
pub const JWT_PUBLIC_KEY_PATH_ENV: &str = "JWT_PUBLIC_KEY_PATH";
pub const JWT_KEY_ID_ENV: &str = "JWT_KEY_ID";
pub const ACCESS_TOKEN_TTL_SECS_ENV: &str = "ACCESS_TOKEN_TTL_SECS";
pub const REFRESH_TOKEN_TTL_DAYS_ENV: &str = "REFRESH_TOKEN_TTL_DAYS";
pub const REMEMBER_ME_TTL_DAYS_ENV: &str = "REMEMBER_ME_TTL_DAYS";

/// Grace period after expiry during which revoked records still detect reuse.
pub const REFRESH_TOKEN_RETENTION_DAYS_ENV: &str = "REFRESH_TOKEN_RETENTION_DAYS";

/// Optional HMAC key. Changing it invalidates every outstanding refresh token.
pub const REFRESH_TOKEN_PEPPER_ENV: &str = "REFRESH_TOKEN_PEPPER";

pub const SWEEP_INTERVAL_SECS_ENV: &str = "SWEEP_INTERVAL_SECS";
pub const AUTHZ_CACHE_CAPACITY_ENV: &str = "AUTHZ_CACHE_CAPACITY";
pub const AUTHZ_CACHE_SLIDING_SECS_ENV: &str = "AUTHZ_CACHE_SLIDING_SECS";
pub const AUTHZ_CACHE_ABSOLUTE_SECS_ENV: &str = "AUTHZ_CACHE_ABSOLUTE_SECS";
pub const EXTERNAL_PROVIDERS_FILE_ENV: &str = "EXTERNAL_PROVIDERS_FILE";
pub const EXTERNAL_PROVIDER_TIMEOUT_SECS_ENV: &str = "EXTERNAL_PROVIDER_TIMEOUT_SECS";
pub const DEFAULT_USER_ROLE_ENV: &str = "DEFAULT_USER_ROLE";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

/// Name of the database file under `DATA_DIR`.
pub const DATABASE_FILE: &str = "auth.redb";

/// Shortest accepted HS256 secret, in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Upper bound of every day-valued setting.
pub const MAX_DAYS: i64 = 3650;

/// Upper bound of every second-valued setting.
pub const MAX_SECS: u64 = 7 * 24 * 60 * 60;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid ({value:?}): {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid providers file {path}: {reason}")]
    Providers { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Where access-token signing keys come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningKeySource {
    Secret(String),
    Pem {
        algorithm: Algorithm,
        private_key_path: PathBuf,
        public_key_path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Validated service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub signing_key: SigningKeySource,
    pub jwt_key_id: Option<String>,
    pub access_token_ttl: Duration,
    pub refresh_tokens: RefreshTokenPolicy,
    pub refresh_token_retention: Duration,
    pub refresh_token_pepper: Option<String>,
    pub sweep_interval: Duration,
    pub claims_cache: CacheSettings,
    pub providers_file: Option<PathBuf>,
    pub provider_timeout: Duration,
    pub default_user_role: String,
    pub tls: Option<TlsPaths>,
}

impl AppConfig {
    /// Read and validate the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, treating blank values as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let signing_key = match env.get(JWT_SECRET_ENV) {
            Some(secret) => {
                if secret.len() < MIN_JWT_SECRET_LEN {
                    return Err(ConfigError::Invalid {
                        name: JWT_SECRET_ENV,
                        value: "<redacted>".to_string(),
                        reason: format!("must be at least {MIN_JWT_SECRET_LEN} bytes"),
                    });
                }
                SigningKeySource::Secret(secret)
            }
            None => {
                let private_key_path = env
                    .get(JWT_PRIVATE_KEY_PATH_ENV)
                    .ok_or(ConfigError::Missing(JWT_SECRET_ENV))?;
                let public_key_path = env
                    .get(JWT_PUBLIC_KEY_PATH_ENV)
                    .ok_or(ConfigError::Missing(JWT_PUBLIC_KEY_PATH_ENV))?;
                SigningKeySource::Pem {
                    algorithm: env.algorithm()?,
                    private_key_path: private_key_path.into(),
                    public_key_path: public_key_path.into(),
                }
            }
        };

        let tls = match (env.get(TLS_CERT_PATH_ENV), env.get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(TLS_KEY_PATH_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(TLS_CERT_PATH_ENV)),
        };

        let claims_cache = CacheSettings {
            capacity: env.positive(AUTHZ_CACHE_CAPACITY_ENV, 10_000)?,
            sliding: Duration::from_secs(env.bounded(AUTHZ_CACHE_SLIDING_SECS_ENV, 300, MAX_SECS)?),
            absolute: Duration::from_secs(env.bounded(
                AUTHZ_CACHE_ABSOLUTE_SECS_ENV,
                1800,
                MAX_SECS,
            )?),
        };
        if claims_cache.absolute < claims_cache.sliding {
            return Err(ConfigError::Invalid {
                name: AUTHZ_CACHE_ABSOLUTE_SECS_ENV,
                value: claims_cache.absolute.as_secs().to_string(),
                reason: format!("must not be shorter than {AUTHZ_CACHE_SLIDING_SECS_ENV}"),
            });
        }

        let refresh_days = env.bounded(REFRESH_TOKEN_TTL_DAYS_ENV, 7, MAX_DAYS)?;
        let remember_days = env.bounded(REMEMBER_ME_TTL_DAYS_ENV, 30, MAX_DAYS)?;
        let retention_days = env.at_most(REFRESH_TOKEN_RETENTION_DAYS_ENV, 7, MAX_DAYS as u64)?;

        Ok(Self {
            host: env.get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse(PORT_ENV, 8080)?,
            data_dir: env.get(DATA_DIR_ENV).unwrap_or_else(|| "./data".to_string()).into(),
            log_format: match env.get(LOG_FORMAT_ENV).as_deref() {
                Some("json") => LogFormat::Json,
                Some("pretty") | None => LogFormat::Pretty,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        name: LOG_FORMAT_ENV,
                        value: other.to_string(),
                        reason: "expected json or pretty".to_string(),
                    })
                }
            },
            jwt_issuer: env.get(JWT_ISSUER_ENV).unwrap_or_else(|| "resys-identity".to_string()),
            jwt_audience: env.get(JWT_AUDIENCE_ENV).unwrap_or_else(|| "resys-api".to_string()),
            signing_key,
            jwt_key_id: env.get(JWT_KEY_ID_ENV),
            access_token_ttl: Duration::from_secs(env.bounded(
                ACCESS_TOKEN_TTL_SECS_ENV,
                900,
                MAX_SECS,
            )?),
            refresh_tokens: RefreshTokenPolicy {
                ttl: chrono::Duration::days(refresh_days),
                remember_me_ttl: chrono::Duration::days(remember_days),
            },
            refresh_token_retention: Duration::from_secs(retention_days * SECS_PER_DAY),
            refresh_token_pepper: env.get(REFRESH_TOKEN_PEPPER_ENV),
            sweep_interval: Duration::from_secs(env.bounded(SWEEP_INTERVAL_SECS_ENV, 3600, MAX_SECS)?),
            claims_cache,
            providers_file: env.get(EXTERNAL_PROVIDERS_FILE_ENV).map(PathBuf::from),
            provider_timeout: Duration::from_secs(
                env.bounded(EXTERNAL_PROVIDER_TIMEOUT_SECS_ENV, 10, MAX_SECS)?,
            ),
            default_user_role: env
                .get(DEFAULT_USER_ROLE_ENV)
                .unwrap_or_else(|| "customer".to_string()),
            tls,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let value = format!("{}:{}", self.host, self.port);
        value.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            name: HOST_ENV,
            value,
            reason: e.to_string(),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn token_hasher(&self) -> TokenHasher {
        TokenHasher::from_pepper(self.refresh_token_pepper.as_deref().map(str::as_bytes))
    }

    /// Load the signing keys, reading PEM files if configured.
    pub fn signing_keys(&self) -> Result<SigningKeys, ConfigError> {
        let keys = match &self.signing_key {
            SigningKeySource::Secret(secret) => SigningKeys::hs256(secret.as_bytes()),
            SigningKeySource::Pem {
                algorithm,
                private_key_path,
                public_key_path,
            } => {
                let private_pem = read_file(private_key_path)?;
                let public_pem = read_file(public_key_path)?;
                SigningKeys::from_pem(*algorithm, &private_pem, &public_pem).map_err(|e| {
                    ConfigError::Invalid {
                        name: JWT_PRIVATE_KEY_PATH_ENV,
                        value: private_key_path.display().to_string(),
                        reason: e.to_string(),
                    }
                })?
            }
        };
        Ok(match &self.jwt_key_id {
            Some(kid) => keys.with_key_id(kid.clone()),
            None => keys,
        })
    }

    /// Load external provider definitions; none when no file is configured.
    pub fn load_providers(&self) -> Result<Vec<ProviderConfig>, ConfigError> {
        let Some(path) = &self.providers_file else {
            return Ok(Vec::new());
        };
        let bytes = read_file(path)?;
        let providers: Vec<ProviderConfig> =
            serde_json::from_slice(&bytes).map_err(|e| ConfigError::Providers {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let mut seen = std::collections::HashSet::new();
        for provider in &providers {
            if !seen.insert(provider.name().to_string()) {
                return Err(ConfigError::Providers {
                    path: path.clone(),
                    reason: format!("provider '{}' is defined twice", provider.name()),
                });
            }
        }
        Ok(providers)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn not_above<T>(name: &'static str, value: T, max: T) -> Result<T, ConfigError>
where
    T: PartialOrd + ToString,
{
    if value > max {
        let max = max.to_string();
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: format!("must be at most {max}"),
        });
    }
    Ok(value)
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn positive<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + ToString,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(name, default)?;
        if value <= T::default() {
            return Err(ConfigError::Invalid {
                name,
                value: value.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn at_most<T>(&self, name: &'static str, default: T, max: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + ToString,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(name, default)?;
        not_above(name, value, max)
    }

    /// Greater than zero and at most `max`.
    fn bounded<T>(&self, name: &'static str, default: T, max: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + ToString,
        T::Err: std::fmt::Display,
    {
        let value = self.positive(name, default)?;
        not_above(name, value, max)
    }

    fn algorithm(&self) -> Result<Algorithm, ConfigError> {
        let Some(value) = self.get(JWT_ALGORITHM_ENV) else {
            return Ok(Algorithm::RS256);
        };
        match value.to_ascii_uppercase().as_str() {
            "RS256" => Ok(Algorithm::RS256),
            "RS384" => Ok(Algorithm::RS384),
            "RS512" => Ok(Algorithm::RS512),
            "ES256" => Ok(Algorithm::ES256),
            "ES384" => Ok(Algorithm::ES384),
            _ => Err(ConfigError::Invalid {
                name: JWT_ALGORITHM_ENV,
                value,
                reason: "expected RS256, RS384, RS512, ES256 or ES384".to_string(),
            }),
        }
    }
}
