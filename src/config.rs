// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the gate. Configuration is loaded from the environment once at
//! startup via [`GateConfig::from_env`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `BACKEND_URL` | Managed backend base URL | Required |
//! | `BACKEND_ANON_KEY` | Public API key sent as `apikey` | Required |
//! | `BACKEND_JWKS_URL` | JWKS endpoint for capability tokens | `{BACKEND_URL}/auth/v1/.well-known/jwks.json` |
//! | `TOKEN_ISSUER` | Expected token issuer claim | Not validated |
//! | `TOKEN_AUDIENCE` | Expected token audience claim | `authenticated` |
//! | `DEVICE_STORAGE_PATH` | Device-local key-value file | `./device-storage.json` |
//! | `ACCESS_GRACE_PERIOD_MS` | Delay before a denial turns into a redirect | `1000` |
//! | `SESSION_HYDRATION_TIMEOUT_MS` | Bound on the initial session fetch | `10000` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::routes::RouteTable;

pub const BACKEND_URL_ENV: &str = "BACKEND_URL";
pub const BACKEND_ANON_KEY_ENV: &str = "BACKEND_ANON_KEY";
pub const BACKEND_JWKS_URL_ENV: &str = "BACKEND_JWKS_URL";
pub const TOKEN_ISSUER_ENV: &str = "TOKEN_ISSUER";
pub const TOKEN_AUDIENCE_ENV: &str = "TOKEN_AUDIENCE";
pub const DEVICE_STORAGE_PATH_ENV: &str = "DEVICE_STORAGE_PATH";
pub const ACCESS_GRACE_PERIOD_ENV: &str = "ACCESS_GRACE_PERIOD_MS";
pub const SESSION_HYDRATION_TIMEOUT_ENV: &str = "SESSION_HYDRATION_TIMEOUT_MS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Delay after mount before "no access" turns into a redirect.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(1000);

/// Upper bound on the initial session fetch.
pub const DEFAULT_HYDRATION_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_DEVICE_STORAGE_PATH: &str = "./device-storage.json";

/// Audience the backend stamps on end-user access tokens.
pub const DEFAULT_TOKEN_AUDIENCE: &str = "authenticated";

/// JWKS location relative to the backend base URL.
const JWKS_PATH: &str = "auth/v1/.well-known/jwks.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid URL in {var}: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid millisecond value in {var}: {value}")]
    InvalidDuration { var: &'static str, value: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    /// Unknown values fall back to `Pretty`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Backend connection settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: Url,
    pub anon_key: String,
    pub jwks_url: Url,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Everything the gate needs at startup.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub backend: BackendConfig,
    pub storage_path: PathBuf,
    pub grace_period: Duration,
    pub hydration_timeout: Duration,
    pub log_format: LogFormat,
    pub routes: RouteTable,
}

impl GateConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = parse_url(
            BACKEND_URL_ENV,
            &lookup(BACKEND_URL_ENV).ok_or(ConfigError::Missing(BACKEND_URL_ENV))?,
        )?;
        let anon_key = lookup(BACKEND_ANON_KEY_ENV)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(BACKEND_ANON_KEY_ENV))?;

        let jwks_url = match lookup(BACKEND_JWKS_URL_ENV) {
            Some(raw) => parse_url(BACKEND_JWKS_URL_ENV, &raw)?,
            None => with_trailing_slash(&base_url)
                .join(JWKS_PATH)
                .map_err(|source| ConfigError::InvalidUrl {
                    var: BACKEND_URL_ENV,
                    source,
                })?,
        };

        let issuer = lookup(TOKEN_ISSUER_ENV).filter(|v| !v.is_empty());
        let audience = match lookup(TOKEN_AUDIENCE_ENV) {
            Some(v) if v.is_empty() => None,
            Some(v) => Some(v),
            None => Some(DEFAULT_TOKEN_AUDIENCE.to_string()),
        };

        let storage_path = lookup(DEVICE_STORAGE_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_STORAGE_PATH));

        let grace_period = parse_millis(
            ACCESS_GRACE_PERIOD_ENV,
            lookup(ACCESS_GRACE_PERIOD_ENV),
            DEFAULT_GRACE_PERIOD,
        )?;
        let hydration_timeout = parse_millis(
            SESSION_HYDRATION_TIMEOUT_ENV,
            lookup(SESSION_HYDRATION_TIMEOUT_ENV),
            DEFAULT_HYDRATION_TIMEOUT,
        )?;

        let log_format = lookup(LOG_FORMAT_ENV)
            .map(|v| LogFormat::parse(&v))
            .unwrap_or_default();

        Ok(Self {
            backend: BackendConfig {
                base_url,
                anon_key,
                jwks_url,
                issuer,
                audience,
            },
            storage_path,
            grace_period,
            hydration_timeout,
            log_format,
            routes: RouteTable::default(),
        })
    }
}

fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { var, source })
}

/// `Url::join` replaces the last segment unless the base ends with `/`.
pub(crate) fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn parse_millis(
    var: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidDuration { var, value: raw }),
    }
}
