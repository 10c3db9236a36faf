// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access token claims and the verified capability derived from them.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::roles::Role;

/// Claims carried by backend-issued access tokens.
///
/// Only the fields the gate reads are declared; `aud` and `iss` are checked
/// by `jsonwebtoken` during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (backend user id)
    pub sub: String,

    /// Expiration timestamp
    pub exp: i64,

    /// Issued at timestamp
    #[serde(default)]
    pub iat: i64,

    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,

    /// Audience (string or array, validated by `jsonwebtoken`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,

    /// Backend session id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Server-controlled metadata; users cannot edit it.
    #[serde(default)]
    pub app_metadata: AppMetadata,
}

/// Server-controlled user metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl AccessTokenClaims {
    /// Role from `app_metadata.role`, defaulting to `User`.
    pub fn role(&self) -> Role {
        self.app_metadata
            .role
            .as_deref()
            .and_then(Role::parse)
            .unwrap_or_default()
    }
}

/// Capability established by a verified access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCapability {
    pub user_id: String,
    pub role: Role,
    pub session_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl AdminCapability {
    pub fn from_claims(claims: &AccessTokenClaims) -> Self {
        Self {
            user_id: claims.sub.clone(),
            role: claims.role(),
            session_id: claims.session_id.clone(),
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Admin role and not yet expired at `now`.
    pub fn grants_admin(&self, now: DateTime<Utc>) -> bool {
        self.role == Role::Admin && now < self.expires_at
    }
}
