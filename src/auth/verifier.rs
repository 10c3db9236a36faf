// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access token verification.

use std::future::Future;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};

use super::claims::{AccessTokenClaims, AdminCapability};
use super::error::AuthError;
use super::jwks::JwksManager;
use crate::config::BackendConfig;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Turns an access token into a verified capability.
pub trait CapabilityVerifier: Send + Sync {
    /// Verify `token` and check that it belongs to `user_id`.
    fn verify(
        &self,
        token: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<AdminCapability, AuthError>> + Send;
}

/// Where token signing keys come from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Asymmetric keys published by the backend.
    Jwks(JwksManager),
    /// HS256 shared secret (self-hosted backends, tests).
    SharedSecret(Vec<u8>),
}

/// JWT-based verifier.
#[derive(Debug, Clone)]
pub struct JwtCapabilityVerifier {
    keys: KeySource,
    issuer: Option<String>,
    audience: Option<String>,
}

impl JwtCapabilityVerifier {
    pub fn new(keys: KeySource) -> Self {
        Self {
            keys,
            issuer: None,
            audience: None,
        }
    }

    /// Verifier using the backend's JWKS and configured issuer/audience.
    pub fn from_config(config: &BackendConfig) -> Result<Self, AuthError> {
        let jwks = JwksManager::new(config.jwks_url.as_str())?;
        let mut verifier = Self::new(KeySource::Jwks(jwks));
        verifier.issuer = config.issuer.clone();
        verifier.audience = config.audience.clone();
        Ok(verifier)
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    async fn resolve_key(&self, token: &str) -> Result<(DecodingKey, Algorithm), AuthError> {
        match &self.keys {
            KeySource::SharedSecret(secret) => {
                Ok((DecodingKey::from_secret(secret), Algorithm::HS256))
            }
            KeySource::Jwks(jwks) => {
                let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
                match &header.kid {
                    Some(kid) => jwks.get_decoding_key(kid).await,
                    None => jwks.get_any_decoding_key().await,
                }
            }
        }
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.set_required_spec_claims(&["exp", "sub"]);

        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

impl CapabilityVerifier for JwtCapabilityVerifier {
    async fn verify(&self, token: &str, user_id: &str) -> Result<AdminCapability, AuthError> {
        let (key, algorithm) = self.resolve_key(token).await?;
        let data = decode::<AccessTokenClaims>(token, &key, &self.validation(algorithm))?;

        if data.claims.sub != user_id {
            return Err(AuthError::SubjectMismatch);
        }
        Ok(AdminCapability::from_claims(&data.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::AppMetadata;
    use crate::auth::Role;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test-only-shared-secret-0123456789";

    fn token(sub: &str, role: Option<&str>, exp_offset: i64, aud: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = AccessTokenClaims {
            sub: sub.to_string(),
            exp: now + exp_offset,
            iat: now,
            iss: Some("https://project.backend.example/auth/v1".to_string()),
            aud: Some(serde_json::json!(aud)),
            session_id: Some("sess_1".to_string()),
            app_metadata: AppMetadata {
                role: role.map(str::to_string),
            },
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn verifier() -> JwtCapabilityVerifier {
        JwtCapabilityVerifier::new(KeySource::SharedSecret(SECRET.to_vec()))
            .with_issuer("https://project.backend.example/auth/v1")
            .with_audience("authenticated")
    }

    #[tokio::test]
    async fn admin_token_yields_admin_capability() {
        let capability = verifier()
            .verify(&token("u1", Some("admin"), 3600, "authenticated"), "u1")
            .await
            .unwrap();
        assert_eq!(capability.role, Role::Admin);
        assert_eq!(capability.user_id, "u1");
        assert!(capability.grants_admin(chrono::Utc::now()));
    }

    #[tokio::test]
    async fn regular_token_is_not_admin() {
        let capability = verifier()
            .verify(&token("u1", None, 3600, "authenticated"), "u1")
            .await
            .unwrap();
        assert_eq!(capability.role, Role::User);
        assert!(!capability.grants_admin(chrono::Utc::now()));
    }

    #[tokio::test]
    async fn subject_must_match_session_user() {
        let result = verifier()
            .verify(&token("someone-else", Some("admin"), 3600, "authenticated"), "u1")
            .await;
        assert!(matches!(result, Err(AuthError::SubjectMismatch)));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let result = verifier()
            .verify(&token("u1", Some("admin"), -3600, "authenticated"), "u1")
            .await;
        assert!(matches!(result, Err(AuthError::TokenExpired)));
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() {
        let result = verifier()
            .verify(&token("u1", Some("admin"), 3600, "service_role"), "u1")
            .await;
        assert!(matches!(result, Err(AuthError::InvalidAudience)));
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let other = JwtCapabilityVerifier::new(KeySource::SharedSecret(b"another-secret".to_vec()));
        let result = other
            .verify(&token("u1", Some("admin"), 3600, "authenticated"), "u1")
            .await;
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let result = verifier().verify("not-a-jwt", "u1").await;
        assert!(matches!(result, Err(AuthError::MalformedToken)));
    }
}
