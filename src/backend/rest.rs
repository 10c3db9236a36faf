// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! REST client for the managed backend.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header, StatusCode};
use serde::Deserialize;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use url::Url;

use super::BackendError;
use crate::config::{with_trailing_slash, BackendConfig};
use crate::onboarding::{OnboardingProfile, ProfileBackend};
use crate::session::{AuthBackend, AuthEvent, SessionEnvelope};

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Auth event fan-out capacity.
const EVENT_CAPACITY: usize = 32;

const USER_PATH: &str = "auth/v1/user";
const PROFILES_PATH: &str = "rest/v1/profiles";
const PROFILE_COLUMNS: &str = "email_confirmed_at,wallet_address,onboarding_completed_at";

/// `GET /auth/v1/user` response (fields the gate reads).
#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email_confirmed_at: Option<DateTime<Utc>>,
}

/// HTTP client for the hosted auth and profile APIs.
pub struct RestBackend {
    base_url: Url,
    anon_key: String,
    client: reqwest::Client,
    access_token: RwLock<Option<String>>,
    events: broadcast::Sender<AuthEvent>,
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            base_url: with_trailing_slash(&config.base_url),
            anon_key: config.anon_key.clone(),
            client,
            access_token: RwLock::new(None),
            events,
        })
    }

    /// Adopt an access token after sign-in in the shell.
    ///
    /// Emits `SignedIn` when the backend accepts the token, `SignedOut` when
    /// it does not.
    pub async fn sign_in(&self, access_token: String) -> Result<(), BackendError> {
        self.adopt(access_token, AuthEvent::SignedIn).await
    }

    /// Adopt a refreshed access token.
    pub async fn refresh(&self, access_token: String) -> Result<(), BackendError> {
        self.adopt(access_token, AuthEvent::TokenRefreshed).await
    }

    pub async fn sign_out(&self) {
        *self.access_token.write().await = None;
        // No subscribers is fine: nobody is waiting on auth state yet.
        let _ = self.events.send(AuthEvent::SignedOut);
    }

    async fn adopt(
        &self,
        access_token: String,
        event: fn(SessionEnvelope) -> AuthEvent,
    ) -> Result<(), BackendError> {
        match self.fetch_user(&access_token).await? {
            Some(envelope) => {
                *self.access_token.write().await = Some(access_token);
                let _ = self.events.send(event(envelope));
            }
            None => {
                info!("Backend rejected access token, treating as signed out");
                self.sign_out().await;
            }
        }
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base_url.join(path)?)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<Option<SessionEnvelope>, BackendError> {
        let response = self
            .client
            .get(self.endpoint(USER_PATH)?)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Ok(None),
            status if !status.is_success() => {
                return Err(BackendError::Status {
                    status: status.as_u16(),
                    body: response.text().await.unwrap_or_default(),
                })
            }
            _ => {}
        }

        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        Ok(Some(SessionEnvelope {
            user_id: user.id,
            email_verified_at: user.email_confirmed_at,
            access_token: access_token.to_string(),
        }))
    }
}

impl AuthBackend for RestBackend {
    async fn current_session(&self) -> Result<Option<SessionEnvelope>, BackendError> {
        let token = self.access_token.read().await.clone();
        match token {
            Some(token) => self.fetch_user(&token).await,
            None => Ok(None),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

impl ProfileBackend for RestBackend {
    async fn onboarding_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<OnboardingProfile>, BackendError> {
        let mut url = self.endpoint(PROFILES_PATH)?;
        url.query_pairs_mut()
            .append_pair("select", PROFILE_COLUMNS)
            .append_pair("user_id", &format!("eq.{user_id}"))
            .append_pair("limit", "1");

        let token = self.access_token.read().await.clone();
        let mut request = self
            .client
            .get(url)
            .header("apikey", &self.anon_key)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let rows: Vec<OnboardingProfile> = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        debug!(user_id = %user_id, rows = rows.len(), "Onboarding profile fetched");
        Ok(rows.into_iter().next())
    }
}
