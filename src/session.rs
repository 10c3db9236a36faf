// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Session Store
//!
//! Process-wide owner of the current backend session. Everything else reads
//! snapshots or subscribes to changes; only this store mutates the session.
//!
//! ## Lifecycle
//!
//! ```text
//!            hydrate ok             SignedIn / TokenRefreshed
//! Loading ──────────────► Authenticated ◄──────────────────┐
//!    │   no session                │ SignedOut             │
//!    ├──────────────► Anonymous ◄──┘                       │
//!    │   timeout / backend error                           │
//!    └──────────────► HydrationFailed ─────────────────────┘
//! ```
//!
//! `Loading` is bounded: hydration that does not finish within the configured
//! timeout moves to `HydrationFailed`, which the gate treats as "no server
//! session". Later auth events still apply.
//!
//! ## Admin Flag
//!
//! `Session::admin_until` is only set when the access token verifies and
//! carries the admin role for the same user id. It holds the token expiry:
//! admin rights end there even if no further auth event arrives.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::CapabilityVerifier;
use crate::backend::BackendError;

/// Snapshot of the authenticated identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Option<String>,
    pub email_verified_at: Option<DateTime<Utc>>,
    /// Expiry of the verified admin capability, if any.
    pub admin_until: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_admin_at(&self, now: DateTime<Utc>) -> bool {
        self.admin_until.is_some_and(|until| now < until)
    }
}

/// Why hydration gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrationFailure {
    TimedOut,
    Backend(String),
}

/// Session tri-state plus the terminal hydration failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Initial hydration in progress.
    #[default]
    Loading,
    Authenticated(Session),
    /// Hydrated, no session.
    Anonymous,
    HydrationFailed(HydrationFailure),
}

impl SessionState {
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Loading)
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session().and_then(|s| s.user_id.as_deref())
    }
}

/// Session as reported by the backend auth subsystem, before verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub user_id: String,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub access_token: String,
}

impl std::fmt::Debug for SessionEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEnvelope")
            .field("user_id", &self.user_id)
            .field("email_verified_at", &self.email_verified_at)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Push notifications from the backend auth subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(SessionEnvelope),
    TokenRefreshed(SessionEnvelope),
    SignedOut,
}

/// Backend auth subsystem.
pub trait AuthBackend: Send + Sync {
    /// Current session, or `None` when signed out.
    fn current_session(
        &self,
    ) -> impl Future<Output = Result<Option<SessionEnvelope>, BackendError>> + Send;

    /// Subscribe to sign-in / sign-out / refresh events.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Owner of the session snapshot.
#[derive(Debug)]
pub struct IdentitySessionStore {
    tx: watch::Sender<SessionState>,
}

impl Default for IdentitySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentitySessionStore {
    /// New store in the `Loading` state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Loading);
        Self { tx }
    }

    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    fn publish(&self, next: SessionState) {
        self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Fetch the current session, bounded by `timeout`.
    pub async fn hydrate<B, V>(&self, backend: &B, verifier: &V, timeout: Duration)
    where
        B: AuthBackend,
        V: CapabilityVerifier,
    {
        let next = match tokio::time::timeout(timeout, backend.current_session()).await {
            Ok(Ok(Some(envelope))) => SessionState::Authenticated(admit(envelope, verifier).await),
            Ok(Ok(None)) => SessionState::Anonymous,
            Ok(Err(e)) => {
                warn!(error = %e, "Session hydration failed");
                SessionState::HydrationFailed(HydrationFailure::Backend(e.to_string()))
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Session hydration timed out");
                SessionState::HydrationFailed(HydrationFailure::TimedOut)
            }
        };

        info!(state = state_label(&next), "Session hydrated");
        self.publish(next);
    }

    /// Apply one auth event.
    pub async fn apply<V: CapabilityVerifier>(&self, event: AuthEvent, verifier: &V) {
        let next = match event {
            AuthEvent::SignedIn(envelope) => {
                info!(user_id = %envelope.user_id, "Signed in");
                SessionState::Authenticated(admit(envelope, verifier).await)
            }
            AuthEvent::TokenRefreshed(envelope) => {
                debug!(user_id = %envelope.user_id, "Token refreshed");
                SessionState::Authenticated(admit(envelope, verifier).await)
            }
            AuthEvent::SignedOut => {
                info!("Signed out");
                SessionState::Anonymous
            }
        };
        self.publish(next);
    }

    /// Hydrate, then follow backend auth events until `shutdown` fires.
    pub async fn run<B, V>(
        &self,
        backend: &B,
        verifier: &V,
        hydration_timeout: Duration,
        shutdown: CancellationToken,
    ) where
        B: AuthBackend,
        V: CapabilityVerifier,
    {
        // Subscribe before hydrating so no event is lost in between.
        let mut events = backend.subscribe();

        tokio::select! {
            _ = self.hydrate(backend, verifier, hydration_timeout) => {},
            _ = shutdown.cancelled() => return,
        }

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.apply(event, verifier).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth events lagged, re-hydrating session");
                        self.hydrate(backend, verifier, hydration_timeout).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Auth event stream closed");
                        return;
                    }
                },
                _ = shutdown.cancelled() => {
                    info!("Session store shutting down");
                    return;
                }
            }
        }
    }
}

/// Build a session snapshot, granting admin only on a verified capability.
async fn admit<V: CapabilityVerifier>(envelope: SessionEnvelope, verifier: &V) -> Session {
    let admin_until = match verifier.verify(&envelope.access_token, &envelope.user_id).await {
        Ok(capability) if capability.grants_admin(Utc::now()) => Some(capability.expires_at),
        Ok(_) => None,
        Err(e) => {
            warn!(
                user_id = %envelope.user_id,
                error_code = e.error_code(),
                error = %e,
                "Access token verification failed, session is not admin"
            );
            None
        }
    };

    Session {
        user_id: Some(envelope.user_id),
        email_verified_at: envelope.email_verified_at,
        admin_until,
    }
}

fn state_label(state: &SessionState) -> &'static str {
    match state {
        SessionState::Loading => "loading",
        SessionState::Authenticated(_) => "authenticated",
        SessionState::Anonymous => "anonymous",
        SessionState::HydrationFailed(_) => "hydration_failed",
    }
}
