// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Onboarding Resume Detector
//!
//! Catches users stuck mid-onboarding. On a navigation it reads the user's
//! onboarding profile once and, when the account has a confirmed email and
//! a linked wallet but no completion marker, forces a history-replacing
//! redirect to the resume screen.
//!
//! ## Rules
//!
//! - Onboarding and auth routes are never evaluated (no redirect loops)
//! - No user id, no read
//! - Read failures are logged and swallowed: the user stays where they are
//! - No retry; the next navigation is the retry
//! - A cancelled check never yields a redirect, even if the read completes

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::BackendError;
use crate::routes::{Location, Redirect, RouteTable};

/// Backend-owned onboarding progress for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingProfile {
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub onboarding_completed_at: Option<DateTime<Utc>>,
}

impl OnboardingProfile {
    /// Email confirmed and wallet linked, but onboarding never completed.
    pub fn needs_resume(&self) -> bool {
        let has_wallet = self
            .wallet_address
            .as_deref()
            .is_some_and(|addr| !addr.trim().is_empty());
        self.email_confirmed_at.is_some() && has_wallet && self.onboarding_completed_at.is_none()
    }
}

/// Keyed, side-effect-free profile lookup.
pub trait ProfileBackend: Send + Sync {
    fn onboarding_profile(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<OnboardingProfile>, BackendError>> + Send;
}

impl<T: ProfileBackend> ProfileBackend for std::sync::Arc<T> {
    fn onboarding_profile(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<OnboardingProfile>, BackendError>> + Send {
        (**self).onboarding_profile(user_id)
    }
}

/// Per-navigation onboarding check.
#[derive(Debug, Clone)]
pub struct OnboardingResumeDetector<P> {
    backend: P,
    routes: RouteTable,
}

impl<P: ProfileBackend> OnboardingResumeDetector<P> {
    pub fn new(backend: P, routes: RouteTable) -> Self {
        Self { backend, routes }
    }

    /// Evaluate one navigation.
    ///
    /// Returns the resume redirect, or `None` when the user may stay. Resolves
    /// to `None` as soon as `cancel` fires.
    pub async fn check(
        &self,
        user_id: Option<&str>,
        location: &Location,
        cancel: &CancellationToken,
    ) -> Option<Redirect> {
        if self.routes.skips_onboarding_check(location) {
            return None;
        }
        let user_id = user_id?;

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(path = %location.path, "Onboarding check cancelled");
                return None;
            }
            read = self.backend.onboarding_profile(user_id) => read,
        };

        // The read may finish in the same poll that the navigation was superseded.
        if cancel.is_cancelled() {
            return None;
        }

        match read {
            Ok(Some(profile)) if profile.needs_resume() => {
                info!(
                    user_id = %user_id,
                    from = %location.path,
                    to = %self.routes.resume_path,
                    "Incomplete onboarding detected, resuming"
                );
                Some(Redirect::replacing(self.routes.resume_path.clone()))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Onboarding profile read failed");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable profile backend shared by tests across modules.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[derive(Clone, Default)]
    pub struct FakeProfiles {
        pub profile: Option<OnboardingProfile>,
        pub delay: Duration,
        pub fail: bool,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeProfiles {
        pub fn returning(profile: OnboardingProfile) -> Self {
            Self {
                profile: Some(profile),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ProfileBackend for FakeProfiles {
        async fn onboarding_profile(
            &self,
            _user_id: &str,
        ) -> Result<Option<OnboardingProfile>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(BackendError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(self.profile.clone())
        }
    }

    pub fn stuck_profile() -> OnboardingProfile {
        OnboardingProfile {
            email_confirmed_at: Some(Utc::now()),
            wallet_address: Some("0xabc".to_string()),
            onboarding_completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::time::Duration;

    fn detector(backend: FakeProfiles) -> OnboardingResumeDetector<FakeProfiles> {
        OnboardingResumeDetector::new(backend, RouteTable::default())
    }

    #[test]
    fn needs_resume_rule() {
        assert!(stuck_profile().needs_resume());

        let mut done = stuck_profile();
        done.onboarding_completed_at = Some(Utc::now());
        assert!(!done.needs_resume());

        let mut no_wallet = stuck_profile();
        no_wallet.wallet_address = None;
        assert!(!no_wallet.needs_resume());

        let mut blank_wallet = stuck_profile();
        blank_wallet.wallet_address = Some("  ".into());
        assert!(!blank_wallet.needs_resume());

        let mut unconfirmed = stuck_profile();
        unconfirmed.email_confirmed_at = None;
        assert!(!unconfirmed.needs_resume());
    }

    #[test]
    fn profile_deserializes_nulls() {
        let profile: OnboardingProfile = serde_json::from_str(
            r#"{"email_confirmed_at":"2026-01-02T03:04:05Z","wallet_address":"0xabc","onboarding_completed_at":null}"#,
        )
        .unwrap();
        assert!(profile.needs_resume());
    }

    #[tokio::test]
    async fn stuck_user_on_dashboard_is_resumed_once() {
        let backend = FakeProfiles::returning(stuck_profile());
        let detector = detector(backend.clone());

        let redirect = detector
            .check(Some("u1"), &"/app/dashboard".into(), &CancellationToken::new())
            .await;

        assert_eq!(redirect, Some(Redirect::replacing("/onboarding/success")));
        assert!(redirect.unwrap().replace);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn onboarding_paths_are_skipped_without_a_read() {
        let backend = FakeProfiles::returning(stuck_profile());
        let detector = detector(backend.clone());

        let redirect = detector
            .check(Some("u1"), &"/onboarding/step-2".into(), &CancellationToken::new())
            .await;
        assert_eq!(redirect, None);

        let redirect = detector
            .check(Some("u1"), &"/auth/callback".into(), &CancellationToken::new())
            .await;
        assert_eq!(redirect, None);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn anonymous_users_are_not_checked() {
        let backend = FakeProfiles::returning(stuck_profile());
        let detector = detector(backend.clone());
        let redirect = detector
            .check(None, &"/app/dashboard".into(), &CancellationToken::new())
            .await;
        assert_eq!(redirect, None);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn read_failure_fails_open() {
        let mut backend = FakeProfiles::returning(stuck_profile());
        backend.fail = true;
        let redirect = detector(backend)
            .check(Some("u1"), &"/app/dashboard".into(), &CancellationToken::new())
            .await;
        assert_eq!(redirect, None);
    }

    #[tokio::test]
    async fn missing_profile_stays() {
        let redirect = detector(FakeProfiles::default())
            .check(Some("u1"), &"/app/dashboard".into(), &CancellationToken::new())
            .await;
        assert_eq!(redirect, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_check_never_redirects() {
        let mut backend = FakeProfiles::returning(stuck_profile());
        backend.delay = Duration::from_secs(5);
        let detector = detector(backend);
        let cancel = CancellationToken::new();
        let location = Location::from("/app/dashboard");

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            }
        };
        let (redirect, ()) = tokio::join!(
            detector.check(Some("u1"), &location, &cancel),
            canceller
        );

        assert_eq!(redirect, None);
    }
}
