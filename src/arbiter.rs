// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Navigation Arbiter
//!
//! The single task allowed to tell the shell what to show. It serialises
//! route changes, access-gate decisions, and onboarding-resume redirects
//! into one ordered stream of [`NavigationCommand`]s.
//!
//! ## Per Navigation
//!
//! 1. Evaluate the gate; if undecided, emit `Placeholder` and wait
//! 2. On a gate redirect, emit it and stop
//! 3. On render, emit `Render`, then run the onboarding detector and emit
//!    its redirect, if any
//!
//! A newer route change, or a change of session user id, drops the
//! in-flight navigation, so a superseded grace wait or profile read can
//! never emit anything. Once a route is rendered, losing its access basis
//! redirects: a wallet disconnect, a cleared PIN, a refreshed token without
//! the admin role, or the admin capability reaching its expiry.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::gate::{AccessGate, GateVerdict};
use crate::onboarding::{OnboardingResumeDetector, ProfileBackend};
use crate::routes::{Location, Redirect};
use crate::state::AccessSources;

/// Instruction sent to the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum NavigationCommand {
    /// Show the blocking placeholder for `location`.
    Placeholder { location: Location },
    Render { location: Location },
    Redirect(Redirect),
}

type InFlight<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Route-change serializer.
#[derive(Debug)]
pub struct NavigationArbiter<P> {
    gate: AccessGate,
    detector: OnboardingResumeDetector<P>,
    sources: AccessSources,
}

impl<P: ProfileBackend> NavigationArbiter<P> {
    pub fn new(
        gate: AccessGate,
        detector: OnboardingResumeDetector<P>,
        sources: AccessSources,
    ) -> Self {
        Self {
            gate,
            detector,
            sources,
        }
    }

    /// Consume route changes until `shutdown` fires or `routes` closes.
    pub async fn run(
        &self,
        mut routes: mpsc::Receiver<Location>,
        commands: mpsc::Sender<NavigationCommand>,
        shutdown: CancellationToken,
    ) {
        let mut session_rx = self.sources.session.subscribe();
        let mut wallet_rx = self.sources.wallet.subscribe();
        let mut security_rx = self.sources.local_security.subscribe();

        let mut user_id = self.current_user();
        let mut location: Option<Location> = None;
        let mut cancel = shutdown.child_token();
        // Set by the in-flight navigation as soon as it emits `Render`.
        let rendered = AtomicBool::new(false);
        let mut expiry_handled: Option<DateTime<Utc>> = None;
        let mut in_flight: Option<InFlight<'_>> = None;

        info!("Navigation arbiter started");

        loop {
            let admin_until = self
                .admin_until()
                .filter(|until| Some(*until) != expiry_handled);
            let until_expiry =
                admin_until.map(|until| (until - Utc::now()).to_std().unwrap_or(Duration::ZERO));
            let mut recheck_at: Option<DateTime<Utc>> = None;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Navigation arbiter shutting down");
                    break;
                }
                route = routes.recv() => {
                    let Some(next) = route else {
                        info!("Route channel closed, stopping navigation arbiter");
                        break;
                    };
                    cancel.cancel();
                    cancel = shutdown.child_token();
                    rendered.store(false, Ordering::SeqCst);
                    location = Some(next.clone());
                    in_flight = Some(self.start(next, cancel.clone(), &rendered, &commands));
                }
                Ok(()) = session_rx.changed() => {
                    let current = self.current_user();
                    if current == user_id {
                        recheck_at = Some(Utc::now());
                    } else {
                        debug!(from = ?user_id, to = ?current, "Session identity changed");
                        user_id = current;
                        if let Some(id) = user_id.as_deref() {
                            if let Err(e) = self.sources.local_security.adopt_device_flag(id) {
                                warn!(error = %e, "Failed to adopt device local security");
                            }
                        }
                        if let Some(current_location) = location.clone() {
                            cancel.cancel();
                            cancel = shutdown.child_token();
                            rendered.store(false, Ordering::SeqCst);
                            in_flight = Some(self.start(
                                current_location,
                                cancel.clone(),
                                &rendered,
                                &commands,
                            ));
                        }
                    }
                }
                Ok(()) = wallet_rx.changed() => recheck_at = Some(Utc::now()),
                Ok(()) = security_rx.changed() => recheck_at = Some(Utc::now()),
                _ = tokio::time::sleep(until_expiry.unwrap_or_default()), if until_expiry.is_some() => {
                    expiry_handled = admin_until;
                    // The wall clock may lag the timer by a few milliseconds.
                    recheck_at = admin_until.map(|until| until.max(Utc::now()));
                }
                _ = async {
                    match in_flight.as_mut() {
                        Some(navigation) => navigation.await,
                        None => std::future::pending().await,
                    }
                }, if in_flight.is_some() => {
                    in_flight = None;
                }
            }

            let Some(now) = recheck_at else {
                continue;
            };
            if let Some(redirect) = self.revoked(location.as_ref(), &rendered, now) {
                cancel.cancel();
                in_flight = None;
                if !emit(&commands, NavigationCommand::Redirect(redirect)).await {
                    break;
                }
            }
        }

        cancel.cancel();
    }

    fn current_user(&self) -> Option<String> {
        self.sources.session.snapshot().user_id().map(str::to_owned)
    }

    fn admin_until(&self) -> Option<DateTime<Utc>> {
        self.sources
            .session
            .snapshot()
            .session()
            .and_then(|session| session.admin_until)
    }

    fn start<'a>(
        &'a self,
        location: Location,
        cancel: CancellationToken,
        rendered: &'a AtomicBool,
        commands: &'a mpsc::Sender<NavigationCommand>,
    ) -> InFlight<'a> {
        let span = info_span!("navigation", nav_id = %Uuid::new_v4(), path = %location.path);
        Box::pin(
            self.navigate(location, cancel, rendered, commands)
                .instrument(span),
        )
    }

    /// Drive one navigation to its final command.
    async fn navigate(
        &self,
        location: Location,
        cancel: CancellationToken,
        rendered: &AtomicBool,
        commands: &mpsc::Sender<NavigationCommand>,
    ) {
        let verdict = match self
            .gate
            .evaluate(&location, &self.sources.snapshot(), Duration::ZERO)
        {
            GateVerdict::Placeholder => {
                let placeholder = NavigationCommand::Placeholder {
                    location: location.clone(),
                };
                if !emit(commands, placeholder).await {
                    return;
                }
                match self.gate.resolve(&location, &self.sources, &cancel).await {
                    Some(verdict) => verdict,
                    None => {
                        debug!("Navigation superseded while waiting on access");
                        return;
                    }
                }
            }
            verdict => verdict,
        };

        match verdict {
            GateVerdict::Redirect(redirect) => {
                info!(to = %redirect.to, "Access denied, redirecting");
                emit(commands, NavigationCommand::Redirect(redirect)).await;
            }
            GateVerdict::Placeholder => {}
            GateVerdict::Render => {
                let render = NavigationCommand::Render {
                    location: location.clone(),
                };
                if !emit(commands, render).await {
                    return;
                }
                rendered.store(true, Ordering::SeqCst);

                let user_id = self.current_user();
                if let Some(redirect) = self
                    .detector
                    .check(user_id.as_deref(), &location, &cancel)
                    .await
                {
                    rendered.store(false, Ordering::SeqCst);
                    emit(commands, NavigationCommand::Redirect(redirect)).await;
                }
            }
        }
    }

    /// Redirect for a rendered route whose access basis is gone at `now`.
    fn revoked(
        &self,
        location: Option<&Location>,
        rendered: &AtomicBool,
        now: DateTime<Utc>,
    ) -> Option<Redirect> {
        if !rendered.load(Ordering::SeqCst) {
            return None;
        }
        let location = location?;
        let settled = self.gate.grace_period();
        match self
            .gate
            .evaluate(location, &self.sources.snapshot_at(now), settled)
        {
            GateVerdict::Redirect(redirect) => {
                info!(path = %location.path, to = %redirect.to, "Access revoked, redirecting");
                rendered.store(false, Ordering::SeqCst);
                Some(redirect)
            }
            _ => None,
        }
    }
}

async fn emit(commands: &mpsc::Sender<NavigationCommand>, command: NavigationCommand) -> bool {
    debug!(command = ?command, "Emitting navigation command");
    if commands.send(command).await.is_err() {
        debug!("Command channel closed");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_storage::{IdentityScope, MemoryStorage};
    use crate::onboarding::testing::{stuck_profile, FakeProfiles};
    use crate::routes::RouteTable;
    use crate::session::testing::{envelope, FakeVerifier};
    use crate::session::AuthEvent;
    use crate::wallet::WalletAddress;
    use std::sync::Arc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(30);

    struct Harness {
        sources: AccessSources,
        routes: mpsc::Sender<Location>,
        commands: mpsc::Receiver<NavigationCommand>,
        shutdown: CancellationToken,
    }

    impl Harness {
        fn start(profiles: FakeProfiles) -> Self {
            let sources = AccessSources::new(Arc::new(MemoryStorage::new()));
            let table = RouteTable::default();
            let arbiter = Arc::new(NavigationArbiter::new(
                AccessGate::new(table.clone(), Duration::from_secs(1)),
                OnboardingResumeDetector::new(profiles, table),
                sources.clone(),
            ));

            let (routes, routes_rx) = mpsc::channel(8);
            let (commands_tx, commands) = mpsc::channel(8);
            let shutdown = CancellationToken::new();

            let token = shutdown.clone();
            tokio::spawn(async move { arbiter.run(routes_rx, commands_tx, token).await });

            Self {
                sources,
                routes,
                commands,
                shutdown,
            }
        }

        async fn navigate(&self, href: &str) {
            self.routes.send(Location::parse(href)).await.unwrap();
        }

        async fn next(&mut self) -> NavigationCommand {
            timeout(WAIT, self.commands.recv())
                .await
                .expect("no command emitted")
                .expect("arbiter stopped")
        }

        async fn assert_quiet(&mut self) {
            let next = timeout(WAIT, self.commands.recv()).await;
            assert!(next.is_err(), "unexpected command: {next:?}");
        }

        async fn sign_in(&self, user: &str) {
            self.sources
                .session
                .apply(AuthEvent::SignedIn(envelope(user, "user")), &FakeVerifier)
                .await;
        }

        async fn sign_out(&self) {
            self.sources
                .session
                .apply(AuthEvent::SignedOut, &FakeVerifier)
                .await;
        }
    }

    fn render(href: &str) -> NavigationCommand {
        NavigationCommand::Render {
            location: Location::parse(href),
        }
    }

    fn placeholder(href: &str) -> NavigationCommand {
        NavigationCommand::Placeholder {
            location: Location::parse(href),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn granted_route_renders_immediately() {
        let mut harness = Harness::start(FakeProfiles::default());
        harness.sign_out().await;
        harness.sources.wallet.connect(WalletAddress::from("0xabc"));

        harness.navigate("/app/dashboard").await;
        assert_eq!(harness.next().await, render("/app/dashboard"));
        harness.assert_quiet().await;
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_until_session_hydrates() {
        let mut harness = Harness::start(FakeProfiles::default());
        harness.sources.wallet.connect(WalletAddress::from("0xabc"));

        harness.navigate("/app/dashboard").await;
        assert_eq!(harness.next().await, placeholder("/app/dashboard"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        harness.sign_out().await;
        assert_eq!(harness.next().await, render("/app/dashboard"));
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn denied_route_redirects_after_grace() {
        let mut harness = Harness::start(FakeProfiles::default());
        harness.sign_out().await;

        harness.navigate("/app/transfer?asset=BSK").await;
        assert_eq!(harness.next().await, placeholder("/app/transfer?asset=BSK"));
        match harness.next().await {
            NavigationCommand::Redirect(redirect) => {
                assert_eq!(redirect.to, "/login");
                assert_eq!(
                    redirect.from.map(|from| from.href()).as_deref(),
                    Some("/app/transfer?asset=BSK")
                );
            }
            other => panic!("expected redirect, got {other:?}"),
        }
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_navigation_never_redirects() {
        let mut harness = Harness::start(FakeProfiles::default());
        harness.sign_out().await;

        harness.navigate("/app/dashboard").await;
        assert_eq!(harness.next().await, placeholder("/app/dashboard"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        harness.navigate("/").await;
        assert_eq!(harness.next().await, render("/"));
        harness.assert_quiet().await;
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_user_is_resumed_once() {
        let profiles = FakeProfiles::returning(stuck_profile());
        let mut harness = Harness::start(profiles.clone());
        harness.sign_in("u1").await;
        harness.sources.wallet.connect(WalletAddress::from("0xabc"));

        harness.navigate("/app/dashboard").await;
        assert_eq!(harness.next().await, render("/app/dashboard"));
        assert_eq!(
            harness.next().await,
            NavigationCommand::Redirect(Redirect::replacing("/onboarding/success"))
        );

        harness.navigate("/onboarding/success").await;
        assert_eq!(harness.next().await, render("/onboarding/success"));
        harness.assert_quiet().await;
        assert_eq!(profiles.calls(), 1);
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_profile_read_is_dropped() {
        let mut profiles = FakeProfiles::returning(stuck_profile());
        profiles.delay = Duration::from_secs(5);
        let mut harness = Harness::start(profiles);
        harness.sign_in("u1").await;
        harness.sources.wallet.connect(WalletAddress::from("0xabc"));

        harness.navigate("/app/dashboard").await;
        assert_eq!(harness.next().await, render("/app/dashboard"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        harness.navigate("/onboarding").await;
        assert_eq!(harness.next().await, render("/onboarding"));
        harness.assert_quiet().await;
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn wallet_disconnect_revokes_rendered_route() {
        let mut harness = Harness::start(FakeProfiles::default());
        harness.sign_out().await;
        harness.sources.wallet.connect(WalletAddress::from("0xabc"));

        harness.navigate("/app/dashboard").await;
        assert_eq!(harness.next().await, render("/app/dashboard"));

        tokio::time::sleep(Duration::from_millis(10)).await;
        harness.sources.wallet.disconnect();
        match harness.next().await {
            NavigationCommand::Redirect(redirect) => assert_eq!(redirect.to, "/login"),
            other => panic!("expected redirect, got {other:?}"),
        }
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn signing_in_as_admin_reevaluates_current_route() {
        let mut harness = Harness::start(FakeProfiles::default());
        harness.sign_out().await;

        harness.navigate("/admin/users").await;
        assert_eq!(harness.next().await, placeholder("/admin/users"));

        harness
            .sources
            .session
            .apply(AuthEvent::SignedIn(envelope("u9", "admin")), &FakeVerifier)
            .await;
        assert_eq!(harness.next().await, render("/admin/users"));
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn wallet_disconnect_during_profile_read_redirects() {
        let mut profiles = FakeProfiles::default();
        profiles.delay = Duration::from_secs(5);
        let mut harness = Harness::start(profiles);
        harness.sign_in("u1").await;
        harness.sources.wallet.connect(WalletAddress::from("0xabc"));

        harness.navigate("/app/dashboard").await;
        assert_eq!(harness.next().await, render("/app/dashboard"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        harness.sources.wallet.disconnect();
        match harness.next().await {
            NavigationCommand::Redirect(redirect) => assert_eq!(redirect.to, "/login"),
            other => panic!("expected redirect, got {other:?}"),
        }
        harness.assert_quiet().await;
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_without_admin_role_leaves_admin_route() {
        let mut harness = Harness::start(FakeProfiles::default());
        harness
            .sources
            .session
            .apply(AuthEvent::SignedIn(envelope("u9", "admin")), &FakeVerifier)
            .await;

        harness.navigate("/admin/users").await;
        assert_eq!(harness.next().await, render("/admin/users"));

        tokio::time::sleep(Duration::from_millis(10)).await;
        harness
            .sources
            .session
            .apply(AuthEvent::TokenRefreshed(envelope("u9", "user")), &FakeVerifier)
            .await;
        assert_eq!(
            harness.next().await,
            NavigationCommand::Redirect(Redirect::replacing("/admin/login"))
        );
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn admin_route_closes_when_capability_expires() {
        let mut harness = Harness::start(FakeProfiles::default());
        harness
            .sources
            .session
            .apply(
                AuthEvent::SignedIn(envelope("u9", "admin-expiring")),
                &FakeVerifier,
            )
            .await;

        harness.navigate("/admin/users").await;
        assert_eq!(harness.next().await, render("/admin/users"));
        assert_eq!(
            harness.next().await,
            NavigationCommand::Redirect(Redirect::replacing("/admin/login"))
        );
        harness.assert_quiet().await;
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn device_pin_keeps_route_open_across_sign_in() {
        let mut harness = Harness::start(FakeProfiles::default());
        harness.sign_out().await;
        harness
            .sources
            .local_security
            .mark_configured(&IdentityScope::Device)
            .unwrap();

        harness.navigate("/app/dashboard").await;
        assert_eq!(harness.next().await, render("/app/dashboard"));

        tokio::time::sleep(Duration::from_millis(10)).await;
        harness.sign_in("u1").await;
        assert_eq!(harness.next().await, render("/app/dashboard"));
        harness.assert_quiet().await;
        assert!(harness
            .sources
            .local_security
            .is_configured(&IdentityScope::User("u1".into())));
        harness.shutdown.cancel();
    }

    #[test]
    fn commands_serialize_with_tag() {
        let json = serde_json::to_value(NavigationCommand::Redirect(Redirect::replacing("/login")))
            .unwrap();
        assert_eq!(json["command"], "redirect");
        assert_eq!(json["to"], "/login");
        assert_eq!(json["replace"], true);

        let json = serde_json::to_value(render("/app")).unwrap();
        assert_eq!(json["command"], "render");
        assert_eq!(json["location"]["path"], "/app");
    }
}
