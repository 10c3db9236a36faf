// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Access Gate
//!
//! Decides, per navigation, whether a protected screen renders, shows a
//! placeholder, or redirects.
//!
//! ## Decision Model
//!
//! The three identity sources are reduced to a list of [`AccessBasis`]
//! proofs, and [`decide`] is a pure function of the route family and those
//! proofs:
//!
//! | Route family | Granted by |
//! |--------------|------------|
//! | User area | `WalletProof` or `LocalPinProof` |
//! | Admin area | `ServerSession` with a verified admin capability |
//! | Public | always open |
//!
//! A server session alone does not open the user area: wallet or local PIN
//! is the primary factor there, and email verification is not required.
//!
//! ## Timing
//!
//! - While the session is `Loading` the gate shows a placeholder and makes no
//!   redirect decision
//! - A denial inside the grace period after mount is also a placeholder, so
//!   late-arriving wallet/session state does not bounce the user to login
//! - [`AccessGate::resolve`] waits out both, re-evaluating on every source
//!   change, and yields nothing once unmounted

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::routes::{Location, Redirect, RouteArea, RouteTable};
use crate::session::SessionState;
use crate::state::AccessSources;
use crate::wallet::{WalletAddress, WalletConnection};

/// One independent proof of identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessBasis {
    /// A self-custodied wallet is attached.
    WalletProof { address: Option<WalletAddress> },
    /// Local PIN/biometric is configured for the current identity.
    LocalPinProof,
    /// Backend session; `admin` only from a verified capability.
    ServerSession { user_id: String, admin: bool },
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The route needs no proof.
    Open,
    Granted(AccessBasis),
    Denied,
}

/// Snapshot of all gate inputs, taken at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessSnapshot {
    pub session: SessionState,
    pub wallet: WalletConnection,
    pub local_security: bool,
    /// Wall-clock time the capability expiries are checked against.
    pub now: DateTime<Utc>,
}

impl AccessSnapshot {
    /// Proofs available in this snapshot.
    pub fn bases(&self) -> Vec<AccessBasis> {
        let mut bases = Vec::with_capacity(3);
        if self.wallet.is_connected {
            bases.push(AccessBasis::WalletProof {
                address: self.wallet.address.clone(),
            });
        }
        if self.local_security {
            bases.push(AccessBasis::LocalPinProof);
        }
        if let Some(session) = self.session.session() {
            if let Some(user_id) = &session.user_id {
                bases.push(AccessBasis::ServerSession {
                    user_id: user_id.clone(),
                    admin: session.is_admin_at(self.now),
                });
            }
        }
        bases
    }
}

/// Pure access reducer.
pub fn decide(area: RouteArea, bases: &[AccessBasis]) -> AccessDecision {
    let granting = match area {
        RouteArea::Public => return AccessDecision::Open,
        RouteArea::User => bases.iter().find(|basis| {
            matches!(
                basis,
                AccessBasis::WalletProof { .. } | AccessBasis::LocalPinProof
            )
        }),
        RouteArea::Admin => bases
            .iter()
            .find(|basis| matches!(basis, AccessBasis::ServerSession { admin: true, .. })),
    };

    match granting {
        Some(basis) => AccessDecision::Granted(basis.clone()),
        None => AccessDecision::Denied,
    }
}

/// What the shell should show for a navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    Render,
    /// Blocking placeholder; no decision yet.
    Placeholder,
    Redirect(Redirect),
}

/// Route guard configuration.
#[derive(Debug, Clone)]
pub struct AccessGate {
    routes: RouteTable,
    grace_period: Duration,
}

impl AccessGate {
    pub fn new(routes: RouteTable, grace_period: Duration) -> Self {
        Self {
            routes,
            grace_period,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Evaluate `location` against `snapshot`, `since_mount` after mount.
    pub fn evaluate(
        &self,
        location: &Location,
        snapshot: &AccessSnapshot,
        since_mount: Duration,
    ) -> GateVerdict {
        let area = self.routes.classify(location);
        if area == RouteArea::Public {
            return GateVerdict::Render;
        }
        if snapshot.session.is_loading() {
            return GateVerdict::Placeholder;
        }

        match decide(area, &snapshot.bases()) {
            AccessDecision::Open | AccessDecision::Granted(_) => GateVerdict::Render,
            AccessDecision::Denied if since_mount < self.grace_period => GateVerdict::Placeholder,
            AccessDecision::Denied => GateVerdict::Redirect(self.denial_redirect(area, location)),
        }
    }

    fn denial_redirect(&self, area: RouteArea, location: &Location) -> Redirect {
        match area {
            RouteArea::Admin => Redirect::replacing(self.routes.admin_login_path.clone()),
            _ => Redirect::preserving(self.routes.login_path.clone(), location),
        }
    }

    /// Mount the gate on `location` and wait for a final verdict.
    ///
    /// Re-evaluates whenever a source changes or the grace period ends.
    /// Returns `Render` or `Redirect`, or `None` if `unmount` fires first.
    pub async fn resolve(
        &self,
        location: &Location,
        sources: &AccessSources,
        unmount: &CancellationToken,
    ) -> Option<GateVerdict> {
        let mounted_at = Instant::now();
        let deadline = mounted_at + self.grace_period;

        // Subscribe before the first snapshot so no change slips between them.
        let mut session_rx = sources.session.subscribe();
        let mut wallet_rx = sources.wallet.subscribe();
        let mut security_rx = sources.local_security.subscribe();

        loop {
            if unmount.is_cancelled() {
                return None;
            }

            let snapshot = sources.snapshot();
            let verdict = self.evaluate(location, &snapshot, mounted_at.elapsed());
            if verdict != GateVerdict::Placeholder {
                debug!(path = %location.path, verdict = ?verdict, "Gate settled");
                return Some(verdict);
            }

            let in_grace = Instant::now() < deadline;
            tokio::select! {
                _ = unmount.cancelled() => return None,
                _ = tokio::time::sleep_until(deadline), if in_grace => {}
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                changed = wallet_rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                changed = security_rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}
