// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::device_storage::{IdentityScope, KeyValueStorage};
use crate::gate::AccessSnapshot;
use crate::local_security::LocalSecurityState;
use crate::session::IdentitySessionStore;
use crate::wallet::WalletConnectionState;

/// The independently sourced inputs the gate joins at evaluation time.
#[derive(Clone, Debug)]
pub struct AccessSources {
    pub session: Arc<IdentitySessionStore>,
    pub wallet: Arc<WalletConnectionState>,
    pub local_security: LocalSecurityState,
}

impl AccessSources {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            session: Arc::new(IdentitySessionStore::new()),
            wallet: Arc::new(WalletConnectionState::new()),
            local_security: LocalSecurityState::new(storage),
        }
    }

    /// Scope of the local security flag for the current identity.
    pub fn identity_scope(&self) -> IdentityScope {
        IdentityScope::for_user(self.session.snapshot().user_id())
    }

    /// Read all three sources at once.
    pub fn snapshot(&self) -> AccessSnapshot {
        self.snapshot_at(Utc::now())
    }

    /// Read all three sources, checking capability expiry against `now`.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> AccessSnapshot {
        let session = self.session.snapshot();
        AccessSnapshot {
            wallet: self.wallet.snapshot(),
            local_security: self.local_security.is_configured_for(session.user_id()),
            session,
            now,
        }
    }
}
