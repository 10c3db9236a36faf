// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Local Security State
//!
//! Reads and writes the device-local "PIN/biometric configured" flag. The
//! flag is an offline authentication factor for the user area, independent
//! of network identity.
//!
//! ## Scoping
//!
//! Flags are stored per identity (see [`IdentityScope`]). The legacy global
//! flag is migrated into the device scope once by [`LocalSecurityState::purge_legacy`],
//! which also deletes the legacy admin override key.
//!
//! A device-scoped flag (set before sign-in, while the session was still
//! loading, or migrated from the legacy key) belongs to the first user who
//! signs in on the device: it counts for that user on read and is moved into
//! their scope by [`LocalSecurityState::adopt_device_flag`].
//!
//! ## Failure Handling
//!
//! Storage read failures are logged and treated as "flag absent"; they never
//! surface to the gate.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::device_storage::{
    flag_is_set, IdentityScope, KeyValueStorage, StorageResult, LEGACY_ADMIN_OVERRIDE_KEY,
    LEGACY_LOCAL_SECURITY_KEY,
};

const FLAG_SET: &str = "true";

/// Result of a legacy key cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyCleanup {
    /// The admin override key existed and was removed.
    pub admin_override_removed: bool,
    /// The global local security flag was moved into the device scope.
    pub local_security_migrated: bool,
}

/// Device-local security flag reader/writer.
#[derive(Clone)]
pub struct LocalSecurityState {
    storage: Arc<dyn KeyValueStorage>,
    // Bumped on every write so gates waiting out their grace period re-evaluate.
    revision: Arc<watch::Sender<u64>>,
}

impl std::fmt::Debug for LocalSecurityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSecurityState")
            .field("revision", &*self.revision.borrow())
            .finish_non_exhaustive()
    }
}

impl LocalSecurityState {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            storage,
            revision: Arc::new(tx),
        }
    }

    /// Whether local security is configured for `scope`.
    pub fn is_configured(&self, scope: &IdentityScope) -> bool {
        match self.storage.get(&scope.local_security_key()) {
            Ok(value) => flag_is_set(value.as_deref()),
            Err(e) => {
                warn!(scope = %scope, error = %e, "Local security flag read failed, treating as absent");
                false
            }
        }
    }

    /// Whether local security holds for `user_id`, or for the device when
    /// nobody is signed in. A device flag still counts after sign-in.
    pub fn is_configured_for(&self, user_id: Option<&str>) -> bool {
        let scope = IdentityScope::for_user(user_id);
        self.is_configured(&scope)
            || (scope != IdentityScope::Device && self.is_configured(&IdentityScope::Device))
    }

    /// Move a device-scoped flag into `user_id`'s scope.
    ///
    /// Returns `true` if a flag was adopted.
    pub fn adopt_device_flag(&self, user_id: &str) -> StorageResult<bool> {
        if !self.is_configured(&IdentityScope::Device) {
            return Ok(false);
        }
        let user = IdentityScope::User(user_id.to_string());
        self.storage.set(&user.local_security_key(), FLAG_SET)?;
        self.storage.remove(&IdentityScope::Device.local_security_key())?;
        info!(scope = %user, "Device local security adopted by signed-in user");
        self.bump();
        Ok(true)
    }

    /// Clear every flag that counts for `user_id` (see [`Self::is_configured_for`]).
    pub fn clear_for(&self, user_id: Option<&str>) -> StorageResult<()> {
        let scope = IdentityScope::for_user(user_id);
        if scope != IdentityScope::Device {
            self.storage
                .remove(&IdentityScope::Device.local_security_key())?;
        }
        self.clear(&scope)
    }

    /// Record that local security was set up for `scope`.
    pub fn mark_configured(&self, scope: &IdentityScope) -> StorageResult<()> {
        self.storage.set(&scope.local_security_key(), FLAG_SET)?;
        info!(scope = %scope, "Local security configured");
        self.bump();
        Ok(())
    }

    /// Clear the flag for `scope` (user action or security cleanup).
    pub fn clear(&self, scope: &IdentityScope) -> StorageResult<()> {
        self.storage.remove(&scope.local_security_key())?;
        info!(scope = %scope, "Local security cleared");
        self.bump();
        Ok(())
    }

    /// Remove the legacy admin override and migrate the legacy global flag.
    pub fn purge_legacy(&self) -> StorageResult<LegacyCleanup> {
        let mut cleanup = LegacyCleanup::default();

        if let Some(value) = self.storage.get(LEGACY_ADMIN_OVERRIDE_KEY)? {
            if flag_is_set(Some(&value)) {
                warn!("Legacy admin override flag found on device; it is ignored and will be removed");
            }
            self.storage.remove(LEGACY_ADMIN_OVERRIDE_KEY)?;
            cleanup.admin_override_removed = true;
        }

        if let Some(value) = self.storage.get(LEGACY_LOCAL_SECURITY_KEY)? {
            if flag_is_set(Some(&value)) {
                self.storage
                    .set(&IdentityScope::Device.local_security_key(), FLAG_SET)?;
                cleanup.local_security_migrated = true;
            }
            self.storage.remove(LEGACY_LOCAL_SECURITY_KEY)?;
        }

        if cleanup != LegacyCleanup::default() {
            info!(
                admin_override_removed = cleanup.admin_override_removed,
                local_security_migrated = cleanup.local_security_migrated,
                "Legacy device keys cleaned up"
            );
            self.bump();
        }

        Ok(cleanup)
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_storage::{MemoryStorage, StorageError};

    /// Storage whose reads always fail.
    struct BrokenStorage;

    impl KeyValueStorage for BrokenStorage {
        fn get(&self, _key: &str) -> StorageResult<Option<String>> {
            Err(StorageError::Io(std::io::Error::other("disk gone")))
        }
        fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
            Err(StorageError::Io(std::io::Error::other("disk gone")))
        }
        fn remove(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }
    }

    fn memory_state() -> (LocalSecurityState, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (LocalSecurityState::new(storage.clone()), storage)
    }

    #[test]
    fn flag_is_scoped_per_identity() {
        let (state, _) = memory_state();
        let alice = IdentityScope::User("alice".into());
        let bob = IdentityScope::User("bob".into());

        state.mark_configured(&alice).unwrap();

        assert!(state.is_configured(&alice));
        assert!(!state.is_configured(&bob));
        assert!(!state.is_configured(&IdentityScope::Device));

        state.clear(&alice).unwrap();
        assert!(!state.is_configured(&alice));
    }

    #[test]
    fn read_failure_is_treated_as_absent() {
        let state = LocalSecurityState::new(Arc::new(BrokenStorage));
        assert!(!state.is_configured(&IdentityScope::Device));
    }

    #[test]
    fn purge_removes_admin_override_without_granting_anything() {
        let (state, storage) = memory_state();
        storage.set(LEGACY_ADMIN_OVERRIDE_KEY, "true").unwrap();

        let cleanup = state.purge_legacy().unwrap();

        assert!(cleanup.admin_override_removed);
        assert!(!cleanup.local_security_migrated);
        assert_eq!(storage.get(LEGACY_ADMIN_OVERRIDE_KEY).unwrap(), None);
        assert!(!state.is_configured(&IdentityScope::Device));
    }

    #[test]
    fn purge_migrates_legacy_flag_to_device_scope_once() {
        let (state, storage) = memory_state();
        storage.set(LEGACY_LOCAL_SECURITY_KEY, "true").unwrap();

        let first = state.purge_legacy().unwrap();
        assert!(first.local_security_migrated);
        assert!(state.is_configured(&IdentityScope::Device));
        assert_eq!(storage.get(LEGACY_LOCAL_SECURITY_KEY).unwrap(), None);

        let second = state.purge_legacy().unwrap();
        assert_eq!(second, LegacyCleanup::default());
    }

    #[test]
    fn purge_drops_unset_legacy_flag_without_migrating() {
        let (state, storage) = memory_state();
        storage.set(LEGACY_LOCAL_SECURITY_KEY, "false").unwrap();

        let cleanup = state.purge_legacy().unwrap();
        assert!(!cleanup.local_security_migrated);
        assert!(!state.is_configured(&IdentityScope::Device));
        assert_eq!(storage.get(LEGACY_LOCAL_SECURITY_KEY).unwrap(), None);
    }

    #[test]
    fn device_flag_counts_for_first_signed_in_user() {
        let (state, _) = memory_state();
        state.mark_configured(&IdentityScope::Device).unwrap();

        assert!(state.is_configured_for(None));
        assert!(state.is_configured_for(Some("alice")));

        assert!(state.adopt_device_flag("alice").unwrap());
        assert!(state.is_configured(&IdentityScope::User("alice".into())));
        assert!(!state.is_configured(&IdentityScope::Device));
        assert!(state.is_configured_for(Some("alice")));
        assert!(!state.is_configured_for(Some("bob")));
        assert!(!state.adopt_device_flag("bob").unwrap());
    }

    #[test]
    fn legacy_flag_survives_sign_in() {
        let (state, storage) = memory_state();
        storage.set(LEGACY_LOCAL_SECURITY_KEY, "true").unwrap();
        state.purge_legacy().unwrap();

        assert!(state.is_configured_for(Some("alice")));
    }

    #[test]
    fn clear_for_user_also_clears_device_flag() {
        let (state, _) = memory_state();
        state.mark_configured(&IdentityScope::Device).unwrap();
        state
            .mark_configured(&IdentityScope::User("alice".into()))
            .unwrap();

        state.clear_for(Some("alice")).unwrap();
        assert!(!state.is_configured_for(Some("alice")));
        assert!(!state.is_configured_for(None));
    }

    #[test]
    fn writes_bump_revision() {
        let (state, _) = memory_state();
        let rx = state.subscribe();

        state.mark_configured(&IdentityScope::Device).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), 1);
    }
}
