// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key names and identity scoping for device storage.

use sha2::{Digest, Sha256};

/// Legacy global admin override. Never trusted, only purged.
pub const LEGACY_ADMIN_OVERRIDE_KEY: &str = "admin_override";

/// Legacy global (unscoped) local security flag.
pub const LEGACY_LOCAL_SECURITY_KEY: &str = "local_security_configured";

const LOCAL_SECURITY_PREFIX: &str = "local_security";

/// Identity a device-local flag belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityScope {
    /// Backend user with a server session.
    User(String),
    /// No server identity yet; the device itself.
    Device,
}

impl IdentityScope {
    /// Scope for an optional backend user id.
    pub fn for_user(user_id: Option<&str>) -> Self {
        match user_id {
            Some(id) if !id.is_empty() => IdentityScope::User(id.to_string()),
            _ => IdentityScope::Device,
        }
    }

    fn label(&self) -> String {
        match self {
            IdentityScope::User(id) => format!("user:{id}"),
            IdentityScope::Device => "device".to_string(),
        }
    }

    /// Storage key for this scope's local security flag.
    ///
    /// The identifier is hashed so raw user ids are not written to disk.
    pub fn local_security_key(&self) -> String {
        let digest = Sha256::digest(self.label().as_bytes());
        format!("{LOCAL_SECURITY_PREFIX}:{digest:x}")
    }
}

impl std::fmt::Display for IdentityScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityScope::User(_) => write!(f, "user"),
            IdentityScope::Device => write!(f, "device"),
        }
    }
}
