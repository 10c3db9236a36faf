// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account roles carried in access tokens.

use serde::{Deserialize, Serialize};

/// Account roles for back-office authorization.
///
/// ## Role Hierarchy
///
/// - `Admin` - Full back-office access
/// - `Support` - Read-only back-office screens
/// - `User` - Regular exchange customer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Support,
    /// Default role (least privilege).
    #[default]
    User,
}

impl Role {
    /// Check if this role has at least the privileges of the required role.
    pub fn has_privilege(&self, required: Role) -> bool {
        match (self, required) {
            (Role::Admin, _) => true,
            (Role::Support, Role::Support | Role::User) => true,
            (Role::User, Role::User) => true,
            _ => false,
        }
    }

    /// Parse a role claim (case-insensitive). Unknown roles are `None`.
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "support" => Some(Role::Support),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Support => write!(f, "support"),
            Role::User => write!(f, "user"),
        }
    }
}
