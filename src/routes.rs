// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Route Table
//!
//! Classifies client paths into protected route families and names the
//! redirect targets used by the gate and the onboarding detector.
//!
//! ## Route Families
//!
//! | Family | Prefix | Requirement |
//! |--------|--------|-------------|
//! | User area | `/app` | Wallet connection or local security |
//! | Admin area | `/admin` | Server-verified admin capability |
//! | Public | everything else | None |
//!
//! The login pages sit inside the families they serve (`/admin/login`) but
//! are always public so the gate cannot redirect into itself.

use serde::{Deserialize, Serialize};
use url::Url;

/// Base used to normalise relative client paths through `url`.
const LOCATION_BASE: &str = "app://client/";

/// Protected route family a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteArea {
    User,
    Admin,
    Public,
}

/// A client location: normalised path plus the original query/fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<String>,
}

impl Location {
    /// Parse a client href such as `/app/wallet?tab=bsk#history`.
    ///
    /// Dot segments and duplicate slashes are resolved; an unparsable or
    /// cross-origin href collapses to `/`.
    pub fn parse(href: &str) -> Self {
        let trimmed = href.trim();
        let relative = trimmed.trim_start_matches('/');
        let parsed = Url::parse(LOCATION_BASE).and_then(|base| base.join(relative));

        match parsed {
            // Absolute hrefs to another origin never become client locations.
            Ok(url) if url.host_str() == Some("client") => {
                let mut path = collapse_slashes(url.path());
                if path.len() > 1 && path.ends_with('/') {
                    path.pop();
                }
                Self {
                    path,
                    query: url.query().map(str::to_string).filter(|q| !q.is_empty()),
                    fragment: url.fragment().map(str::to_string).filter(|f| !f.is_empty()),
                }
            }
            _ => Self {
                path: "/".to_string(),
                query: None,
                fragment: None,
            },
        }
    }

    /// Full href including query and fragment.
    pub fn href(&self) -> String {
        let mut href = self.path.clone();
        if let Some(query) = &self.query {
            href.push('?');
            href.push_str(query);
        }
        if let Some(fragment) = &self.fragment {
            href.push('#');
            href.push_str(fragment);
        }
        href
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.href())
    }
}

impl From<&str> for Location {
    fn from(value: &str) -> Self {
        Location::parse(value)
    }
}

/// A navigation the shell must perform instead of rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    /// Target path.
    pub to: String,
    /// Original location to return to after login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Location>,
    /// Replace the current history entry instead of pushing.
    pub replace: bool,
}

impl Redirect {
    /// Redirect that keeps the original target for post-login return.
    pub fn preserving(to: impl Into<String>, from: &Location) -> Self {
        Self {
            to: to.into(),
            from: Some(from.clone()),
            replace: true,
        }
    }

    /// Redirect that replaces history with no way back.
    pub fn replacing(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            from: None,
            replace: true,
        }
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if !previous_slash {
                out.push(ch);
            }
            previous_slash = true;
        } else {
            out.push(ch);
            previous_slash = false;
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// `true` if `path` is `prefix` itself or a descendant segment of it.
pub fn is_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Route prefixes and redirect targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    pub login_path: String,
    pub admin_login_path: String,
    pub resume_path: String,
    pub user_prefixes: Vec<String>,
    pub admin_prefixes: Vec<String>,
    /// Paths the onboarding detector never evaluates.
    pub onboarding_prefix: String,
    pub auth_prefix: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            admin_login_path: "/admin/login".to_string(),
            resume_path: "/onboarding/success".to_string(),
            user_prefixes: vec!["/app".to_string()],
            admin_prefixes: vec!["/admin".to_string()],
            onboarding_prefix: "/onboarding".to_string(),
            auth_prefix: "/auth".to_string(),
        }
    }
}

impl RouteTable {
    /// Classify a location into its route family.
    pub fn classify(&self, location: &Location) -> RouteArea {
        let path = location.path.as_str();

        if path == self.login_path || path == self.admin_login_path {
            return RouteArea::Public;
        }
        if self.admin_prefixes.iter().any(|p| is_under(path, p)) {
            return RouteArea::Admin;
        }
        if self.user_prefixes.iter().any(|p| is_under(path, p)) {
            return RouteArea::User;
        }
        RouteArea::Public
    }

    /// Onboarding and auth screens are never overridden by the detector.
    pub fn skips_onboarding_check(&self, location: &Location) -> bool {
        is_under(&location.path, &self.onboarding_prefix)
            || is_under(&location.path, &self.auth_prefix)
            || location.path == self.login_path
            || location.path == self.admin_login_path
    }
}
