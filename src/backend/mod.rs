// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Managed Backend Client
//!
//! The hosted backend owns identity and onboarding state. This module talks
//! to it over HTTPS:
//!
//! - `GET /auth/v1/user` - current session for an access token
//! - `GET /rest/v1/profiles` - onboarding profile keyed by user id
//!
//! Both calls are read-only. Auth events (sign-in, refresh, sign-out) are
//! reported by the shell and fanned out to subscribers from here.

pub mod rest;

pub use rest::RestBackend;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid backend URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("unexpected backend payload: {0}")]
    Decode(String),
}
