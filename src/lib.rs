// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Exchange Access Gate - route access control for the exchange client shell
//!
//! Decides, for every navigation, whether a protected screen may render,
//! and recovers users who abandoned onboarding half way.
//!
//! ## Modules
//!
//! - `session` - Identity session store (backend session, admin capability)
//! - `wallet` - Self-custodied wallet connection state
//! - `local_security` - Per-identity local PIN/biometric flag
//! - `device_storage` - Device-local key-value storage
//! - `gate` - Access basis reducer and route guard
//! - `onboarding` - Onboarding resume detector
//! - `arbiter` - Single serializer of navigation commands
//! - `bridge` - JSON-lines protocol with the native shell
//! - `auth` - Admin capability token verification (JWT/JWKS)
//! - `backend` - Managed backend REST client

pub mod arbiter;
pub mod auth;
pub mod backend;
pub mod bridge;
pub mod config;
pub mod device_storage;
pub mod error;
pub mod gate;
pub mod local_security;
pub mod logging;
pub mod onboarding;
pub mod routes;
pub mod session;
pub mod state;
pub mod wallet;

pub use error::{Error, Result};
