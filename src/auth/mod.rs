// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Admin Capability Module
//!
//! Decides whether a session carries admin privileges. The decision is made
//! only from the backend-issued access token, never from device state.
//!
//! ## Verification Flow
//!
//! 1. The backend auth subsystem issues an access token on sign-in/refresh
//! 2. The session store hands the token to a [`CapabilityVerifier`]
//! 3. [`JwtCapabilityVerifier`]:
//!    - Resolves the signing key (backend JWKS, or a shared secret for HS256)
//!    - Verifies signature, expiry, issuer and audience
//!    - Requires `sub` to equal the session user id
//!    - Extracts the role from `app_metadata.role`
//!
//! ## Security
//!
//! - The legacy device-stored admin override is never consulted
//! - JWKS is fetched over HTTPS and cached with a TTL
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod error;
pub mod jwks;
pub mod roles;
pub mod verifier;

pub use claims::{AccessTokenClaims, AdminCapability};
pub use error::AuthError;
pub use jwks::JwksManager;
pub use roles::Role;
pub use verifier::{CapabilityVerifier, JwtCapabilityVerifier, KeySource};
