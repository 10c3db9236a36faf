// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Process-level error type.

use crate::auth::AuthError;
use crate::backend::BackendError;
use crate::bridge::BridgeError;
use crate::config::ConfigError;
use crate::device_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("device storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
