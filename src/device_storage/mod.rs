// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Device Storage Module
//!
//! Device-local key-value storage for flags that must survive restarts but
//! never leave the device (local security configuration, legacy keys being
//! cleaned up).
//!
//! ## Backends
//!
//! - [`MemoryStorage`] - process-local map, used by tests and ephemeral shells
//! - [`FileStorage`] - single JSON object on disk, atomic writes via rename
//!
//! ## Key Layout
//!
//! ```text
//! local_security:<sha256(scope)>   # "true" once a PIN/biometric is configured
//! admin_override                   # legacy global key, purged on startup
//! local_security_configured        # legacy global key, migrated to device scope
//! ```
//!
//! Values are plain strings; nothing here is encrypted, so authorization
//! decisions must never rest on these values alone.

pub mod file;
pub mod keys;

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

pub use file::FileStorage;
pub use keys::{IdentityScope, LEGACY_ADMIN_OVERRIDE_KEY, LEGACY_LOCAL_SECURITY_KEY};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    Poisoned,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Minimal string key-value store.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// In-memory storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Interpret a stored flag. Only the literal `"true"` counts.
pub fn flag_is_set(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("true"))
}
