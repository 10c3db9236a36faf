// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wallet Connection State
//!
//! Tracks whether a self-custodied wallet is attached to the current client
//! context. This is independent of the backend session: a connected wallet is
//! an authentication factor on its own for the user area.
//!
//! The state is not persisted. The wallet provider (browser extension or
//! in-app wallet) reports connect/disconnect events through the bridge and the
//! gate reads snapshots.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Ethereum-compatible wallet address wrapper.
///
/// `From` conversions are unchecked; use [`WalletAddress::parse`] for input
/// that must be a well-formed `0x` + 40 hex address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalletAddress(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid wallet address: {0}")]
pub struct InvalidWalletAddress(pub String);

impl WalletAddress {
    /// Parse and validate an address.
    pub fn parse(value: &str) -> Result<Self, InvalidWalletAddress> {
        let trimmed = value.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| InvalidWalletAddress(value.to_string()))?;

        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidWalletAddress(value.to_string()));
        }
        Ok(WalletAddress(format!("0x{hex}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WalletAddress {
    fn from(value: String) -> Self {
        WalletAddress(value)
    }
}

impl From<&str> for WalletAddress {
    fn from(value: &str) -> Self {
        WalletAddress(value.to_string())
    }
}

/// Snapshot of the wallet attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConnection {
    pub address: Option<WalletAddress>,
    pub is_connected: bool,
}

impl WalletConnection {
    pub fn connected(address: impl Into<WalletAddress>) -> Self {
        Self {
            address: Some(address.into()),
            is_connected: true,
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }
}

/// Owner of the wallet connection snapshot.
///
/// Only the wallet provider side mutates it; readers take snapshots or
/// subscribe for changes.
#[derive(Debug)]
pub struct WalletConnectionState {
    tx: watch::Sender<WalletConnection>,
}

impl Default for WalletConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletConnectionState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(WalletConnection::disconnected());
        Self { tx }
    }

    pub fn snapshot(&self) -> WalletConnection {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletConnection> {
        self.tx.subscribe()
    }

    /// Record a wallet attachment. Reconnecting the same address is a no-op.
    pub fn connect(&self, address: WalletAddress) {
        let next = WalletConnection::connected(address.clone());
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if changed {
            info!(address = %address, "Wallet connected");
        }
    }

    pub fn disconnect(&self) {
        let changed = self.tx.send_if_modified(|current| {
            if current.is_connected || current.address.is_some() {
                *current = WalletConnection::disconnected();
                true
            } else {
                false
            }
        });
        if changed {
            info!("Wallet disconnected");
        }
    }
}
