// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Native Shell Bridge
//!
//! JSON-lines protocol spoken with the native mobile shell over
//! stdin/stdout. One JSON object per line in each direction.
//!
//! ## Inbound
//!
//! ```json
//! {"type":"route_changed","path":"/app/wallet?tab=bsk"}
//! {"type":"wallet_connected","address":"0x..."}
//! {"type":"signed_in","access_token":"eyJ..."}
//! ```
//!
//! ## Outbound
//!
//! Serialized [`NavigationCommand`]s, tagged by `command`.
//!
//! A line that fails to parse or apply is logged and skipped; only I/O
//! errors stop the bridge.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arbiter::NavigationCommand;
use crate::backend::{BackendError, RestBackend};
use crate::device_storage::StorageError;
use crate::routes::Location;
use crate::state::AccessSources;
use crate::wallet::{InvalidWalletAddress, WalletAddress};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bridge message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidAddress(#[from] InvalidWalletAddress),

    #[error("device storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("navigation arbiter is gone")]
    Closed,
}

/// Message from the shell.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    RouteChanged { path: String },
    WalletConnected { address: String },
    WalletDisconnected,
    LocalSecurityConfigured,
    LocalSecurityCleared,
    SignedIn { access_token: String },
    TokenRefreshed { access_token: String },
    SignedOut,
}

impl std::fmt::Debug for BridgeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeEvent::RouteChanged { path } => {
                f.debug_struct("RouteChanged").field("path", path).finish()
            }
            BridgeEvent::WalletConnected { address } => f
                .debug_struct("WalletConnected")
                .field("address", address)
                .finish(),
            BridgeEvent::WalletDisconnected => f.write_str("WalletDisconnected"),
            BridgeEvent::LocalSecurityConfigured => f.write_str("LocalSecurityConfigured"),
            BridgeEvent::LocalSecurityCleared => f.write_str("LocalSecurityCleared"),
            BridgeEvent::SignedIn { .. } => f.write_str("SignedIn { .. }"),
            BridgeEvent::TokenRefreshed { .. } => f.write_str("TokenRefreshed { .. }"),
            BridgeEvent::SignedOut => f.write_str("SignedOut"),
        }
    }
}

/// Session commands the shell can issue.
pub trait SessionControl: Send + Sync {
    fn sign_in(&self, access_token: String)
        -> impl Future<Output = Result<(), BackendError>> + Send;

    fn refresh(&self, access_token: String)
        -> impl Future<Output = Result<(), BackendError>> + Send;

    fn sign_out(&self) -> impl Future<Output = ()> + Send;
}

impl SessionControl for RestBackend {
    async fn sign_in(&self, access_token: String) -> Result<(), BackendError> {
        RestBackend::sign_in(self, access_token).await
    }

    async fn refresh(&self, access_token: String) -> Result<(), BackendError> {
        RestBackend::refresh(self, access_token).await
    }

    async fn sign_out(&self) {
        RestBackend::sign_out(self).await
    }
}

impl<T: SessionControl> SessionControl for std::sync::Arc<T> {
    fn sign_in(
        &self,
        access_token: String,
    ) -> impl Future<Output = Result<(), BackendError>> + Send {
        (**self).sign_in(access_token)
    }

    fn refresh(
        &self,
        access_token: String,
    ) -> impl Future<Output = Result<(), BackendError>> + Send {
        (**self).refresh(access_token)
    }

    fn sign_out(&self) -> impl Future<Output = ()> + Send {
        (**self).sign_out()
    }
}

/// Session work handed from the bridge to [`run_session_control`].
#[derive(Clone, PartialEq, Eq)]
pub enum SessionCommand {
    SignIn(String),
    Refresh(String),
    SignOut,
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCommand::SignIn(_) => f.write_str("SignIn(..)"),
            SessionCommand::Refresh(_) => f.write_str("Refresh(..)"),
            SessionCommand::SignOut => f.write_str("SignOut"),
        }
    }
}

/// Applies shell events to the access sources.
///
/// Session commands are queued rather than awaited, so a slow backend call
/// never holds up route changes behind it.
#[derive(Debug)]
pub struct Bridge {
    sources: AccessSources,
    routes: mpsc::Sender<Location>,
    session: mpsc::Sender<SessionCommand>,
}

impl Bridge {
    pub fn new(
        sources: AccessSources,
        routes: mpsc::Sender<Location>,
        session: mpsc::Sender<SessionCommand>,
    ) -> Self {
        Self {
            sources,
            routes,
            session,
        }
    }

    /// Apply one event.
    pub async fn dispatch(&self, event: BridgeEvent) -> Result<(), BridgeError> {
        debug!(event = ?event, "Bridge event");
        match event {
            BridgeEvent::RouteChanged { path } => {
                self.routes
                    .send(Location::parse(&path))
                    .await
                    .map_err(|_| BridgeError::Closed)?;
            }
            BridgeEvent::WalletConnected { address } => {
                self.sources.wallet.connect(WalletAddress::parse(&address)?);
            }
            BridgeEvent::WalletDisconnected => self.sources.wallet.disconnect(),
            BridgeEvent::LocalSecurityConfigured => {
                let scope = self.sources.identity_scope();
                self.sources.local_security.mark_configured(&scope)?;
            }
            BridgeEvent::LocalSecurityCleared => {
                let session = self.sources.session.snapshot();
                self.sources.local_security.clear_for(session.user_id())?;
            }
            BridgeEvent::SignedIn { access_token } => {
                self.queue(SessionCommand::SignIn(access_token)).await?
            }
            BridgeEvent::TokenRefreshed { access_token } => {
                self.queue(SessionCommand::Refresh(access_token)).await?
            }
            BridgeEvent::SignedOut => self.queue(SessionCommand::SignOut).await?,
        }
        Ok(())
    }

    async fn queue(&self, command: SessionCommand) -> Result<(), BridgeError> {
        self.session
            .send(command)
            .await
            .map_err(|_| BridgeError::Closed)
    }

    /// Parse and apply one protocol line. Blank lines are ignored.
    pub async fn dispatch_line(&self, line: &str) -> Result<(), BridgeError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let event: BridgeEvent = serde_json::from_str(line)?;
        self.dispatch(event).await
    }

    /// Read events until EOF or `shutdown`.
    pub async fn run_inbound<R>(&self, reader: R, shutdown: CancellationToken) -> Result<(), BridgeError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                info!("Shell closed the bridge");
                return Ok(());
            };

            match self.dispatch_line(&line).await {
                Ok(()) => {}
                Err(BridgeError::Closed) => return Err(BridgeError::Closed),
                Err(e) => warn!(error = %e, "Skipping bridge message"),
            }
        }
    }
}

/// Execute queued session commands in order until the queue closes or
/// `shutdown` fires. Failures are logged; the queue keeps draining.
pub async fn run_session_control<C: SessionControl>(
    control: C,
    mut commands: mpsc::Receiver<SessionCommand>,
    shutdown: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            command = commands.recv() => command,
        };
        let Some(command) = command else {
            break;
        };

        debug!(command = ?command, "Session command");
        let result = match command {
            SessionCommand::SignIn(token) => control.sign_in(token).await,
            SessionCommand::Refresh(token) => control.refresh(token).await,
            SessionCommand::SignOut => {
                control.sign_out().await;
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "Session command failed");
        }
    }
}

/// Write navigation commands as JSON lines until the channel closes or
/// `shutdown` fires.
pub async fn write_commands<W>(
    mut commands: mpsc::Receiver<NavigationCommand>,
    mut writer: W,
    shutdown: CancellationToken,
) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            command = commands.recv() => command,
        };
        let Some(command) = command else {
            break;
        };

        let mut line = serde_json::to_vec(&command)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    writer.flush().await?;
    Ok(())
}
