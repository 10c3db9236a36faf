// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use exchange_access_gate::arbiter::NavigationArbiter;
use exchange_access_gate::auth::JwtCapabilityVerifier;
use exchange_access_gate::backend::RestBackend;
use exchange_access_gate::bridge::{run_session_control, write_commands, Bridge};
use exchange_access_gate::config::GateConfig;
use exchange_access_gate::device_storage::FileStorage;
use exchange_access_gate::gate::AccessGate;
use exchange_access_gate::logging::init_tracing;
use exchange_access_gate::onboarding::OnboardingResumeDetector;
use exchange_access_gate::state::AccessSources;
use exchange_access_gate::Result;

/// Route changes buffered between the bridge and the arbiter.
const ROUTE_QUEUE: usize = 16;

/// Commands buffered between the arbiter and stdout.
const COMMAND_QUEUE: usize = 64;

/// Sign-in/refresh/sign-out requests awaiting the backend.
const SESSION_QUEUE: usize = 16;

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Access gate stopped");
            eprintln!("exchange-access-gate: {e}");
            1
        }
    };
    // A blocking stdin read would otherwise hold the runtime open.
    std::process::exit(code);
}

async fn run() -> Result<()> {
    let config = GateConfig::from_env()?;
    init_tracing(config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend.base_url,
        grace_ms = config.grace_period.as_millis() as u64,
        "Starting access gate"
    );

    let storage = Arc::new(FileStorage::new(&config.storage_path));
    let sources = AccessSources::new(storage);
    let cleanup = sources.local_security.purge_legacy()?;
    if cleanup.admin_override_removed || cleanup.local_security_migrated {
        info!(
            admin_override_removed = cleanup.admin_override_removed,
            local_security_migrated = cleanup.local_security_migrated,
            "Legacy device flags cleaned up"
        );
    }

    let backend = Arc::new(RestBackend::new(&config.backend)?);
    let verifier = Arc::new(JwtCapabilityVerifier::from_config(&config.backend)?);
    let shutdown = CancellationToken::new();

    let session_task = {
        let store = sources.session.clone();
        let backend = backend.clone();
        let verifier = verifier.clone();
        let timeout = config.hydration_timeout;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            store
                .run(backend.as_ref(), verifier.as_ref(), timeout, shutdown)
                .await
        })
    };

    let (routes_tx, routes_rx) = mpsc::channel(ROUTE_QUEUE);
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);

    let arbiter_task = {
        let arbiter = NavigationArbiter::new(
            AccessGate::new(config.routes.clone(), config.grace_period),
            OnboardingResumeDetector::new(backend.clone(), config.routes.clone()),
            sources.clone(),
        );
        let shutdown = shutdown.clone();
        tokio::spawn(async move { arbiter.run(routes_rx, commands_tx, shutdown).await })
    };

    let writer_task = tokio::spawn(write_commands(
        commands_rx,
        tokio::io::stdout(),
        shutdown.clone(),
    ));

    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        })
    };

    let (session_tx, session_rx) = mpsc::channel(SESSION_QUEUE);
    let control_task = tokio::spawn(run_session_control(
        backend,
        session_rx,
        shutdown.clone(),
    ));

    let bridge = Bridge::new(sources, routes_tx, session_tx);
    let inbound = bridge
        .run_inbound(BufReader::new(tokio::io::stdin()), shutdown.clone())
        .await;

    shutdown.cancel();
    signal_task.abort();
    session_task.await?;
    control_task.await?;
    arbiter_task.await?;
    writer_task.await??;
    inbound?;

    info!("Access gate stopped");
    Ok(())
}
