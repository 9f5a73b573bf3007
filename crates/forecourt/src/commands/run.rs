//! `forecourt run`: serve customers until a shutdown signal arrives.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use forecourt_core::TransactionController;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let config = super::load(global)?;
    let registry = Arc::new(config.registry());
    let controller = TransactionController::connect(registry, config.controller_config()).await?;

    let shutdown = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_signal(shutdown.clone()));

    let result = controller.run(shutdown).await;
    watcher.abort();
    Ok(result?)
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    wait_for_signal().await;
    shutdown.cancel();
}

/// Resolve on SIGINT or SIGTERM (Ctrl-C elsewhere).
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            () = ctrl_c() => {}
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl-C, shutting down"),
        Err(e) => {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}
