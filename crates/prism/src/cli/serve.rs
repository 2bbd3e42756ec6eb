//! The `prism serve` command.

use anyhow::Context;
use clap::Args;
use prism_core::Prism;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::server::{build_router, AppState};

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (overrides `server.bind`)
    #[arg(long)]
    pub bind: Option<String>,
}

/// Longest pause between retention sweeps.
const MAX_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Serve the HTTP API until `shutdown` is cancelled.
pub async fn execute(
    prism: &Prism,
    args: ServeArgs,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let settings = &prism.config().server;
    let bind = args.bind.unwrap_or_else(|| settings.bind.clone());

    let correlator = Arc::new(prism.correlator());
    let sweeper = tokio::spawn(prune_loop(correlator.clone(), shutdown.clone()));

    let router = build_router(AppState::new(correlator), settings.max_upload_bytes());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Cannot listen on {}", bind))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    tracing::info!("Server stopped");
    Ok(())
}

/// Periodically drop finished requests past their retention.
async fn prune_loop(correlator: Arc<prism_core::Correlator>, shutdown: CancellationToken) {
    let interval = correlator
        .options()
        .retention
        .clamp(Duration::from_secs(1), MAX_PRUNE_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                correlator.prune_finished();
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
