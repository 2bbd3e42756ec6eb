//! Command implementations.

pub mod config;
pub mod serve;
pub mod stages;
pub mod submit;

use tokio_util::sync::CancellationToken;

/// A token that is cancelled on the first Ctrl-C.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {}", e),
        }
        trigger.cancel();
    });
    token
}
