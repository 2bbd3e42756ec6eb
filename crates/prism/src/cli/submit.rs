//! The `prism submit` command: one correlated request from the terminal.

use anyhow::Context;
use clap::Args;
use prism_core::{Correlator, CorrelatorOptions, Prism};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Arguments for the `submit` command.
#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Image file to submit
    pub file: PathBuf,

    /// Seconds to wait for the result (overrides the configured timeout)
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Print the full result record as JSON instead of just the colour
    #[arg(long)]
    pub json: bool,
}

/// Submit the file, wait for its summary and print it.
pub async fn execute(
    prism: &Prism,
    args: SubmitArgs,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let image = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Cannot read {}", args.file.display()))?;

    let mut options = CorrelatorOptions::from(&prism.config().correlator);
    if let Some(secs) = args.timeout_secs {
        options.timeout = Duration::from_secs(secs);
    }
    let correlator = Correlator::new(prism.connector(), prism.config().routing.clone(), options);

    let id = correlator.submit(image)?;
    tracing::info!("Submitted {} as {}", args.file.display(), id);

    let outcome = tokio::select! {
        outcome = correlator.wait(&id) => outcome,
        _ = shutdown.cancelled() => anyhow::bail!("Interrupted while waiting for {}", id),
    };

    if args.json {
        if let Some(snapshot) = correlator.snapshot(&id) {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    let summary = outcome.with_context(|| format!("No result for {}", args.file.display()))?;
    if !args.json {
        println!("{}", summary);
    }
    Ok(())
}
