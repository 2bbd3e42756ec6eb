//! The long-running `scan`, `compute` and `sort` commands.

use prism_core::Prism;
use tokio_util::sync::CancellationToken;

pub async fn scan(prism: &Prism, shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut scanner = prism.scanner()?;
    scanner.run(shutdown).await?;
    Ok(())
}

pub async fn compute(prism: &Prism, shutdown: CancellationToken) -> anyhow::Result<()> {
    prism.compute().run(shutdown).await?;
    Ok(())
}

pub async fn sort(prism: &Prism, shutdown: CancellationToken) -> anyhow::Result<()> {
    let sorter = prism.sorter()?;
    tracing::info!("Sorting into {}", sorter.root().display());
    sorter.run(shutdown).await?;
    Ok(())
}
