//! Scanner stage: turns new files in watched directories into compute requests.
//!
//! Each file is published at most once per process lifetime under normal
//! operation. A file's identity key enters the published set only after its
//! request has been handed to the broker, so a failed publish is retried on
//! the next cycle.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::broker::{Connector, ExchangeKind};
use crate::config::{IdentityMode, RoutingConfig, ScannerConfig};
use crate::envelope::{ComputeRequest, CorrelationId};
use crate::error::{ConfigError, Result};
use crate::pipeline::{FileDiscovery, Hasher};

/// A discovered file and the key it is deduplicated by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub key: String,
    pub path: PathBuf,
}

/// Outcome of one pass over every watched directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub found: usize,
    pub published: usize,
    pub failed: usize,
}

pub struct Scanner {
    connector: Arc<dyn Connector>,
    routing: RoutingConfig,
    dirs: Vec<PathBuf>,
    interval: Duration,
    identity: IdentityMode,
    discovery: FileDiscovery,
    published: HashSet<String>,
    idle_logged: bool,
}

impl Scanner {
    /// Build a scanner; fails if no directory is configured.
    pub fn new(
        connector: Arc<dyn Connector>,
        routing: RoutingConfig,
        config: &ScannerConfig,
    ) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            connector,
            routing,
            dirs: config.require_dirs()?,
            interval: config.interval(),
            identity: config.identity,
            discovery: FileDiscovery::new(&config.extensions),
            published: HashSet::new(),
            idle_logged: false,
        })
    }

    /// Number of files published so far.
    pub fn published_count(&self) -> usize {
        self.published.len()
    }

    /// Files in `dir` (non-recursive) whose identity is not yet published.
    pub fn scan(&self, dir: &Path) -> Result<Vec<FileIdentity>> {
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();

        for path in self.discovery.discover(dir)? {
            let key = match self.identity_key(&path) {
                Ok(key) => key,
                Err(e) => {
                    // Usually a file removed between listing and reading.
                    tracing::debug!("Skipping {:?}: {}", path, e);
                    continue;
                }
            };
            if self.published.contains(&key) || !seen.insert(key.clone()) {
                continue;
            }
            fresh.push(FileIdentity { key, path });
        }

        Ok(fresh)
    }

    fn identity_key(&self, path: &Path) -> std::io::Result<String> {
        match self.identity {
            IdentityMode::Path => Ok(std::fs::canonicalize(path)?.display().to_string()),
            IdentityMode::Content => Hasher::content_hash(path),
        }
    }

    /// Declare the request exchange (direct).
    pub async fn declare(&self) -> Result<()> {
        let channel = self.connector.connect().await?;
        let outcome = channel
            .declare_exchange(&self.routing.request_exchange, ExchangeKind::Direct)
            .await;
        channel.close().await;
        outcome?;
        Ok(())
    }

    /// Read, wrap and publish one file, then mark it published.
    pub async fn publish(&mut self, file: &FileIdentity) -> Result<CorrelationId> {
        tracing::debug!("Reading image {:?}", file.path);
        let bytes = tokio::fs::read(&file.path).await?;
        let request = ComputeRequest::new(CorrelationId::new(), bytes);

        let channel = self.connector.connect().await?;
        let outcome = channel
            .publish(
                &self.routing.request_exchange,
                &self.routing.request_routing_key,
                &request.encode(),
            )
            .await;
        channel.close().await;
        outcome?;

        self.published.insert(file.key.clone());
        tracing::debug!(
            "Sent {} as {}, exchange={}, key={}",
            file.path.display(),
            request.id,
            self.routing.request_exchange,
            self.routing.request_routing_key
        );
        Ok(request.id)
    }

    /// Scan every directory once and publish what is new.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        for dir in self.dirs.clone() {
            let files = match self.scan(&dir) {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!("Cannot scan {}: {}", dir.display(), e);
                    continue;
                }
            };
            report.found += files.len();

            if !files.is_empty() {
                tracing::info!("New images found in {}: {}", dir.display(), files.len());
            }

            for file in &files {
                match self.publish(file).await {
                    Ok(_) => report.published += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::error!("Failed to publish {}: {}", file.path.display(), e);
                    }
                }
            }
        }

        if report.found > 0 {
            self.idle_logged = false;
        } else if !self.idle_logged {
            tracing::info!("No new images ({})", self.dirs_label());
            self.idle_logged = true;
        } else {
            tracing::debug!("No new images");
        }

        report
    }

    fn dirs_label(&self) -> String {
        self.dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Scan until `shutdown` is cancelled.
    ///
    /// At least one cycle always runs, even if the token is already cancelled.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.declare().await?;
        tracing::info!(
            "Scanning {} every {:?}. To exit press CTRL+C",
            self.dirs_label(),
            self.interval
        );

        loop {
            let report = self.run_cycle().await;
            if report.failed > 0 {
                tracing::warn!("{} image(s) will be retried next cycle", report.failed);
            }

            if shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!("Scanner stopped after publishing {} image(s)", self.published.len());
        Ok(())
    }
}
