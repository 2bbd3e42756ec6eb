//! Prism Core - correlation and pipeline choreography for an image sorter.
//!
//! Four cooperating stages exchange messages through an AMQP-style broker:
//!
//! ```text
//! Scanner → [request exchange] → Compute → [result exchange] → Sorter
//!                                             └────────────→ Correlator (by id)
//! ```
//!
//! The Scanner publishes every new image in its watched directories, the
//! Compute stage derives the mean colour of each image, the Sorter files it
//! under a directory named by that colour, and the Correlator lets a caller
//! submit one image and wait for its colour.
//!
//! # Usage
//!
//! ```rust,ignore
//! use prism_core::{Config, Prism};
//!
//! #[tokio::main]
//! async fn main() -> prism_core::Result<()> {
//!     let prism = Prism::new(Config::load()?);
//!     let correlator = prism.correlator();
//!
//!     let id = correlator.submit(std::fs::read("photo.jpg")?)?;
//!     println!("{}", correlator.wait(&id).await?);
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod correlator;
pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod stages;
pub mod summary;

use std::sync::Arc;

pub use broker::{connector_from_config, Connector, InMemoryBroker};
pub use config::Config;
pub use correlator::{Correlator, CorrelatorOptions, WaitSnapshot, WaitState};
pub use envelope::{ComputeRequest, ComputeResult, CorrelationId};
pub use error::{
    BrokerError, ConfigError, CorrelationError, EnvelopeError, ImageError, PrismError, Result,
};
pub use stages::{ComputeStage, CycleReport, FileIdentity, Scanner, Sorter};
pub use summary::{compute_summary, encode_summary, SummaryValue};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Entry point that builds stages sharing one configuration and connector.
pub struct Prism {
    config: Config,
    connector: Arc<dyn Connector>,
}

impl Prism {
    /// Connect to the broker described by `config`.
    pub fn new(config: Config) -> Self {
        let connector = connector_from_config(&config.broker);
        Self::with_connector(config, connector)
    }

    /// Use an explicit connector, e.g. a shared [`InMemoryBroker`].
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Self {
        tracing::debug!("Initializing Prism v{} ({})", VERSION, connector.describe());
        Self { config, connector }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    pub fn scanner(&self) -> std::result::Result<Scanner, ConfigError> {
        Scanner::new(
            self.connector(),
            self.config.routing.clone(),
            &self.config.scanner,
        )
    }

    pub fn compute(&self) -> ComputeStage {
        ComputeStage::new(self.connector(), self.config.routing.clone())
            .with_reconnect_delay(self.config.broker.retry_delay())
    }

    pub fn sorter(&self) -> std::result::Result<Sorter, ConfigError> {
        Sorter::new(
            self.connector(),
            self.config.routing.clone(),
            &self.config.sorter,
        )
        .map(|sorter| sorter.with_reconnect_delay(self.config.broker.retry_delay()))
    }

    pub fn correlator(&self) -> Correlator {
        Correlator::new(
            self.connector(),
            self.config.routing.clone(),
            CorrelatorOptions::from(&self.config.correlator),
        )
    }
}
