//! Prism CLI - runs the stages of the colour-sorting pipeline.
//!
//! Each stage is a long-lived process connected to the same AMQP broker:
//!
//! ```bash
//! # Watch a directory and publish every new image
//! SCAN_DIRS=./incoming prism scan
//!
//! # Compute the mean colour of every published image
//! prism compute
//!
//! # File computed images under <target>/<#rrggbb>/
//! TARGET_DIR=./sorted prism sort
//!
//! # Submit one image and wait for its colour
//! prism submit photo.jpg
//!
//! # HTTP front-end for submissions
//! prism serve
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use prism_core::config::LoggingConfig;
use prism_core::{Config, Prism};
use std::path::PathBuf;

mod cli;
mod logging;
mod server;

/// Prism - sort images into directories by their average colour.
#[derive(Parser, Debug)]
#[command(name = "prism")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to $PRISM_CONFIG, then the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch directories and publish new images for processing
    Scan,

    /// Compute the average colour of published images
    Compute,

    /// Save computed images into per-colour directories
    Sort,

    /// Serve the HTTP submission API
    Serve(cli::serve::ServeArgs),

    /// Submit one image and wait for its colour
    Submit(cli::submit::SubmitArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::resolve_path);

    if let Commands::Config(args) = cli.command {
        logging::init(&LoggingConfig::default(), cli.verbose, cli.json_logs)?;
        return cli::config::execute(args, &config_path).await;
    }

    // Configuration problems stop every stage before it touches the broker.
    let config = Config::load_layered(&config_path, |key| std::env::var(key).ok())
        .with_context(|| format!("Cannot load configuration ({})", config_path.display()))?;
    logging::init(&config.logging, cli.verbose, cli.json_logs)?;

    tracing::debug!("Prism v{}", prism_core::VERSION);

    let prism = Prism::new(config);
    let shutdown = cli::shutdown_on_ctrl_c();

    match cli.command {
        Commands::Scan => cli::stages::scan(&prism, shutdown).await,
        Commands::Compute => cli::stages::compute(&prism, shutdown).await,
        Commands::Sort => cli::stages::sort(&prism, shutdown).await,
        Commands::Serve(args) => cli::serve::execute(&prism, args, shutdown).await,
        Commands::Submit(args) => cli::submit::execute(&prism, args, shutdown).await,
        Commands::Config(_) => Ok(()),
    }
}
