//! Episode pipeline runner
//!
//! Loads a pipeline description, wires it through the built-in registry and
//! runs it until every ingestor is exhausted or Ctrl-C is pressed.

use anyhow::Context;
use clap::{Parser, Subcommand};
use episode_pipeline::{config::PipelineConfig, pipeline::Registry, PipelineComposer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Trigger-driven classification pipeline
#[derive(Parser, Debug)]
#[command(name = "episode-pipeline", version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a pipeline until its sources are exhausted
    Run {
        /// Pipeline description (TOML, or JSON with a .json extension)
        #[arg(short, long)]
        config: PathBuf,

        /// Also write daily-rolling log files into this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Validate and wire a pipeline without starting ingestion
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,episode_pipeline=debug"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "episode-pipeline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn compose(path: &Path) -> anyhow::Result<PipelineComposer> {
    let config = PipelineConfig::load(path)?;
    let registry = Registry::with_builtins();
    PipelineComposer::from_config(&config, &registry)
        .with_context(|| format!("Invalid pipeline in {}", path.display()))
}

/// Wire without opening the result sink
fn check(path: &Path) -> anyhow::Result<PipelineComposer> {
    let config = PipelineConfig::load(path)?;
    let registry = Registry::with_builtins();
    PipelineComposer::wire(&config, &registry)
        .with_context(|| format!("Invalid pipeline in {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Check { config } => {
            let _guard = init_logging(None);
            let composer = check(&config)?;
            tracing::info!(
                "{} is valid: {} ingestors, {} classifiers, {} chain links",
                config.display(),
                composer.ingestion().len(),
                composer.dispatchers().len(),
                composer.links().len()
            );
            composer.stop();
            Ok(())
        }
        Command::Run { config, log_dir } => {
            let _guard = init_logging(log_dir.as_deref());
            tracing::info!("Starting episode pipeline from {}", config.display());

            let composer = Arc::new(compose(&config)?);

            let interrupted = Arc::clone(&composer);
            ctrlc::set_handler(move || {
                tracing::info!("Shutdown signal received");
                interrupted.ingestion().stop_all();
            })
            .context("Installing Ctrl-C handler")?;

            composer.start()?;
            composer.stop();

            for (name, stats) in composer.stats() {
                tracing::info!(
                    "Classifier '{}': {} episodes ({} failed), {} samples, {} classification errors",
                    name,
                    stats.episodes_completed + stats.episodes_failed,
                    stats.episodes_failed,
                    stats.samples_classified,
                    stats.classification_errors
                );
            }
            Ok(())
        }
    }
}
