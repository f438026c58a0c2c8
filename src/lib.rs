//! # episode-pipeline: trigger-driven classification
//!
//! Turns continuous sensor streams into discrete episodes worth classifying,
//! classifies each episode on a bounded worker pool and publishes one result
//! record per sample plus one summary per episode.
//!
//! ## Architecture
//!
//! - **Ingestion**: supervised source threads fan frames out to triggers
//! - **Triggers**: per-instance state machines that open and close episodes
//! - **Episodes**: non-blocking hand-off queues between a trigger and its consumer
//! - **Classifiers**: dispatchers walk whole episodes on a worker pool
//! - **Bus**: optional sink for meta and summary records
//! - **Scripting**: Rhai expressions for configurable triggers and classifiers
//!
//! ## Example
//!
//! ```ignore
//! use episode_pipeline::{config::PipelineConfig, pipeline::Registry, PipelineComposer};
//!
//! let config = PipelineConfig::load("pipeline.toml")?;
//! let composer = PipelineComposer::from_config(&config, &Registry::with_builtins())?;
//! composer.start()?; // blocks until every ingestor is exhausted
//! composer.stop();
//! ```

pub mod bus;
pub mod classifier;
pub mod config;
pub mod episode;
pub mod error;
pub mod ingestion;
pub mod pipeline;
pub mod scripting;
pub mod trigger;
pub mod types;

// Re-export commonly used types
pub use classifier::{Classifier, ClassifierDispatcher, DispatcherStats};
pub use episode::{BacklogPolicy, EpisodeIterator, Next};
pub use error::{PipelineError, Result};
pub use ingestion::{IngestionManager, Ingestor};
pub use pipeline::{PipelineComposer, Registry};
pub use trigger::{Trigger, TriggerCore};
pub use types::{Detection, Frame, MetaRecord, Payload, Sample, SummaryRecord};
