//! Pipeline composition.
//!
//! ```text
//! Ingestor ──► IngestionManager ──► Trigger ─(chain)─► Trigger ──► ClassifierDispatcher ──► MessageBus
//! ```
//!
//! - [`Registry`] - builds components from their configured kind names
//! - [`PipelineComposer`] - wires them together and owns start/stop

pub mod composer;
pub mod registry;

pub use composer::{build_bus, PipelineComposer};
pub use registry::{BuildContext, Registry};
