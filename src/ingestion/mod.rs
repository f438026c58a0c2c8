//! Ingestion: data sources and fan-out to triggers.
//!
//! An [`Ingestor`] owns one data source and a production thread. Every frame
//! it produces is handed, on that same thread, to each registered
//! [`Interest`]. Nothing is buffered between an ingestor and its interests,
//! so a slow interest stalls its source.
//!
//! The [`IngestionManager`] owns the ingestors by name and drives their
//! lifecycle uniformly.

pub mod directory;
pub mod source;
pub mod synthetic;

pub use directory::{DirectoryOptions, DirectorySource};
pub use source::{FrameSource, RetryPolicy, SourceIngestor};
pub use synthetic::{SyntheticOptions, SyntheticSource};

use crate::error::{PipelineError, Result};
use crate::types::{Payload, SourceKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Callback receiving `(source_name, payload)` for every produced frame
pub type Interest = Arc<dyn Fn(&str, Payload) + Send + Sync>;

/// A pluggable data source with its own production thread
pub trait Ingestor: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Add a consumer; only allowed before [`Ingestor::start`]
    fn register_interest(&self, interest: Interest) -> Result<()>;

    /// Spawn the production thread
    fn start(&self) -> Result<()>;

    /// Ask the production thread to exit; does not wait
    fn stop(&self);

    /// Block until the production thread has exited
    fn join(&self);

    /// Frames delivered so far
    fn frames_produced(&self) -> u64;
}

/// Owner of all ingestors in a pipeline
#[derive(Default)]
pub struct IngestionManager {
    ingestors: BTreeMap<String, Arc<dyn Ingestor>>,
}

impl IngestionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ingestor(&mut self, ingestor: Arc<dyn Ingestor>) -> Result<()> {
        let name = ingestor.name().to_string();
        if self.ingestors.contains_key(&name) {
            return Err(PipelineError::DuplicateName {
                component: "ingestor",
                name,
            });
        }
        tracing::debug!("Added {} ingestor '{}'", ingestor.kind(), name);
        self.ingestors.insert(name, ingestor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Ingestor>> {
        self.ingestors.get(name)
    }

    /// Register a callback against a named ingestor
    pub fn register_interest(&self, name: &str, interest: Interest) -> Result<()> {
        let ingestor = self
            .ingestors
            .get(name)
            .ok_or_else(|| PipelineError::UnknownReference {
                component: "ingestor",
                name: name.to_string(),
            })?;
        ingestor.register_interest(interest)
    }

    /// Names of the ingestors whose kind is in `kinds`
    pub fn names_of_kind(&self, kinds: &BTreeSet<SourceKind>) -> Vec<String> {
        self.ingestors
            .values()
            .filter(|i| kinds.contains(&i.kind()))
            .map(|i| i.name().to_string())
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ingestors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ingestors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ingestors.is_empty()
    }

    /// Start every ingestor; on failure the ones already started are stopped
    pub fn start_all(&self) -> Result<()> {
        let mut started: Vec<&Arc<dyn Ingestor>> = Vec::new();
        for ingestor in self.ingestors.values() {
            if let Err(e) = ingestor.start() {
                for running in started {
                    running.stop();
                    running.join();
                }
                return Err(e.with_context(format!("Starting ingestor '{}'", ingestor.name())));
            }
            started.push(ingestor);
        }
        tracing::info!("Started {} ingestors", self.ingestors.len());
        Ok(())
    }

    pub fn stop_all(&self) {
        for ingestor in self.ingestors.values() {
            ingestor.stop();
        }
    }

    /// Block until every production thread has exited
    pub fn join_all(&self) {
        for ingestor in self.ingestors.values() {
            ingestor.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn synthetic(name: &str, count: u64) -> Arc<dyn Ingestor> {
        let options = SyntheticOptions {
            count: Some(count),
            ..Default::default()
        };
        Arc::new(SourceIngestor::new(
            name,
            SyntheticSource::new(options),
            RetryPolicy::default(),
        ))
    }

    #[test]
    fn test_duplicate_ingestor_rejected() {
        let mut manager = IngestionManager::new();
        manager.add_ingestor(synthetic("cam", 1)).unwrap();
        let err = manager.add_ingestor(synthetic("cam", 1)).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateName { .. }));
    }

    #[test]
    fn test_unknown_ingestor_interest() {
        let manager = IngestionManager::new();
        let interest: Interest = Arc::new(|_: &str, _: Payload| {});
        assert!(manager.register_interest("nope", interest).unwrap_err().is_configuration());
    }

    #[test]
    fn test_fan_out_to_every_interest() {
        let mut manager = IngestionManager::new();
        manager.add_ingestor(synthetic("cam", 5)).unwrap();

        let a = Arc::new(AtomicU64::new(0));
        let b = Arc::new(AtomicU64::new(0));
        for counter in [&a, &b] {
            let counter = Arc::clone(counter);
            manager
                .register_interest(
                    "cam",
                    Arc::new(move |source: &str, _: Payload| {
                        assert_eq!(source, "cam");
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
        }

        manager.start_all().unwrap();
        manager.join_all();

        assert_eq!(a.load(Ordering::SeqCst), 5);
        assert_eq!(b.load(Ordering::SeqCst), 5);
        assert_eq!(manager.get("cam").unwrap().frames_produced(), 5);
    }

    #[test]
    fn test_names_of_kind() {
        let mut manager = IngestionManager::new();
        manager.add_ingestor(synthetic("a", 1)).unwrap();
        manager.add_ingestor(synthetic("b", 1)).unwrap();

        let synthetic_only: BTreeSet<_> = [SourceKind::Synthetic].into_iter().collect();
        assert_eq!(manager.names_of_kind(&synthetic_only), vec!["a", "b"]);

        let directory_only: BTreeSet<_> = [SourceKind::Directory].into_iter().collect();
        assert!(manager.names_of_kind(&directory_only).is_empty());
    }
}
