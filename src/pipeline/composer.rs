//! PipelineComposer: wiring and lifecycle root.
//!
//! For every classifier the composer resolves its trigger chain, links the
//! stages, binds a [`ClassifierDispatcher`] to the tail and registers the
//! head against every ingestor whose kind the head supports.
//!
//! Shutdown order is ingestion, then triggers (full stop), then the
//! dispatcher pools, so no new data arrives while in-flight episodes drain.
//! Chained triggers are stopped stage by stage, head first: each stage is
//! stopped and its forwarding link closed and joined before the next stage
//! is stopped, so episodes an upstream stage already closed still reach the
//! classifier.

use crate::bus::{JsonLinesBus, LogBus, MessageBus, Topics};
use crate::classifier::{Classifier, ClassifierDispatcher, DispatcherStats, RolloverConfig};
use crate::config::{BusConfig, BusKind, PipelineConfig};
use crate::error::{PipelineError, Result, ResultExt};
use crate::ingestion::{IngestionManager, Ingestor, Interest};
use crate::pipeline::Registry;
use crate::trigger::{self, describe_sources, ChainLink, Trigger};
use crate::types::{Payload, SourceKind};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

/// Build the configured message bus, if any
pub fn build_bus(config: &BusConfig) -> Result<Option<Arc<dyn MessageBus>>> {
    let bus: Arc<dyn MessageBus> = match config.kind {
        BusKind::None => return Ok(None),
        BusKind::Log => Arc::new(LogBus),
        BusKind::Jsonl => {
            let path = config.path.as_ref().ok_or_else(|| {
                PipelineError::Config("The jsonl bus requires a `path`".to_string())
            })?;
            Arc::new(JsonLinesBus::create(path).context("Opening jsonl bus")?)
        }
    };
    Ok(Some(bus))
}

pub struct PipelineComposer {
    ingestion: IngestionManager,
    triggers: BTreeMap<String, Arc<dyn Trigger>>,
    dispatchers: Vec<Arc<ClassifierDispatcher>>,
    links: Vec<Arc<ChainLink>>,
    registered_heads: HashSet<String>,
    bus: Option<Arc<dyn MessageBus>>,
    topics: Topics,
}

impl PipelineComposer {
    pub fn new() -> Self {
        Self {
            ingestion: IngestionManager::new(),
            triggers: BTreeMap::new(),
            dispatchers: Vec::new(),
            links: Vec::new(),
            registered_heads: HashSet::new(),
            bus: None,
            topics: Topics::default(),
        }
    }

    /// Publish results of classifiers added from now on to `bus`
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>, topics: Topics) -> Self {
        self.bus = Some(bus);
        self.topics = topics;
        self
    }

    /// Validate `config` and build every component through `registry`
    pub fn from_config(config: &PipelineConfig, registry: &Registry) -> Result<Self> {
        config.validate()?;
        let bus = build_bus(&config.bus)?;
        Self::compose(config, registry, bus)
    }

    /// Validate and wire `config` without opening the configured bus.
    ///
    /// Classifier pools are started; call [`PipelineComposer::stop`] when done.
    pub fn wire(config: &PipelineConfig, registry: &Registry) -> Result<Self> {
        config.validate()?;
        Self::compose(config, registry, None)
    }

    fn compose(
        config: &PipelineConfig,
        registry: &Registry,
        bus: Option<Arc<dyn MessageBus>>,
    ) -> Result<Self> {
        let mut composer = Self::new();
        composer.bus = bus;
        composer.topics = Topics {
            meta: config.bus.meta_topic.clone(),
            summary: config.bus.summary_topic.clone(),
        };

        for ingestor in &config.ingestors {
            let built = registry
                .build_ingestor(ingestor)
                .with_context(|| format!("Building ingestor '{}'", ingestor.name))?;
            composer.add_ingestor(built)?;
        }
        for trigger in &config.triggers {
            let built = registry
                .build_trigger(trigger)
                .with_context(|| format!("Building trigger '{}'", trigger.name))?;
            composer.add_trigger(built)?;
        }
        for classifier in &config.classifiers {
            let built = registry
                .build_classifier(classifier)
                .with_context(|| format!("Building classifier '{}'", classifier.name))?;
            composer
                .add_classifier(
                    &classifier.name,
                    built,
                    &classifier.trigger.names(),
                    classifier.workers,
                    classifier.rollover,
                )
                .with_context(|| format!("Wiring classifier '{}'", classifier.name))?;
        }

        tracing::info!(
            "Composed pipeline: {} ingestors, {} triggers, {} classifiers",
            composer.ingestion.len(),
            composer.triggers.len(),
            composer.dispatchers.len()
        );
        Ok(composer)
    }

    pub fn add_ingestor(&mut self, ingestor: Arc<dyn Ingestor>) -> Result<()> {
        self.ingestion.add_ingestor(ingestor)
    }

    pub fn add_trigger(&mut self, trigger: Arc<dyn Trigger>) -> Result<()> {
        let name = trigger.name().to_string();
        if self.triggers.contains_key(&name) {
            return Err(PipelineError::DuplicateName {
                component: "trigger",
                name,
            });
        }
        self.triggers.insert(name, trigger);
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<Arc<dyn Trigger>> {
        self.triggers
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownReference {
                component: "trigger",
                name: name.to_string(),
            })
    }

    /// Wire a classifier behind the trigger chain `chain` (head first)
    pub fn add_classifier(
        &mut self,
        name: &str,
        classifier: Arc<dyn Classifier>,
        chain: &[&str],
        workers: usize,
        rollover: RolloverConfig,
    ) -> Result<Arc<ClassifierDispatcher>> {
        let stages = chain
            .iter()
            .map(|n| self.resolve(n))
            .collect::<Result<Vec<_>>>()?;
        let (Some(head), Some(tail)) = (stages.first(), stages.last()) else {
            return Err(PipelineError::Config(format!(
                "Classifier '{}' has an empty trigger chain",
                name
            )));
        };

        for pair in stages.windows(2) {
            let link = trigger::link(&pair[0], Arc::clone(&pair[1]))?;
            self.links.push(link);
        }

        let dispatcher = Arc::new(ClassifierDispatcher::new(
            name,
            classifier,
            workers,
            rollover,
            self.bus.clone(),
            self.topics.clone(),
        )?);
        dispatcher.bind_to(tail.as_ref())?;

        self.register_head(head)?;
        self.dispatchers.push(Arc::clone(&dispatcher));
        Ok(dispatcher)
    }

    fn register_head(&mut self, head: &Arc<dyn Trigger>) -> Result<()> {
        if self.registered_heads.contains(head.name()) {
            return Ok(());
        }

        let mut kinds = head.supported_sources();
        kinds.remove(&SourceKind::Episode);
        let sources = self.ingestion.names_of_kind(&kinds);
        if sources.is_empty() {
            return Err(PipelineError::NoMatchingSource {
                trigger: head.name().to_string(),
                supported: describe_sources(&head.supported_sources()),
            });
        }

        for ingestor in &sources {
            let target = Arc::clone(head);
            let interest: Interest = Arc::new(move |source: &str, payload: Payload| {
                target.process_data(source, payload)
            });
            self.ingestion.register_interest(ingestor, interest)?;
            tracing::info!("Trigger '{}' subscribed to ingestor '{}'", head.name(), ingestor);
        }
        self.registered_heads.insert(head.name().to_string());
        Ok(())
    }

    /// Start ingestion without waiting
    pub fn launch(&self) -> Result<()> {
        self.ingestion.start_all()
    }

    /// Block until every ingestor has exited
    pub fn join(&self) {
        self.ingestion.join_all();
    }

    /// Start ingestion and block until every source is exhausted or stopped
    pub fn start(&self) -> Result<()> {
        self.launch()?;
        self.join();
        Ok(())
    }

    /// Ordered teardown; safe to call more than once
    pub fn stop(&self) {
        tracing::info!("Stopping ingestion");
        self.ingestion.stop_all();
        self.ingestion.join_all();

        tracing::info!(
            "Stopping {} triggers and {} chain links",
            self.triggers.len(),
            self.links.len()
        );
        self.stop_triggers();

        tracing::info!("Draining {} classifiers", self.dispatchers.len());
        for dispatcher in &self.dispatchers {
            dispatcher.shutdown();
        }
    }

    /// Stop triggers in chain order, closing each stage's outgoing link
    /// before any of its downstream stages is stopped
    fn stop_triggers(&self) {
        let mut incoming: BTreeMap<&str, usize> = BTreeMap::new();
        for link in &self.links {
            *incoming.entry(link.downstream()).or_default() += 1;
        }

        let mut ready: VecDeque<&str> = self
            .triggers
            .keys()
            .map(String::as_str)
            .filter(|name| !incoming.contains_key(name))
            .collect();

        while let Some(name) = ready.pop_front() {
            if let Some(trigger) = self.triggers.get(name) {
                trigger.stop();
            }
            for link in self.links.iter().filter(|l| l.upstream() == name) {
                link.close();
                let downstream = link.downstream();
                if let Some(count) = incoming.get_mut(downstream) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(downstream);
                    }
                }
            }
        }

        // Anything left over sits on a cycle; full stops unblock its forwarders
        for trigger in self.triggers.values() {
            trigger.stop();
        }
        for link in &self.links {
            link.close();
        }
    }

    pub fn ingestion(&self) -> &IngestionManager {
        &self.ingestion
    }

    pub fn trigger(&self, name: &str) -> Option<&Arc<dyn Trigger>> {
        self.triggers.get(name)
    }

    pub fn dispatchers(&self) -> &[Arc<ClassifierDispatcher>] {
        &self.dispatchers
    }

    pub fn links(&self) -> &[Arc<ChainLink>] {
        &self.links
    }

    /// Per-classifier counters
    pub fn stats(&self) -> Vec<(String, DispatcherStats)> {
        self.dispatchers
            .iter()
            .map(|d| (d.name().to_string(), d.stats()))
            .collect()
    }
}

impl Default for PipelineComposer {
    fn default() -> Self {
        Self::new()
    }
}
