//! Runner configuration.
//!
//! A [`PipelineConfig`] names every ingestor, trigger and classifier of a
//! pipeline together with the kind that builds it and kind-specific
//! `options`. Kinds are resolved by the [`Registry`](crate::pipeline::Registry);
//! the options of each kind are checked when it is constructed.
//!
//! # Example
//!
//! ```toml
//! [[ingestors]]
//! name = "cam0"
//! kind = "synthetic"
//! options = { count = 200, period = 20 }
//! retry = { max_retries = 3, initial_backoff_ms = 50 }
//!
//! [[triggers]]
//! name = "motion"
//! kind = "script"
//! options = { start_when = "motion > 0.5", stop_when = "motion < 0.2" }
//! backlog = { policy = "drop_oldest", capacity = 1024 }
//!
//! [[classifiers]]
//! name = "defects"
//! kind = "noop"
//! trigger = "motion"      # or an ordered chain: ["motion", "every_3"]
//! workers = 2
//!
//! [bus]
//! kind = "jsonl"
//! path = "results.jsonl"
//! ```

use crate::bus::{DEFAULT_META_TOPIC, DEFAULT_SUMMARY_TOPIC};
use crate::classifier::RolloverConfig;
use crate::episode::BacklogPolicy;
use crate::error::{PipelineError, Result};
use crate::ingestion::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

fn empty_options() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_workers() -> usize {
    1
}

fn default_meta_topic() -> String {
    DEFAULT_META_TOPIC.to_string()
}

fn default_summary_topic() -> String {
    DEFAULT_SUMMARY_TOPIC.to_string()
}

/// Top-level pipeline description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub ingestors: Vec<IngestorConfig>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub classifiers: Vec<ClassifierConfig>,
    #[serde(default)]
    pub bus: BusConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestorConfig {
    pub name: String,
    pub kind: String,
    #[serde(default = "empty_options")]
    pub options: serde_json::Value,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    pub name: String,
    pub kind: String,
    #[serde(default = "empty_options")]
    pub options: serde_json::Value,
    #[serde(default)]
    pub backlog: BacklogPolicy,
}

/// A single trigger, or a chain listed head first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerRef {
    Single(String),
    Chain(Vec<String>),
}

impl TriggerRef {
    pub fn names(&self) -> Vec<&str> {
        match self {
            TriggerRef::Single(name) => vec![name.as_str()],
            TriggerRef::Chain(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    pub name: String,
    pub kind: String,
    pub trigger: TriggerRef,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "empty_options")]
    pub options: serde_json::Value,
    #[serde(default)]
    pub rollover: RolloverConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusKind {
    /// Records are not published
    #[default]
    None,
    Log,
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    #[serde(default)]
    pub kind: BusKind,
    #[serde(default = "default_meta_topic")]
    pub meta_topic: String,
    #[serde(default = "default_summary_topic")]
    pub summary_topic: String,
    /// Output file for the `jsonl` bus
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: BusKind::None,
            meta_topic: default_meta_topic(),
            summary_topic: default_summary_topic(),
            path: None,
        }
    }
}

impl PipelineConfig {
    /// Load from a file; `.json` files are parsed as JSON, everything else as TOML
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            serde_json::from_str(&content).map_err(|e| {
                PipelineError::Config(format!("Failed to parse config {:?}: {}", path, e))
            })?
        } else {
            Self::from_toml_str(&content)
                .map_err(|e| e.with_context(format!("Loading {:?}", path)))?
        };
        tracing::debug!("Loaded pipeline config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Check names, references and numeric bounds before anything is built
    pub fn validate(&self) -> Result<()> {
        check_names("ingestor", self.ingestors.iter().map(|i| i.name.as_str()))?;
        check_names("trigger", self.triggers.iter().map(|t| t.name.as_str()))?;
        check_names("classifier", self.classifiers.iter().map(|c| c.name.as_str()))?;

        for classifier in &self.classifiers {
            if classifier.workers == 0 {
                return Err(PipelineError::Config(format!(
                    "Classifier '{}' needs at least one worker",
                    classifier.name
                )));
            }
            if classifier.rollover.reset_to > classifier.rollover.max {
                return Err(PipelineError::Config(format!(
                    "Classifier '{}': rollover reset_to {} exceeds max {}",
                    classifier.name, classifier.rollover.reset_to, classifier.rollover.max
                )));
            }

            let chain = classifier.trigger.names();
            if chain.is_empty() {
                return Err(PipelineError::Config(format!(
                    "Classifier '{}' has an empty trigger chain",
                    classifier.name
                )));
            }
            for name in chain {
                if !self.triggers.iter().any(|t| t.name == name) {
                    return Err(PipelineError::UnknownReference {
                        component: "trigger",
                        name: name.to_string(),
                    });
                }
            }
        }

        if self.bus.kind == BusKind::Jsonl && self.bus.path.is_none() {
            return Err(PipelineError::Config(
                "The jsonl bus requires a `path`".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_names<'a>(component: &'static str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(PipelineError::Config(format!("A {} has an empty name", component)));
        }
        if !seen.insert(name) {
            return Err(PipelineError::DuplicateName {
                component,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}
