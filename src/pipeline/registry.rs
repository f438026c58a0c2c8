//! Kind-name → constructor registry.
//!
//! Configuration refers to triggers, classifiers and ingestors by kind name
//! (`"script"`, `"synthetic"`, ...). The [`Registry`] maps each name to a
//! constructor closure. [`Registry::with_builtins`] installs every kind that
//! ships with the crate; embedding applications may register their own
//! before composing a pipeline.

use crate::classifier::{Classifier, NoopClassifier, ScriptClassifier};
use crate::config::{ClassifierConfig, IngestorConfig, TriggerConfig};
use crate::episode::BacklogPolicy;
use crate::error::{PipelineError, Result};
use crate::ingestion::{
    DirectorySource, Ingestor, RetryPolicy, SourceIngestor, SyntheticSource,
};
use crate::scripting::ExpressionEngine;
use crate::trigger::{BypassTrigger, EveryNthTrigger, ScriptTrigger, Trigger};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a constructor gets to work with
pub struct BuildContext<'a> {
    pub component: &'static str,
    pub name: &'a str,
    pub options: &'a serde_json::Value,
    pub engine: &'a Arc<ExpressionEngine>,
}

impl BuildContext<'_> {
    /// Deserialize the kind-specific options; a missing table means all defaults
    pub fn options<T: DeserializeOwned>(&self) -> Result<T> {
        let value = if self.options.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.options.clone()
        };
        serde_json::from_value(value).map_err(|e| {
            PipelineError::Config(format!(
                "Invalid options for {} '{}': {}",
                self.component, self.name, e
            ))
        })
    }
}

pub type TriggerCtor =
    Box<dyn Fn(&BuildContext<'_>, BacklogPolicy) -> Result<Arc<dyn Trigger>> + Send + Sync>;
pub type ClassifierCtor =
    Box<dyn Fn(&BuildContext<'_>) -> Result<Arc<dyn Classifier>> + Send + Sync>;
pub type IngestorCtor =
    Box<dyn Fn(&BuildContext<'_>, RetryPolicy) -> Result<Arc<dyn Ingestor>> + Send + Sync>;

pub struct Registry {
    engine: Arc<ExpressionEngine>,
    triggers: BTreeMap<String, TriggerCtor>,
    classifiers: BTreeMap<String, ClassifierCtor>,
    ingestors: BTreeMap<String, IngestorCtor>,
}

impl Registry {
    /// An empty registry sharing one expression engine among its script kinds
    pub fn new() -> Self {
        Self {
            engine: Arc::new(ExpressionEngine::new()),
            triggers: BTreeMap::new(),
            classifiers: BTreeMap::new(),
            ingestors: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_trigger("bypass", |ctx, backlog| {
            Ok(Arc::new(BypassTrigger::new(ctx.name, backlog, ctx.options()?)))
        });
        registry.register_trigger("every_nth", |ctx, backlog| {
            Ok(Arc::new(EveryNthTrigger::new(ctx.name, backlog, ctx.options()?)?))
        });
        registry.register_trigger("script", |ctx, backlog| {
            let trigger =
                ScriptTrigger::new(ctx.name, backlog, Arc::clone(ctx.engine), ctx.options()?)?;
            Ok(Arc::new(trigger))
        });

        registry.register_classifier("noop", |_| Ok(Arc::new(NoopClassifier)));
        registry.register_classifier("script", |ctx| {
            let classifier =
                ScriptClassifier::new(ctx.name, Arc::clone(ctx.engine), ctx.options()?)?;
            Ok(Arc::new(classifier))
        });

        registry.register_ingestor("synthetic", |ctx, retry| {
            let source = SyntheticSource::new(ctx.options()?);
            Ok(Arc::new(SourceIngestor::new(ctx.name, source, retry)))
        });
        registry.register_ingestor("directory", |ctx, retry| {
            let source = DirectorySource::new(ctx.options()?);
            Ok(Arc::new(SourceIngestor::new(ctx.name, source, retry)))
        });

        registry
    }

    pub fn engine(&self) -> &Arc<ExpressionEngine> {
        &self.engine
    }

    pub fn register_trigger<F>(&mut self, kind: impl Into<String>, ctor: F)
    where
        F: Fn(&BuildContext<'_>, BacklogPolicy) -> Result<Arc<dyn Trigger>> + Send + Sync + 'static,
    {
        self.triggers.insert(kind.into(), Box::new(ctor));
    }

    pub fn register_classifier<F>(&mut self, kind: impl Into<String>, ctor: F)
    where
        F: Fn(&BuildContext<'_>) -> Result<Arc<dyn Classifier>> + Send + Sync + 'static,
    {
        self.classifiers.insert(kind.into(), Box::new(ctor));
    }

    pub fn register_ingestor<F>(&mut self, kind: impl Into<String>, ctor: F)
    where
        F: Fn(&BuildContext<'_>, RetryPolicy) -> Result<Arc<dyn Ingestor>> + Send + Sync + 'static,
    {
        self.ingestors.insert(kind.into(), Box::new(ctor));
    }

    pub fn trigger_kinds(&self) -> impl Iterator<Item = &str> {
        self.triggers.keys().map(String::as_str)
    }

    pub fn classifier_kinds(&self) -> impl Iterator<Item = &str> {
        self.classifiers.keys().map(String::as_str)
    }

    pub fn ingestor_kinds(&self) -> impl Iterator<Item = &str> {
        self.ingestors.keys().map(String::as_str)
    }

    fn context<'a>(
        &'a self,
        component: &'static str,
        name: &'a str,
        options: &'a serde_json::Value,
    ) -> BuildContext<'a> {
        BuildContext {
            component,
            name,
            options,
            engine: &self.engine,
        }
    }

    pub fn build_trigger(&self, config: &TriggerConfig) -> Result<Arc<dyn Trigger>> {
        let ctor = self
            .triggers
            .get(&config.kind)
            .ok_or_else(|| PipelineError::UnknownKind {
                component: "trigger",
                kind: config.kind.clone(),
            })?;
        ctor(&self.context("trigger", &config.name, &config.options), config.backlog)
    }

    pub fn build_classifier(&self, config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
        let ctor = self
            .classifiers
            .get(&config.kind)
            .ok_or_else(|| PipelineError::UnknownKind {
                component: "classifier",
                kind: config.kind.clone(),
            })?;
        ctor(&self.context("classifier", &config.name, &config.options))
    }

    pub fn build_ingestor(&self, config: &IngestorConfig) -> Result<Arc<dyn Ingestor>> {
        let ctor = self
            .ingestors
            .get(&config.kind)
            .ok_or_else(|| PipelineError::UnknownKind {
                component: "ingestor",
                kind: config.kind.clone(),
            })?;
        ctor(&self.context("ingestor", &config.name, &config.options), config.retry)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceKind;
    use serde_json::json;

    fn trigger_config(kind: &str, options: serde_json::Value) -> TriggerConfig {
        TriggerConfig {
            name: "t".into(),
            kind: kind.into(),
            options,
            backlog: BacklogPolicy::default(),
        }
    }

    #[test]
    fn test_builtin_kinds() {
        let registry = Registry::with_builtins();
        assert_eq!(
            registry.trigger_kinds().collect::<Vec<_>>(),
            vec!["bypass", "every_nth", "script"]
        );
        assert_eq!(
            registry.classifier_kinds().collect::<Vec<_>>(),
            vec!["noop", "script"]
        );
        assert_eq!(
            registry.ingestor_kinds().collect::<Vec<_>>(),
            vec!["directory", "synthetic"]
        );
    }

    #[test]
    fn test_unknown_kind_is_configuration_error() {
        let registry = Registry::with_builtins();
        let err = registry
            .build_trigger(&trigger_config("laser", json!({})))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::UnknownKind { component: "trigger", .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_options_are_parsed() {
        let registry = Registry::with_builtins();
        let trigger = registry
            .build_trigger(&trigger_config(
                "every_nth",
                json!({ "length": 4, "sources": ["episode"] }),
            ))
            .unwrap();
        assert_eq!(
            trigger.supported_sources().into_iter().collect::<Vec<_>>(),
            vec![SourceKind::Episode]
        );

        let bad = registry
            .build_trigger(&trigger_config("bypass", json!({ "colour": "red" })))
            .err()
            .unwrap();
        assert!(bad.to_string().contains("Invalid options for trigger 't'"));
    }

    #[test]
    fn test_null_options_mean_defaults() {
        let registry = Registry::with_builtins();
        let trigger = registry
            .build_trigger(&trigger_config("bypass", serde_json::Value::Null))
            .unwrap();
        assert_eq!(trigger.name(), "t");
    }

    #[test]
    fn test_custom_kind() {
        let mut registry = Registry::new();
        registry.register_classifier("always_one", |_| Ok(Arc::new(NoopClassifier)));
        let config = ClassifierConfig {
            name: "c".into(),
            kind: "always_one".into(),
            trigger: crate::config::TriggerRef::Single("t".into()),
            workers: 1,
            options: json!({}),
            rollover: Default::default(),
        };
        assert!(registry.build_classifier(&config).is_ok());
    }
}
