//! Error handling for the episode pipeline
//!
//! This module defines the crate error type and a Result alias used
//! throughout the pipeline. Configuration and wiring errors halt startup;
//! every other kind is contained at the sample, episode or ingestor that
//! produced it and only ever reaches the logs.

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A component kind that is not present in the registry
    #[error("Unknown {component} kind '{kind}'")]
    UnknownKind { component: &'static str, kind: String },

    /// A reference to a named component that was never declared
    #[error("Unknown {component} '{name}'")]
    UnknownReference { component: &'static str, name: String },

    /// Two components registered under the same name
    #[error("Duplicate {component} name '{name}'")]
    DuplicateName { component: &'static str, name: String },

    /// A trigger already has its one downstream consumer
    #[error("Trigger '{0}' already has a downstream consumer bound")]
    AlreadyBound(String),

    /// None of a trigger's declared source kinds exist in the ingestion manager
    #[error("Trigger '{trigger}' supports {supported}, but no such ingestor is configured")]
    NoMatchingSource { trigger: String, supported: String },

    /// Errors related to Rhai script compilation or evaluation
    #[error("Script error: {0}")]
    Script(String),

    /// A classifier failed on a single sample
    #[error("Classification error: {0}")]
    Classification(String),

    /// The message bus rejected a record
    #[error("Publish error on topic '{topic}': {message}")]
    Publish { topic: String, message: String },

    /// Errors reported by an ingestor's data source
    #[error("Source error: {0}")]
    Source(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// Operation attempted after shutdown
    #[error("Shut down: {0}")]
    Shutdown(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        PipelineError::Script(err.to_string())
    }

    /// Whether this error belongs to the wiring/configuration class.
    ///
    /// Only these are allowed to stop the pipeline from starting.
    pub fn is_configuration(&self) -> bool {
        match self {
            PipelineError::Config(_)
            | PipelineError::UnknownKind { .. }
            | PipelineError::UnknownReference { .. }
            | PipelineError::DuplicateName { .. }
            | PipelineError::AlreadyBound(_)
            | PipelineError::NoMatchingSource { .. } => true,
            PipelineError::WithContext { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<rhai::ParseError> for PipelineError {
    fn from(err: rhai::ParseError) -> Self {
        PipelineError::Script(err.to_string())
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PipelineError::from_rhai_error(e).with_context(f()))
    }
}
