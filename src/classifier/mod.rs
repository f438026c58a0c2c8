//! Classification of episode samples.
//!
//! A [`Classifier`] turns one frame into detections. A
//! [`ClassifierDispatcher`] binds a classifier to a trigger and walks every
//! episode the trigger starts on its own [`WorkerPool`], emitting one
//! [`MetaRecord`](crate::types::MetaRecord) per sample and one
//! [`SummaryRecord`](crate::types::SummaryRecord) per episode.

pub mod counter;
pub mod dispatcher;
pub mod pool;
pub mod script;

pub use counter::{RolloverConfig, RolloverCounter};
pub use dispatcher::{ClassifierDispatcher, DispatcherStats};
pub use pool::WorkerPool;
pub use script::{ScriptClassifier, ScriptClassifierOptions};

use crate::error::Result;
use crate::types::{Detection, Frame, UserData};

/// Produces detections for a single sample
#[cfg_attr(test, mockall::automock)]
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        sample_index: u64,
        frame: &Frame,
        user_data: UserData,
    ) -> Result<Vec<Detection>>;
}

/// Classifier that never detects anything
#[derive(Debug, Default)]
pub struct NoopClassifier;

impl Classifier for NoopClassifier {
    fn classify(&self, _: u64, _: &Frame, _: UserData) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}
