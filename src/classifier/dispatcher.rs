//! ClassifierDispatcher: episodes in, result records out.
//!
//! The dispatcher is bound to the tail trigger of its chain. Each started
//! episode becomes one job on the dispatcher's [`WorkerPool`]; the trigger
//! thread only pays for a channel send. The worker walks the episode to the
//! end, classifying every sample.
//!
//! # Error containment
//!
//! - A failing or panicking `classify` call counts as zero detections for
//!   that sample only.
//! - A failure while walking the episode itself marks the episode errored,
//!   which drains its backlog and stops further enqueues.
//! - The summary record is published in both cases.

use crate::bus::{MessageBus, Topics};
use crate::classifier::{Classifier, RolloverConfig, RolloverCounter, WorkerPool};
use crate::episode::{EpisodeIterator, Next};
use crate::error::{PipelineError, Result};
use crate::trigger::Trigger;
use crate::types::{EpisodeId, MetaRecord, Sample, SampleRef, SummaryRecord};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Snapshot of a dispatcher's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub episodes_submitted: u64,
    pub episodes_completed: u64,
    pub episodes_failed: u64,
    pub samples_classified: u64,
    pub classification_errors: u64,
}

#[derive(Default)]
struct Counters {
    episodes_submitted: AtomicU64,
    episodes_completed: AtomicU64,
    episodes_failed: AtomicU64,
    samples_classified: AtomicU64,
    classification_errors: AtomicU64,
}

struct RecordIndices {
    meta: RolloverCounter,
    summary: RolloverCounter,
}

#[derive(Default)]
struct Tally {
    samples: u64,
    class_counts: BTreeMap<u32, u64>,
}

pub struct ClassifierDispatcher {
    name: String,
    classifier: Arc<dyn Classifier>,
    pool: WorkerPool,
    bus: Option<Arc<dyn MessageBus>>,
    topics: Topics,
    indices: Mutex<RecordIndices>,
    counters: Counters,
}

impl ClassifierDispatcher {
    pub fn new(
        name: impl Into<String>,
        classifier: Arc<dyn Classifier>,
        workers: usize,
        rollover: RolloverConfig,
        bus: Option<Arc<dyn MessageBus>>,
        topics: Topics,
    ) -> Result<Self> {
        let name = name.into();
        if rollover.reset_to > rollover.max {
            return Err(PipelineError::Config(format!(
                "Classifier '{}': rollover reset_to {} exceeds max {}",
                name, rollover.reset_to, rollover.max
            )));
        }
        let pool = WorkerPool::new(name.clone(), workers)?;
        Ok(Self {
            name,
            classifier,
            pool,
            bus,
            topics,
            indices: Mutex::new(RecordIndices {
                meta: RolloverCounter::new(rollover),
                summary: RolloverCounter::new(rollover),
            }),
            counters: Counters::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Become the single downstream consumer of `trigger`
    pub fn bind_to(self: &Arc<Self>, trigger: &dyn Trigger) -> Result<()> {
        let dispatcher = Arc::clone(self);
        trigger.bind(Arc::new(move |episode: Arc<EpisodeIterator>| {
            dispatcher.submit(episode)
        }))?;
        tracing::info!(
            "Classifier '{}' bound to trigger '{}' with {} workers",
            self.name,
            trigger.name(),
            self.pool.size()
        );
        Ok(())
    }

    /// Queue an episode for classification; never blocks
    pub fn submit(self: &Arc<Self>, episode: Arc<EpisodeIterator>) {
        self.counters.episodes_submitted.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(self);
        let job_episode = Arc::clone(&episode);
        if let Err(e) = self.pool.submit(Box::new(move || this.process(job_episode))) {
            tracing::warn!(
                "Classifier '{}' dropped episode {}: {}",
                self.name,
                episode.id(),
                e
            );
            episode.set_error();
            self.counters.episodes_failed.fetch_add(1, Ordering::Relaxed);
            self.publish_summary(episode.id(), Tally::default(), true);
        }
    }

    fn process(&self, episode: Arc<EpisodeIterator>) {
        tracing::debug!(
            "Classifier '{}' processing episode {} from '{}'",
            self.name,
            episode.id(),
            episode.trigger()
        );

        let mut tally = Tally::default();
        let walked = panic::catch_unwind(AssertUnwindSafe(|| self.walk(&episode, &mut tally)));
        let failure = match walked {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("panic while walking episode".to_string()),
        };

        let errored = match failure {
            Some(reason) => {
                tracing::error!(
                    "Classifier '{}' failed episode {}: {}",
                    self.name,
                    episode.id(),
                    reason
                );
                episode.set_error();
                self.counters.episodes_failed.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                self.counters.episodes_completed.fetch_add(1, Ordering::Relaxed);
                false
            }
        };

        self.publish_summary(episode.id(), tally, errored);
    }

    fn walk(&self, episode: &EpisodeIterator, tally: &mut Tally) -> Result<()> {
        loop {
            match episode.next() {
                Next::Sample(sample) => self.classify_sample(episode.id(), sample, tally),
                Next::Done => return Ok(()),
                Next::Errored => {
                    return Err(PipelineError::Channel(format!(
                        "episode {} was marked errored",
                        episode.id()
                    )))
                }
            }
        }
    }

    fn classify_sample(&self, episode_id: EpisodeId, sample: Sample, tally: &mut Tally) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.classifier
                .classify(sample.index, &sample.payload, sample.user_data)
        }));

        let detections = match outcome {
            Ok(Ok(detections)) => detections,
            Ok(Err(e)) => {
                self.classification_failed(episode_id, sample.index, &e.to_string());
                Vec::new()
            }
            Err(_) => {
                self.classification_failed(episode_id, sample.index, "classifier panicked");
                Vec::new()
            }
        };

        self.counters.samples_classified.fetch_add(1, Ordering::Relaxed);
        tally.samples += 1;
        for detection in &detections {
            *tally.class_counts.entry(detection.class_id).or_insert(0) += 1;
        }

        let record = MetaRecord {
            index: self.lock_indices().meta.next_value(),
            timestamp: Utc::now(),
            episode_id,
            classifier: self.name.clone(),
            sample: SampleRef {
                sample_index: sample.index,
                frame: sample.payload.handle.clone(),
                user_data: sample.user_data,
            },
            detections,
        };
        self.publish(&self.topics.meta, &record);
    }

    fn classification_failed(&self, episode_id: EpisodeId, sample_index: u64, reason: &str) {
        self.counters
            .classification_errors
            .fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "Classifier '{}' failed on sample {} of episode {}: {}",
            self.name,
            sample_index,
            episode_id,
            reason
        );
    }

    fn publish_summary(&self, episode_id: EpisodeId, tally: Tally, errored: bool) {
        let record = SummaryRecord {
            index: self.lock_indices().summary.next_value(),
            timestamp: Utc::now(),
            episode_id,
            classifier: self.name.clone(),
            sample_count: tally.samples,
            class_counts: tally.class_counts,
            errored,
        };
        tracing::debug!(
            "Classifier '{}' finished episode {}: {} samples, {} detections",
            self.name,
            episode_id,
            record.sample_count,
            record.total_detections()
        );
        self.publish(&self.topics.summary, &record);
    }

    fn publish<T: Serialize>(&self, topic: &str, record: &T) {
        let Some(bus) = &self.bus else {
            return;
        };
        let result = serde_json::to_value(record)
            .map_err(PipelineError::from)
            .and_then(|value| bus.publish(topic, &value));
        if let Err(e) = result {
            tracing::warn!("Classifier '{}' could not publish to '{}': {}", self.name, topic, e);
        }
    }

    fn lock_indices(&self) -> std::sync::MutexGuard<'_, RecordIndices> {
        self.indices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            episodes_submitted: self.counters.episodes_submitted.load(Ordering::Relaxed),
            episodes_completed: self.counters.episodes_completed.load(Ordering::Relaxed),
            episodes_failed: self.counters.episodes_failed.load(Ordering::Relaxed),
            samples_classified: self.counters.samples_classified.load(Ordering::Relaxed),
            classification_errors: self.counters.classification_errors.load(Ordering::Relaxed),
        }
    }

    /// Finish queued and running episodes, then stop the workers
    pub fn shutdown(&self) {
        tracing::info!("Shutting down classifier '{}'", self.name);
        self.pool.shutdown();
    }
}
