//! Single-episode hand-off between a trigger and its consumer.
//!
//! An [`EpisodeIterator`] is created by a trigger when an episode starts,
//! seeded with the initiating sample. The trigger keeps enqueuing samples
//! with [`EpisodeIterator::put`] while a classifier worker pulls them with
//! [`EpisodeIterator::next`]. It is the unit of cancellation and of error
//! containment:
//!
//! - **Graceful stop** lets the consumer drain the backlog, then yields [`Next::Done`].
//! - **Full stop** yields [`Next::Done`] on the very next call and discards the backlog.
//! - **Error** drains the backlog immediately, turns every later `put` into a
//!   no-op and yields [`Next::Errored`].
//!
//! # Backlog
//!
//! `put` never blocks the producing trigger. The backlog is bounded by a
//! [`BacklogPolicy`]; with the default `DropOldest` policy the oldest queued
//! sample is discarded once capacity is reached.

use crate::types::{EpisodeId, Sample};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Default maximum number of queued samples per episode
pub const DEFAULT_BACKLOG_CAPACITY: usize = 4096;

/// Result of pulling from an episode
#[derive(Debug, Clone)]
pub enum Next {
    /// The next sample in submission order
    Sample(Sample),
    /// The episode finished (graceful stop with empty backlog, or full stop)
    Done,
    /// The episode was marked errored; its backlog has been discarded
    Errored,
}

/// How an episode was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopMode {
    /// Drain the backlog, then finish
    Graceful,
    /// Finish immediately, discarding the backlog
    Full,
}

/// Bound applied to an episode's queued samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BacklogPolicy {
    /// Never discard; memory grows with the backlog
    Unbounded,
    /// Discard the oldest queued sample once `capacity` samples are waiting
    DropOldest { capacity: usize },
}

impl Default for BacklogPolicy {
    fn default() -> Self {
        BacklogPolicy::DropOldest {
            capacity: DEFAULT_BACKLOG_CAPACITY,
        }
    }
}

/// Counters describing one episode's queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpisodeStats {
    /// Samples accepted by `put` (including the initiating sample)
    pub enqueued: u64,
    /// Samples discarded by the backlog policy
    pub dropped: u64,
    /// Samples currently waiting
    pub backlog: usize,
}

struct Inner {
    queue: VecDeque<Sample>,
    stop: Option<StopMode>,
    errored: bool,
    enqueued: u64,
    dropped: u64,
}

/// Thread-safe queue for the samples of one episode
pub struct EpisodeIterator {
    id: EpisodeId,
    trigger: String,
    policy: BacklogPolicy,
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl EpisodeIterator {
    /// Create a new episode seeded with its initiating sample
    pub fn new(trigger: impl Into<String>, first: Sample, policy: BacklogPolicy) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(first);
        Self {
            id: EpisodeId::new(),
            trigger: trigger.into(),
            policy,
            inner: Mutex::new(Inner {
                queue,
                stop: None,
                errored: false,
                enqueued: 1,
                dropped: 0,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn id(&self) -> EpisodeId {
        self.id
    }

    /// Name of the trigger that produced this episode
    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a sample.
    ///
    /// Discarded silently once the episode is errored or a stop was requested.
    pub fn put(&self, sample: Sample) {
        let mut inner = self.lock();
        if inner.errored || inner.stop.is_some() {
            return;
        }

        if let BacklogPolicy::DropOldest { capacity } = self.policy {
            while inner.queue.len() >= capacity.max(1) {
                inner.queue.pop_front();
                inner.dropped += 1;
                if inner.dropped == 1 {
                    tracing::warn!(
                        "Episode {} of trigger '{}' reached backlog capacity {}, dropping oldest samples",
                        self.id,
                        self.trigger,
                        capacity
                    );
                }
            }
        }

        inner.queue.push_back(sample);
        inner.enqueued += 1;
        drop(inner);
        self.ready.notify_one();
    }

    /// Block until a sample is available or the episode ends.
    ///
    /// There is no timeout: a consumer blocked here is released only by a
    /// new sample, a stop request or `set_error`.
    pub fn next(&self) -> Next {
        let mut inner = self.lock();
        loop {
            if inner.errored {
                return Next::Errored;
            }
            if inner.stop == Some(StopMode::Full) {
                return Next::Done;
            }
            if let Some(sample) = inner.queue.pop_front() {
                return Next::Sample(sample);
            }
            if inner.stop == Some(StopMode::Graceful) {
                return Next::Done;
            }
            inner = self
                .ready
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Current backlog depth
    pub fn size(&self) -> usize {
        self.lock().queue.len()
    }

    /// Ask the consumer to finish.
    ///
    /// A full stop overrides an earlier graceful one; the reverse is ignored.
    pub fn request_stop(&self, graceful: bool) {
        let discarded = {
            let mut inner = self.lock();
            if graceful {
                if inner.stop.is_none() {
                    inner.stop = Some(StopMode::Graceful);
                }
                VecDeque::new()
            } else {
                inner.stop = Some(StopMode::Full);
                std::mem::take(&mut inner.queue)
            }
        };
        self.ready.notify_all();

        if !discarded.is_empty() {
            tracing::debug!(
                "Full stop of episode {} discarded {} queued samples",
                self.id,
                discarded.len()
            );
        }
    }

    /// Mark the episode errored and release every queued sample
    pub fn set_error(&self) {
        let drained = {
            let mut inner = self.lock();
            inner.errored = true;
            std::mem::take(&mut inner.queue)
        };
        self.ready.notify_all();
        drop(drained);
    }

    pub fn is_errored(&self) -> bool {
        self.lock().errored
    }

    /// Samples discarded by the backlog policy so far
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn stop_mode(&self) -> Option<StopMode> {
        self.lock().stop
    }

    pub fn stats(&self) -> EpisodeStats {
        let inner = self.lock();
        EpisodeStats {
            enqueued: inner.enqueued,
            dropped: inner.dropped,
            backlog: inner.queue.len(),
        }
    }

    /// Borrowing iterator that yields samples until the episode ends
    pub fn samples(&self) -> Samples<'_> {
        Samples { episode: self }
    }
}

impl std::fmt::Debug for EpisodeIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpisodeIterator")
            .field("id", &self.id)
            .field("trigger", &self.trigger)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Iterator adapter over [`EpisodeIterator::next`]; ends on `Done` or `Errored`
pub struct Samples<'a> {
    episode: &'a EpisodeIterator,
}

impl Iterator for Samples<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        match self.episode.next() {
            Next::Sample(sample) => Some(sample),
            Next::Done | Next::Errored => None,
        }
    }
}
