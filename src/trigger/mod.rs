//! Triggers decide when an episode starts, continues and ends.
//!
//! A trigger sits between the ingestors and a classifier. Every frame from
//! the sources it subscribes to arrives through [`Trigger::process_data`] on
//! the ingestor's own thread, so `on_data` implementations must stay cheap.
//!
//! # Structure
//!
//! - [`Trigger`] - the capability concrete trigger logic implements
//! - [`TriggerCore`] - per-instance state machine and episode ownership,
//!   embedded by every concrete trigger
//!
//! # State machine
//!
//! ```text
//! Idle ──send_start──► Triggered ──send_stop──► Stopped ──send_start──► Triggered ...
//!                          │
//!                          └──stop()──► FullStopped (permanent)
//! ```
//!
//! A trigger owns at most one live [`EpisodeIterator`] at a time. Exactly one
//! downstream consumer may be bound, once, by the composition root.

pub mod bypass;
pub mod chain;
pub mod every_nth;
pub mod script;

pub use bypass::BypassTrigger;
pub use chain::{link, ChainLink};
pub use every_nth::EveryNthTrigger;
pub use script::ScriptTrigger;

use crate::episode::{BacklogPolicy, EpisodeIterator};
use crate::error::{PipelineError, Result};
use crate::types::{Payload, Sample, SourceKind, UserData};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Downstream consumer invoked once per started episode
pub type EpisodeCallback = Arc<dyn Fn(Arc<EpisodeIterator>) + Send + Sync>;

/// Lifecycle of the trigger's current episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    /// No episode has started yet
    Idle,
    /// An episode is live
    Triggered,
    /// The last episode was closed gracefully
    Stopped,
    /// The trigger was shut down; no further episodes start
    FullStopped,
}

struct CoreState {
    state: TriggerState,
    episode: Option<Arc<EpisodeIterator>>,
    sample_index: u64,
}

/// Shared episode bookkeeping for concrete triggers.
///
/// All transitions take the same per-instance mutex. Different triggers
/// never share a lock.
pub struct TriggerCore {
    name: String,
    backlog: BacklogPolicy,
    state: Mutex<CoreState>,
    stopped: AtomicBool,
    callback: OnceLock<EpisodeCallback>,
    episodes_started: AtomicU64,
}

impl TriggerCore {
    pub fn new(name: impl Into<String>, backlog: BacklogPolicy) -> Self {
        Self {
            name: name.into(),
            backlog,
            state: Mutex::new(CoreState {
                state: TriggerState::Idle,
                episode: None,
                sample_index: 0,
            }),
            stopped: AtomicBool::new(false),
            callback: OnceLock::new(),
            episodes_started: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the single downstream consumer
    pub fn bind(&self, callback: EpisodeCallback) -> Result<()> {
        self.callback
            .set(callback)
            .map_err(|_| PipelineError::AlreadyBound(self.name.clone()))
    }

    pub fn is_bound(&self) -> bool {
        self.callback.get().is_some()
    }

    /// Start an episode seeded with `payload`.
    ///
    /// If an episode is already live the sample is appended to it instead,
    /// so concurrent producers racing to start never create two episodes.
    /// The bound callback runs under the trigger lock and must not call
    /// back into this trigger.
    pub fn send_start(&self, payload: Payload, user_data: UserData) {
        let mut st = self.lock();
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        if st.state == TriggerState::Triggered {
            Self::enqueue(&mut st, payload, user_data);
            return;
        }

        let Some(callback) = self.callback.get() else {
            tracing::warn!(
                "Trigger '{}' has no downstream consumer, ignoring start signal",
                self.name
            );
            return;
        };

        let episode = Arc::new(EpisodeIterator::new(
            self.name.clone(),
            Sample::new(0, payload, user_data),
            self.backlog,
        ));
        st.state = TriggerState::Triggered;
        st.sample_index = 1;
        st.episode = Some(Arc::clone(&episode));
        self.episodes_started.fetch_add(1, Ordering::Relaxed);

        tracing::debug!("Trigger '{}' started episode {}", self.name, episode.id());
        callback(episode);
    }

    /// Append a sample to the live episode; no-op when not triggered
    pub fn send_data(&self, payload: Payload, user_data: UserData) {
        let mut st = self.lock();
        if st.state == TriggerState::Triggered {
            Self::enqueue(&mut st, payload, user_data);
        }
    }

    fn enqueue(st: &mut CoreState, payload: Payload, user_data: UserData) {
        if let Some(episode) = &st.episode {
            episode.put(Sample::new(st.sample_index, payload, user_data));
            st.sample_index += 1;
        }
    }

    /// Close the live episode gracefully; its backlog is still delivered
    pub fn send_stop(&self) {
        let mut st = self.lock();
        if let Some(episode) = st.episode.take() {
            episode.request_stop(true);
            tracing::debug!(
                "Trigger '{}' stopped episode {} after {} samples",
                self.name,
                episode.id(),
                st.sample_index
            );
        }
        st.sample_index = 0;
        if st.state == TriggerState::Triggered {
            st.state = TriggerState::Stopped;
        }
    }

    /// Shut the trigger down permanently, cutting any live episode short
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let mut st = self.lock();
        if let Some(episode) = st.episode.take() {
            episode.request_stop(false);
            tracing::debug!(
                "Trigger '{}' fully stopped episode {}",
                self.name,
                episode.id()
            );
        }
        st.sample_index = 0;
        st.state = TriggerState::FullStopped;
    }

    /// True once [`TriggerCore::stop`] has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_triggered(&self) -> bool {
        self.lock().state == TriggerState::Triggered
    }

    pub fn state(&self) -> TriggerState {
        self.lock().state
    }

    /// The live episode, if any
    pub fn current_episode(&self) -> Option<Arc<EpisodeIterator>> {
        self.lock().episode.clone()
    }

    pub fn episodes_started(&self) -> u64 {
        self.episodes_started.load(Ordering::Relaxed)
    }
}

/// A stateful filter deciding episode boundaries from a stream of frames
pub trait Trigger: Send + Sync {
    /// Embedded episode state
    fn core(&self) -> &TriggerCore;

    /// Source kinds this trigger can consume
    fn supported_sources(&self) -> BTreeSet<SourceKind>;

    /// Called for every incoming frame; decides whether to start, continue or stop
    fn on_data(&self, source: &str, payload: Payload);

    fn name(&self) -> &str {
        self.core().name()
    }

    /// Entry point used by ingestors; ignores frames once the trigger is stopped
    fn process_data(&self, source: &str, payload: Payload) {
        if self.core().is_stopped() {
            return;
        }
        self.on_data(source, payload);
    }

    /// Bind the single downstream consumer
    fn bind(&self, callback: EpisodeCallback) -> Result<()> {
        self.core().bind(callback)
    }

    /// Full, permanent shutdown
    fn stop(&self) {
        self.core().stop();
    }
}

/// Format a set of source kinds for error messages
pub(crate) fn describe_sources(sources: &BTreeSet<SourceKind>) -> String {
    let names: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
    format!("[{}]", names.join(", "))
}
