//! Chaining of triggers.
//!
//! A chain stage consumes the episodes of the stage before it as a plain
//! sample stream. [`link`] binds the upstream trigger with a callback that
//! queues each started episode for a single forwarding thread. The thread
//! walks the episodes one after another, in start order, and feeds every
//! sample into the downstream trigger's `process_data` using the upstream
//! trigger's name as the source name.
//!
//! The returned [`ChainLink`] owns that thread. Closing it lets the
//! forwarder finish every queued episode and then joins it, so a teardown
//! that closes links head first never loses samples from episodes that
//! were already closed gracefully.

use crate::episode::EpisodeIterator;
use crate::error::{PipelineError, Result, ResultExt};
use crate::trigger::{describe_sources, Trigger};
use crate::types::SourceKind;
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

type EpisodeSender = Arc<Mutex<Option<Sender<Arc<EpisodeIterator>>>>>;

/// Forwarding thread between two chained triggers
pub struct ChainLink {
    upstream: String,
    downstream: String,
    tx: EpisodeSender,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ChainLink {
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn downstream(&self) -> &str {
        &self.downstream
    }

    /// True until [`ChainLink::close`] has been called
    pub fn is_open(&self) -> bool {
        lock(&self.tx).is_some()
    }

    /// Stop accepting episodes, forward everything already queued, and join
    /// the forwarding thread.
    ///
    /// The upstream trigger should be stopped first; a live upstream episode
    /// keeps the forwarder blocked until it ends. Safe to call more than once.
    pub fn close(&self) {
        lock(&self.tx).take();

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!(
                "Forwarding thread '{}' -> '{}' panicked",
                self.upstream,
                self.downstream
            );
        }
    }
}

impl std::fmt::Debug for ChainLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainLink")
            .field("upstream", &self.upstream)
            .field("downstream", &self.downstream)
            .field("open", &self.is_open())
            .finish()
    }
}

fn lock(tx: &EpisodeSender) -> MutexGuard<'_, Option<Sender<Arc<EpisodeIterator>>>> {
    tx.lock().unwrap_or_else(PoisonError::into_inner)
}

fn forward(
    rx: Receiver<Arc<EpisodeIterator>>,
    source_name: String,
    downstream: Arc<dyn Trigger>,
) {
    for episode in rx.iter() {
        for sample in episode.samples() {
            downstream.process_data(&source_name, sample.payload);
        }
        tracing::trace!(
            "Forwarded episode {} from '{}' to '{}'",
            episode.id(),
            source_name,
            downstream.name()
        );
    }
}

/// Feed the episodes of `upstream` into `downstream`.
///
/// Fails when `downstream` does not accept [`SourceKind::Episode`] or when
/// `upstream` already has a consumer.
pub fn link(
    upstream: &Arc<dyn Trigger>,
    downstream: Arc<dyn Trigger>,
) -> Result<Arc<ChainLink>> {
    let supported = downstream.supported_sources();
    if !supported.contains(&SourceKind::Episode) {
        return Err(PipelineError::NoMatchingSource {
            trigger: downstream.name().to_string(),
            supported: describe_sources(&supported),
        }
        .with_context(format!(
            "Cannot chain '{}' after '{}'",
            downstream.name(),
            upstream.name()
        )));
    }

    let source_name = upstream.name().to_string();
    let (tx, rx) = crossbeam_channel::unbounded::<Arc<EpisodeIterator>>();
    let tx: EpisodeSender = Arc::new(Mutex::new(Some(tx)));

    let queue = Arc::clone(&tx);
    let from = source_name.clone();
    upstream.bind(Arc::new(move |episode: Arc<EpisodeIterator>| {
        let delivered = match lock(&queue).as_ref() {
            Some(tx) => tx.send(Arc::clone(&episode)).is_ok(),
            None => false,
        };
        if !delivered {
            tracing::warn!(
                "Chain after '{}' is closed, dropping episode {}",
                from,
                episode.id()
            );
            episode.set_error();
        }
    }))?;

    let downstream_name = downstream.name().to_string();
    let handle = thread::Builder::new()
        .name(format!("chain-{}", source_name))
        .spawn({
            let source_name = source_name.clone();
            move || forward(rx, source_name, downstream)
        })
        .map_err(PipelineError::from)
        .with_context(|| format!("Spawning forwarding thread for '{}'", source_name))?;

    tracing::info!("Chaining trigger '{}' -> '{}'", source_name, downstream_name);
    Ok(Arc::new(ChainLink {
        upstream: source_name,
        downstream: downstream_name,
        tx,
        handle: Mutex::new(Some(handle)),
    }))
}
