//! Supervised ingestion thread around a [`FrameSource`].
//!
//! [`SourceIngestor`] drives a source on a named thread. A failing `open` or
//! `next_frame` closes the source and reopens it after an exponential
//! backoff delay, up to [`RetryPolicy::max_retries`] consecutive failures.
//! The thread exits when the source is exhausted, the retry budget is
//! spent, or [`Ingestor::stop`] is called. Failures never propagate past
//! the thread; consumers only observe that frames stop arriving.

use crate::error::{PipelineError, Result};
use crate::ingestion::{Ingestor, Interest};
use crate::types::{Frame, SourceKind};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A pull-based producer of frames
pub trait FrameSource: Send + 'static {
    fn kind(&self) -> SourceKind;

    /// (Re)acquire the underlying resource
    fn open(&mut self) -> Result<()>;

    /// Next frame, or `None` once the source is exhausted
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying resource
    fn close(&mut self) {}

    /// Delay between frames, if the source is rate limited
    fn pace(&self) -> Option<Duration> {
        None
    }
}

/// Bounded exponential retry for source failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before the ingestor gives up
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        let initial = Duration::from_millis(self.initial_backoff_ms);
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            max_interval: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            multiplier: 2.0,
            randomization_factor: 0.0,
            // the retry count bounds the loop, not wall time
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// [`Ingestor`] running one [`FrameSource`] on its own thread
pub struct SourceIngestor<S: FrameSource> {
    name: String,
    kind: SourceKind,
    retry: RetryPolicy,
    source: Mutex<Option<S>>,
    interests: Mutex<Vec<Interest>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
    frames: Arc<AtomicU64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: FrameSource> SourceIngestor<S> {
    pub fn new(name: impl Into<String>, source: S, retry: RetryPolicy) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        Self {
            name: name.into(),
            kind: source.kind(),
            retry,
            source: Mutex::new(Some(source)),
            interests: Mutex::new(Vec::new()),
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            handle: Mutex::new(None),
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

impl<S: FrameSource> Ingestor for SourceIngestor<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn register_interest(&self, interest: Interest) -> Result<()> {
        if lock(&self.source).is_none() {
            return Err(PipelineError::Config(format!(
                "Ingestor '{}' is already running; register interests before start",
                self.name
            )));
        }
        lock(&self.interests).push(interest);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let source = lock(&self.source).take().ok_or_else(|| {
            PipelineError::Shutdown(format!("Ingestor '{}' was already started", self.name))
        })?;

        let mut runner = Runner {
            name: self.name.clone(),
            source,
            interests: std::mem::take(&mut *lock(&self.interests)),
            retry: self.retry,
            stop_rx: self.stop_rx.clone(),
            frames: Arc::clone(&self.frames),
        };

        let handle = thread::Builder::new()
            .name(format!("ingest-{}", self.name))
            .spawn(move || runner.run())?;
        *lock(&self.handle) = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        // Dropping the only sender disconnects the channel, which the runner polls
        if lock(&self.stop_tx).take().is_some() {
            tracing::debug!("Stop requested for ingestor '{}'", self.name);
        }
    }

    fn join(&self) {
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Ingestor '{}' thread panicked", self.name);
            }
        }
    }

    fn frames_produced(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

struct Runner<S> {
    name: String,
    source: S,
    interests: Vec<Interest>,
    retry: RetryPolicy,
    stop_rx: Receiver<()>,
    frames: Arc<AtomicU64>,
}

impl<S: FrameSource> Runner<S> {
    fn run(&mut self) {
        tracing::info!(
            "Ingestor '{}' started with {} interests",
            self.name,
            self.interests.len()
        );

        let mut backoff = self.retry.backoff();
        let mut failures = 0u32;
        let mut open = false;

        while !self.stop_requested() {
            if !open {
                match self.source.open() {
                    Ok(()) => open = true,
                    Err(e) => {
                        if self.retry_after(e, &mut failures, &mut backoff) {
                            continue;
                        }
                        break;
                    }
                }
            }

            match self.source.next_frame() {
                Ok(Some(frame)) => {
                    failures = 0;
                    backoff.reset();
                    self.deliver(frame);
                    if let Some(pace) = self.source.pace() {
                        if self.wait_for_stop(pace) {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    tracing::info!("Ingestor '{}' exhausted its source", self.name);
                    break;
                }
                Err(e) => {
                    self.source.close();
                    open = false;
                    if !self.retry_after(e, &mut failures, &mut backoff) {
                        break;
                    }
                }
            }
        }

        if open {
            self.source.close();
        }
        tracing::info!(
            "Ingestor '{}' exited after {} frames",
            self.name,
            self.frames.load(Ordering::Relaxed)
        );
    }

    fn deliver(&self, frame: Frame) {
        let payload = frame.into_payload();
        for interest in &self.interests {
            interest(&self.name, Arc::clone(&payload));
        }
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns false when the ingestor should give up
    fn retry_after(
        &self,
        err: PipelineError,
        failures: &mut u32,
        backoff: &mut ExponentialBackoff,
    ) -> bool {
        *failures += 1;
        if *failures > self.retry.max_retries {
            tracing::error!(
                "Ingestor '{}' giving up after {} consecutive failures: {}",
                self.name,
                failures,
                err
            );
            return false;
        }

        let delay = backoff
            .next_backoff()
            .unwrap_or_else(|| Duration::from_millis(self.retry.max_backoff_ms));
        tracing::warn!(
            "Ingestor '{}' attempt {}/{} failed: {} - retrying in {:?}",
            self.name,
            failures,
            self.retry.max_retries,
            err,
            delay
        );
        !self.wait_for_stop(delay)
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep for `delay` unless a stop arrives first; true if stopped
    fn wait_for_stop(&self, delay: Duration) -> bool {
        !matches!(
            self.stop_rx.recv_timeout(delay),
            Err(RecvTimeoutError::Timeout)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;
    use std::time::Instant;

    /// Fails `open` a fixed number of times, then yields `count` frames
    struct FlakySource {
        open_failures: u32,
        read_failure_at: Option<u64>,
        count: u64,
        next: u64,
        opens: Arc<AtomicU64>,
    }

    impl FlakySource {
        fn new(open_failures: u32, count: u64) -> (Self, Arc<AtomicU64>) {
            let opens = Arc::new(AtomicU64::new(0));
            let source = Self {
                open_failures,
                read_failure_at: None,
                count,
                next: 0,
                opens: Arc::clone(&opens),
            };
            (source, opens)
        }
    }

    impl FrameSource for FlakySource {
        fn kind(&self) -> SourceKind {
            SourceKind::Synthetic
        }

        fn open(&mut self) -> Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.open_failures > 0 {
                self.open_failures -= 1;
                return Err(PipelineError::Source("device busy".into()));
            }
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.read_failure_at == Some(self.next) {
                self.read_failure_at = None;
                return Err(PipelineError::Source("read timeout".into()));
            }
            if self.next >= self.count {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(Frame::new("flaky", self.next - 1, vec![])))
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    fn counting_interest() -> (Interest, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&count);
        let interest: Interest = Arc::new(move |_: &str, _: Payload| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        (interest, count)
    }

    #[test]
    fn test_recovers_from_open_failures() {
        let (source, opens) = FlakySource::new(2, 3);
        let ingestor = SourceIngestor::new("flaky", source, fast_retry(3));
        let (interest, delivered) = counting_interest();
        ingestor.register_interest(interest).unwrap();

        ingestor.start().unwrap();
        ingestor.join();

        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert_eq!(delivered.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_gives_up_when_budget_spent() {
        let (source, opens) = FlakySource::new(10, 3);
        let ingestor = SourceIngestor::new("flaky", source, fast_retry(2));
        ingestor.start().unwrap();
        ingestor.join();

        // initial attempt plus two retries
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert_eq!(ingestor.frames_produced(), 0);
    }

    #[test]
    fn test_read_failure_reopens_and_continues() {
        let (mut source, opens) = FlakySource::new(0, 4);
        source.read_failure_at = Some(2);
        let ingestor = SourceIngestor::new("flaky", source, fast_retry(1));
        ingestor.start().unwrap();
        ingestor.join();

        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(ingestor.frames_produced(), 4);
    }

    #[test]
    fn test_stop_interrupts_backoff() {
        let (source, _) = FlakySource::new(u32::MAX, 1);
        let retry = RetryPolicy {
            max_retries: 100,
            initial_backoff_ms: 10_000,
            max_backoff_ms: 10_000,
        };
        let ingestor = SourceIngestor::new("stuck", source, retry);
        ingestor.start().unwrap();

        thread::sleep(Duration::from_millis(20));
        let begin = Instant::now();
        ingestor.stop();
        ingestor.join();
        assert!(begin.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_register_after_start_rejected() {
        let (source, _) = FlakySource::new(0, 0);
        let ingestor = SourceIngestor::new("flaky", source, RetryPolicy::none());
        ingestor.start().unwrap();
        let (interest, _) = counting_interest();
        assert!(ingestor.register_interest(interest).is_err());
        assert!(ingestor.start().is_err());
        ingestor.join();
    }
}
