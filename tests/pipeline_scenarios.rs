//! End-to-end scenarios for one trigger feeding one classifier dispatcher
//!
//! - Scenario A: a short episode with a no-op classifier
//! - Scenario B: a single worker serialises episodes without blocking triggers
//! - Scenario C: a failing classify call only affects its own sample

mod common;

use common::{box_detection, dispatcher, payload, wait_until, Collector, RecordingClassifier};
use crossbeam_channel::{Receiver, Sender};
use episode_pipeline::classifier::{Classifier, NoopClassifier};
use episode_pipeline::episode::BacklogPolicy;
use episode_pipeline::trigger::bypass::{BypassOptions, BypassTrigger};
use episode_pipeline::types::{Detection, Frame, UserData};
use episode_pipeline::{PipelineError, Result, Trigger};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn trigger(name: &str) -> BypassTrigger {
    BypassTrigger::new(name, BacklogPolicy::Unbounded, BypassOptions::default())
}

#[test]
fn scenario_a_noop_episode_yields_meta_and_summary() {
    let collector = Collector::new();
    let trigger = trigger("a");
    let dispatcher = dispatcher("noop", Arc::new(NoopClassifier), 1, &collector);
    dispatcher.bind_to(&trigger).unwrap();

    let core = trigger.core();
    core.send_start(payload(0), -1);
    core.send_data(payload(1), -1);
    core.send_data(payload(2), -1);
    core.send_stop();

    let records = collector.wait_for_summaries(1);
    dispatcher.shutdown();

    assert_eq!(records.meta.len(), 3);
    assert!(records.meta.windows(2).all(|w| w[0].index < w[1].index));
    let sample_indices: Vec<_> = records.meta.iter().map(|m| m.sample.sample_index).collect();
    assert_eq!(sample_indices, vec![0, 1, 2]);
    assert!(records.meta.iter().all(|m| m.sample.user_data == -1));

    let summary = &records.summaries[0];
    assert_eq!(summary.sample_count, 3);
    assert_eq!(summary.total_detections(), 0);
    assert!(!summary.errored);
    assert!(records.meta.iter().all(|m| m.episode_id == summary.episode_id));
}

/// Blocks the first call until the gate is opened
struct GatedClassifier {
    inner: RecordingClassifier,
    gate: Receiver<()>,
    first: Mutex<bool>,
}

impl Classifier for GatedClassifier {
    fn classify(&self, sample_index: u64, frame: &Frame, user_data: UserData) -> Result<Vec<Detection>> {
        let wait = std::mem::replace(&mut *self.first.lock().unwrap(), false);
        if wait {
            self.gate
                .recv_timeout(Duration::from_secs(5))
                .map_err(|e| PipelineError::Classification(e.to_string()))?;
        }
        self.inner.classify(sample_index, frame, user_data)
    }
}

#[test]
#[serial]
fn scenario_b_single_worker_serialises_episodes() {
    let (open_gate, gate): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
    let classifier = Arc::new(GatedClassifier {
        inner: RecordingClassifier::default(),
        gate,
        first: Mutex::new(true),
    });

    let collector = Collector::new();
    let trigger = trigger("b");
    let dispatcher = dispatcher("gated", classifier.clone(), 1, &collector);
    dispatcher.bind_to(&trigger).unwrap();
    let core = trigger.core();

    // First episode; its worker blocks on the very first sample
    core.send_start(payload(0), 1);
    core.send_data(payload(1), 1);
    core.send_stop();
    assert!(wait_until(|| dispatcher.stats().episodes_submitted == 1));

    // Second episode starts while the only worker is busy
    let begin = Instant::now();
    core.send_start(payload(2), 2);
    for seq in 3..6 {
        core.send_data(payload(seq), 2);
    }
    assert!(begin.elapsed() < Duration::from_secs(1));

    let second = core.current_episode().unwrap();
    assert_eq!(second.size(), 4);
    assert!(classifier.inner.calls.lock().unwrap().is_empty());

    core.send_stop();
    open_gate.send(()).unwrap();

    let records = collector.wait_for_summaries(2);
    dispatcher.shutdown();

    let calls = classifier.inner.calls.lock().unwrap().clone();
    assert_eq!(calls, vec![(1, 0), (1, 1), (2, 0), (2, 1), (2, 2), (2, 3)]);
    assert_eq!(records.summaries[0].sample_count, 2);
    assert_eq!(records.summaries[1].sample_count, 4);
    assert_eq!(dispatcher.stats().episodes_completed, 2);
}

/// Fails on the second sample of each episode, detects class 7 otherwise
struct FailsOnSecond;

impl Classifier for FailsOnSecond {
    fn classify(&self, sample_index: u64, _: &Frame, _: UserData) -> Result<Vec<Detection>> {
        if sample_index == 1 {
            return Err(PipelineError::Classification("corrupt frame".into()));
        }
        Ok(vec![box_detection(7)])
    }
}

#[test]
fn scenario_c_failed_sample_is_isolated() {
    let collector = Collector::new();
    let trigger = trigger("c");
    let dispatcher = dispatcher("flaky", Arc::new(FailsOnSecond), 1, &collector);
    dispatcher.bind_to(&trigger).unwrap();

    let core = trigger.core();
    core.send_start(payload(0), -1);
    core.send_data(payload(1), -1);
    core.send_data(payload(2), -1);
    core.send_stop();

    let records = collector.wait_for_summaries(1);
    dispatcher.shutdown();

    let detections: Vec<usize> = records.meta.iter().map(|m| m.detections.len()).collect();
    assert_eq!(detections, vec![1, 0, 1]);

    let summary = &records.summaries[0];
    assert_eq!(summary.sample_count, 3);
    assert_eq!(summary.class_counts.get(&7), Some(&2));
    assert!(!summary.errored);

    let stats = dispatcher.stats();
    assert_eq!(stats.classification_errors, 1);
    assert_eq!(stats.samples_classified, 3);
}

#[test]
fn full_stop_releases_worker_and_still_summarises() {
    let collector = Collector::new();
    let trigger = trigger("d");
    let dispatcher = dispatcher("noop", Arc::new(NoopClassifier), 1, &collector);
    dispatcher.bind_to(&trigger).unwrap();

    trigger.core().send_start(payload(0), -1);
    trigger.stop();

    let records = collector.wait_for_summaries(1);
    dispatcher.shutdown();

    assert!(records.summaries[0].sample_count <= 1);
    assert!(!records.summaries[0].errored);
    trigger.core().send_start(payload(1), -1);
    assert_eq!(trigger.core().episodes_started(), 1);
}

#[test]
fn meta_indices_continue_across_episodes() {
    let collector = Collector::new();
    let trigger = trigger("e");
    let dispatcher = dispatcher("noop", Arc::new(NoopClassifier), 1, &collector);
    dispatcher.bind_to(&trigger).unwrap();

    let core = trigger.core();
    for episode in 0..3u64 {
        core.send_start(payload(episode * 2), -1);
        core.send_data(payload(episode * 2 + 1), -1);
        core.send_stop();
    }

    let records = collector.wait_for_summaries(3);
    dispatcher.shutdown();

    let mut indices: Vec<_> = records.meta.iter().map(|m| m.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..6).collect::<Vec<_>>());
    let mut summary_indices: Vec<_> = records.summaries.iter().map(|s| s.index).collect();
    summary_indices.sort_unstable();
    assert_eq!(summary_indices, vec![0, 1, 2]);
}
