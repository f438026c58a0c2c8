//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

use crossbeam_channel::Receiver;
use episode_pipeline::bus::{ChannelBus, MessageBus, Topics};
use episode_pipeline::classifier::{Classifier, ClassifierDispatcher, RolloverConfig};
use episode_pipeline::types::{Detection, Frame, MetaRecord, Payload, Point, SummaryRecord, UserData};
use episode_pipeline::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Upper bound for any wait in these tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

pub fn payload(seq: u64) -> Payload {
    Frame::new(format!("frame-{seq}"), seq, vec![0u8; 8]).into_payload()
}

/// Records collected from a [`ChannelBus`], split by topic
#[derive(Debug, Default)]
pub struct Collected {
    pub meta: Vec<MetaRecord>,
    pub summaries: Vec<SummaryRecord>,
}

pub struct Collector {
    pub bus: Arc<ChannelBus>,
    rx: Receiver<(String, serde_json::Value)>,
}

impl Collector {
    pub fn new() -> Self {
        let bus = Arc::new(ChannelBus::new());
        let rx = bus.receiver();
        Self { bus, rx }
    }

    pub fn bus(&self) -> Arc<dyn MessageBus> {
        self.bus.clone()
    }

    /// Receive until `summaries` summary records have arrived
    pub fn wait_for_summaries(&self, summaries: usize) -> Collected {
        let deadline = Instant::now() + test_timeout();
        let mut out = Collected::default();
        while out.summaries.len() < summaries {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (topic, value) = self
                .rx
                .recv_timeout(remaining)
                .expect("timed out waiting for records");
            match topic.as_str() {
                "classifier_results" => out.meta.push(serde_json::from_value(value).unwrap()),
                "classifier_summary" => out.summaries.push(serde_json::from_value(value).unwrap()),
                other => panic!("unexpected topic {other}"),
            }
        }
        out
    }
}

pub fn dispatcher(
    name: &str,
    classifier: Arc<dyn Classifier>,
    workers: usize,
    collector: &Collector,
) -> Arc<ClassifierDispatcher> {
    Arc::new(
        ClassifierDispatcher::new(
            name,
            classifier,
            workers,
            RolloverConfig::default(),
            Some(collector.bus()),
            Topics::default(),
        )
        .unwrap(),
    )
}

/// Classifier that logs every call as `(episode tag, sample index)`
///
/// The episode tag is the sample's user data.
#[derive(Default)]
pub struct RecordingClassifier {
    pub calls: Mutex<Vec<(UserData, u64)>>,
}

impl Classifier for RecordingClassifier {
    fn classify(&self, sample_index: u64, _: &Frame, user_data: UserData) -> Result<Vec<Detection>> {
        self.calls.lock().unwrap().push((user_data, sample_index));
        Ok(Vec::new())
    }
}

pub fn box_detection(class_id: u32) -> Detection {
    Detection::new(class_id, Point::new(1, 2), Point::new(3, 4))
}

/// Poll `condition` until it holds or the test timeout passes
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
