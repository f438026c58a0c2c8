//! Core data types for the episode pipeline
//!
//! This module contains the data structures that flow between ingestion,
//! triggering and classification.
//!
//! # Main Types
//!
//! - [`Frame`] - One unit of sensor data produced by an ingestor
//! - [`Sample`] - A frame tagged with its position in an episode and trigger user data
//! - [`Detection`] - One classified object with class id and bounding box
//! - [`MetaRecord`] - Per-sample classification result
//! - [`SummaryRecord`] - Per-episode aggregate of detection counts
//!
//! # Sharing
//!
//! Frames are wrapped in [`Payload`] (`Arc<Frame>`) as soon as they leave an
//! ingestor. One physical source usually feeds several triggers, and a frame
//! may sit in more than one episode backlog at a time; none of those paths
//! copy the pixel data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Trigger-supplied tag carried by every sample of an episode.
///
/// Triggers use it for hints such as orientation or angle; `-1` means "no hint".
pub type UserData = i64;

/// Shared, immutable frame handle
pub type Payload = Arc<Frame>;

/// Kinds of data source a trigger can declare support for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Generated test frames
    Synthetic,
    /// Files read from a directory
    Directory,
    /// Samples re-emitted from an upstream trigger's episodes
    Episode,
}

impl SourceKind {
    /// Stable lowercase name, matching the configuration spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Synthetic => "synthetic",
            SourceKind::Directory => "directory",
            SourceKind::Episode => "episode",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of sensor data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Stable reference to the frame (file path, camera frame id, ...)
    pub handle: String,
    /// Sequence number assigned by the producing source
    pub source_seq: u64,
    /// Capture time
    pub captured_at: DateTime<Utc>,
    /// Raw payload bytes
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Scalar measurements attached by the source (motion, brightness, angle, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,
}

impl Frame {
    /// Create a frame with no attributes, captured now
    pub fn new(handle: impl Into<String>, source_seq: u64, data: Vec<u8>) -> Self {
        Self {
            handle: handle.into(),
            source_seq,
            captured_at: Utc::now(),
            data,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, key: impl Into<String>, value: f64) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Look up an attribute value
    pub fn attribute(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).copied()
    }

    /// Wrap into a shareable payload
    pub fn into_payload(self) -> Payload {
        Arc::new(self)
    }
}

/// Identifier of one episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(pub Uuid);

impl EpisodeId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EpisodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A frame positioned inside an episode
#[derive(Debug, Clone)]
pub struct Sample {
    /// Monotonically increasing index within the episode, starting at 0
    pub index: u64,
    /// The frame itself
    pub payload: Payload,
    /// Trigger-supplied tag
    pub user_data: UserData,
}

impl Sample {
    pub fn new(index: u64, payload: Payload, user_data: UserData) -> Self {
        Self {
            index,
            payload,
            user_data,
        }
    }
}

/// Pixel coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One classified object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    /// Classifier-defined class
    pub class_id: u32,
    /// Top-left corner of the bounding box
    pub top_left: Point,
    /// Bottom-right corner of the bounding box
    pub bottom_right: Point,
}

impl Detection {
    pub fn new(class_id: u32, top_left: Point, bottom_right: Point) -> Self {
        Self {
            class_id,
            top_left,
            bottom_right,
        }
    }
}

/// Reference back to the sample a meta record describes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRef {
    /// Index of the sample within its episode
    pub sample_index: u64,
    /// Handle of the underlying frame
    pub frame: String,
    /// Trigger user data the sample was classified with
    pub user_data: UserData,
}

/// Result record for one classified sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaRecord {
    /// Rollover counter owned by the emitting dispatcher
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub episode_id: EpisodeId,
    pub classifier: String,
    pub sample: SampleRef,
    pub detections: Vec<Detection>,
}

/// Aggregate record emitted once per episode, whether it completed or failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Rollover counter owned by the emitting dispatcher
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub episode_id: EpisodeId,
    pub classifier: String,
    /// Number of samples walked before the episode ended
    pub sample_count: u64,
    /// Detections per class id
    pub class_counts: BTreeMap<u32, u64>,
    /// True when the episode ended through the error path
    pub errored: bool,
}

impl SummaryRecord {
    /// Sum of all per-class counts
    pub fn total_detections(&self) -> u64 {
        self.class_counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_attributes() {
        let frame = Frame::new("cam0/1", 1, vec![0u8; 4])
            .with_attribute("motion", 0.75)
            .with_attribute("angle", 90.0);
        assert_eq!(frame.attribute("motion"), Some(0.75));
        assert_eq!(frame.attribute("missing"), None);
    }

    #[test]
    fn test_summary_total() {
        let mut class_counts = BTreeMap::new();
        class_counts.insert(1, 3);
        class_counts.insert(4, 2);
        let summary = SummaryRecord {
            index: 0,
            timestamp: Utc::now(),
            episode_id: EpisodeId::new(),
            classifier: "pcb".to_string(),
            sample_count: 5,
            class_counts,
            errored: false,
        };
        assert_eq!(summary.total_detections(), 5);
    }

    #[test]
    fn test_source_kind_serde_spelling() {
        let json = serde_json::to_string(&SourceKind::Directory).unwrap();
        assert_eq!(json, "\"directory\"");
        let kind: SourceKind = serde_json::from_str("\"synthetic\"").unwrap();
        assert_eq!(kind, SourceKind::Synthetic);
    }
}
