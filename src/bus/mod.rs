//! Result publishing.
//!
//! Dispatchers hand every meta and summary record to an optional
//! [`MessageBus`]. Publishing is best-effort: a failed publish is logged by
//! the caller and never interrupts classification.

use crate::error::{PipelineError, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_META_TOPIC: &str = "classifier_results";
pub const DEFAULT_SUMMARY_TOPIC: &str = "classifier_summary";

/// Sink for serialized result records
#[cfg_attr(test, mockall::automock)]
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, record: &serde_json::Value) -> Result<()>;
}

/// Topic names used by a dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topics {
    pub meta: String,
    pub summary: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            meta: DEFAULT_META_TOPIC.to_string(),
            summary: DEFAULT_SUMMARY_TOPIC.to_string(),
        }
    }
}

/// Writes every record to the log at info level
#[derive(Debug, Default)]
pub struct LogBus;

impl MessageBus for LogBus {
    fn publish(&self, topic: &str, record: &serde_json::Value) -> Result<()> {
        tracing::info!(topic, "{}", record);
        Ok(())
    }
}

/// Appends one JSON object per line, `{"topic": .., "record": ..}`
pub struct JsonLinesBus {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    topic: &'a str,
    record: &'a serde_json::Value,
}

impl JsonLinesBus {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MessageBus for JsonLinesBus {
    fn publish(&self, topic: &str, record: &serde_json::Value) -> Result<()> {
        let line = serde_json::to_string(&Envelope { topic, record })?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line)
            .and_then(|_| writer.flush())
            .map_err(|e| PipelineError::Publish {
                topic: topic.to_string(),
                message: format!("{}: {}", self.path.display(), e),
            })
    }
}

/// Forwards `(topic, record)` pairs over a crossbeam channel
pub struct ChannelBus {
    tx: Sender<(String, serde_json::Value)>,
    rx: Receiver<(String, serde_json::Value)>,
}

impl ChannelBus {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// A receiver for published records; clones share one queue
    pub fn receiver(&self) -> Receiver<(String, serde_json::Value)> {
        self.rx.clone()
    }
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for ChannelBus {
    fn publish(&self, topic: &str, record: &serde_json::Value) -> Result<()> {
        self.tx
            .send((topic.to_string(), record.clone()))
            .map_err(|e| PipelineError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_jsonl_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/results.jsonl");
        let bus = JsonLinesBus::create(&path).unwrap();
        bus.publish("a", &json!({"index": 0})).unwrap();
        bus.publish("b", &json!({"index": 1})).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["topic"], "b");
        assert_eq!(lines[1]["record"]["index"], 1);
    }

    #[test]
    fn test_channel_bus_delivers() {
        let bus = ChannelBus::new();
        let rx = bus.receiver();
        bus.publish("t", &json!(42)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ("t".to_string(), json!(42)));
    }
}
