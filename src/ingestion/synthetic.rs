//! Generated frames with a deterministic attribute waveform.
//!
//! `motion` alternates between `low` and `high` every `period` frames,
//! starting low, so a motion trigger sees clean episodes of `period` frames.
//! `brightness` ramps from 0 to 255 and wraps.

use crate::error::Result;
use crate::ingestion::FrameSource;
use crate::types::{Frame, SourceKind};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyntheticOptions {
    /// Frames to produce; `None` runs until stopped
    pub count: Option<u64>,
    /// Delay between frames
    pub interval_ms: u64,
    /// Frames per motion phase
    pub period: u64,
    pub low: f64,
    pub high: f64,
    /// Size of the generated payload
    pub frame_bytes: usize,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            count: Some(100),
            interval_ms: 0,
            period: 10,
            low: 0.05,
            high: 0.9,
            frame_bytes: 64,
        }
    }
}

pub struct SyntheticSource {
    options: SyntheticOptions,
    seq: u64,
}

impl SyntheticSource {
    pub fn new(options: SyntheticOptions) -> Self {
        Self { options, seq: 0 }
    }

    fn motion_at(&self, seq: u64) -> f64 {
        let period = self.options.period.max(1);
        if (seq / period) % 2 == 1 {
            self.options.high
        } else {
            self.options.low
        }
    }
}

impl FrameSource for SyntheticSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Synthetic
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.options.count.is_some_and(|count| self.seq >= count) {
            return Ok(None);
        }
        let seq = self.seq;
        self.seq += 1;

        let data = vec![(seq % 256) as u8; self.options.frame_bytes];
        let frame = Frame::new(format!("synthetic/{seq}"), seq, data)
            .with_attribute("motion", self.motion_at(seq))
            .with_attribute("brightness", (seq % 256) as f64);
        Ok(Some(frame))
    }

    fn pace(&self) -> Option<Duration> {
        (self.options.interval_ms > 0).then(|| Duration::from_millis(self.options.interval_ms))
    }
}
