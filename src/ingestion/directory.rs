//! Frames read from the files of a directory.
//!
//! Every regular file becomes one frame, in file-name order. The handle is
//! the file path and the `size` attribute its length in bytes. Reopening
//! after a failure resumes after the last delivered file.

use crate::error::{PipelineError, Result, ResultExt};
use crate::ingestion::FrameSource;
use crate::types::{Frame, SourceKind};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryOptions {
    pub path: PathBuf,
    /// Only files with this extension (without the dot)
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub interval_ms: u64,
}

pub struct DirectorySource {
    options: DirectoryOptions,
    pending: VecDeque<PathBuf>,
    last: Option<PathBuf>,
    seq: u64,
}

impl DirectorySource {
    pub fn new(options: DirectoryOptions) -> Self {
        Self {
            options,
            pending: VecDeque::new(),
            last: None,
            seq: 0,
        }
    }

    fn wanted(&self, path: &Path) -> bool {
        if self.last.as_ref().is_some_and(|last| path <= last.as_path()) {
            return false;
        }
        match &self.options.extension {
            Some(ext) => path.extension().is_some_and(|e| e == ext.as_str()),
            None => true,
        }
    }
}

impl FrameSource for DirectorySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Directory
    }

    fn open(&mut self) -> Result<()> {
        let dir = &self.options.path;
        if !dir.is_dir() {
            return Err(PipelineError::Source(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        self.pending = files.into_iter().filter(|p| self.wanted(p)).collect();
        tracing::debug!(
            "Listed {} files in {}",
            self.pending.len(),
            dir.display()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let data = std::fs::read(&path)
            .map_err(PipelineError::from)
            .with_context(|| format!("Reading {}", path.display()))?;

        let frame = Frame::new(path.display().to_string(), self.seq, data);
        let size = frame.data.len() as f64;
        self.seq += 1;
        self.last = Some(path);
        Ok(Some(frame.with_attribute("size", size)))
    }

    fn close(&mut self) {
        self.pending.clear();
    }

    fn pace(&self) -> Option<Duration> {
        (self.options.interval_ms > 0).then(|| Duration::from_millis(self.options.interval_ms))
    }
}
