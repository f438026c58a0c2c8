//! EveryNthTrigger: fixed-length episodes.
//!
//! Groups the incoming stream into consecutive episodes of `length` frames.
//! The user data of each episode is its ordinal, starting at 0.

use crate::episode::BacklogPolicy;
use crate::error::{PipelineError, Result};
use crate::trigger::bypass::default_sources;
use crate::trigger::{Trigger, TriggerCore};
use crate::types::{Payload, SourceKind};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

/// Configuration options for [`EveryNthTrigger`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EveryNthOptions {
    /// Frames per episode
    pub length: u64,
    /// Source kinds to subscribe to
    pub sources: BTreeSet<SourceKind>,
}

impl Default for EveryNthOptions {
    fn default() -> Self {
        Self {
            length: 10,
            sources: default_sources(),
        }
    }
}

#[derive(Default)]
struct Position {
    in_episode: u64,
    ordinal: i64,
}

pub struct EveryNthTrigger {
    core: TriggerCore,
    options: EveryNthOptions,
    position: Mutex<Position>,
}

impl EveryNthTrigger {
    pub fn new(
        name: impl Into<String>,
        backlog: BacklogPolicy,
        options: EveryNthOptions,
    ) -> Result<Self> {
        let name = name.into();
        if options.length == 0 {
            return Err(PipelineError::Config(format!(
                "Trigger '{}': episode length must be at least 1",
                name
            )));
        }
        Ok(Self {
            core: TriggerCore::new(name, backlog),
            options,
            position: Mutex::new(Position::default()),
        })
    }
}

impl Trigger for EveryNthTrigger {
    fn core(&self) -> &TriggerCore {
        &self.core
    }

    fn supported_sources(&self) -> BTreeSet<SourceKind> {
        self.options.sources.clone()
    }

    fn on_data(&self, _source: &str, payload: Payload) {
        // Held across the whole step so frames from several sources count correctly
        let mut pos = self.position.lock().unwrap_or_else(PoisonError::into_inner);

        if pos.in_episode == 0 {
            self.core.send_start(payload, pos.ordinal);
        } else {
            self.core.send_data(payload, pos.ordinal);
        }
        pos.in_episode += 1;

        if pos.in_episode >= self.options.length {
            self.core.send_stop();
            pos.in_episode = 0;
            pos.ordinal += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::EpisodeIterator;
    use crate::types::Frame;
    use std::sync::Arc;

    #[test]
    fn test_splits_stream_into_fixed_episodes() {
        let options = EveryNthOptions {
            length: 3,
            ..Default::default()
        };
        let trigger = EveryNthTrigger::new("nth", BacklogPolicy::Unbounded, options).unwrap();
        let seen: Arc<Mutex<Vec<Arc<EpisodeIterator>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        trigger
            .bind(Arc::new(move |ep: Arc<EpisodeIterator>| sink.lock().unwrap().push(ep)))
            .unwrap();

        for seq in 0..7 {
            trigger.process_data("cam", Frame::new("f", seq, vec![]).into_payload());
        }

        let episodes = seen.lock().unwrap();
        assert_eq!(episodes.len(), 3);

        let first: Vec<_> = episodes[0].samples().map(|s| (s.index, s.user_data)).collect();
        assert_eq!(first, vec![(0, 0), (1, 0), (2, 0)]);
        let second: Vec<_> = episodes[1].samples().map(|s| s.payload.source_seq).collect();
        assert_eq!(second, vec![3, 4, 5]);

        // third episode is still live with one sample
        assert!(trigger.core().is_triggered());
        assert_eq!(episodes[2].size(), 1);
    }

    #[test]
    fn test_zero_length_rejected() {
        let options = EveryNthOptions {
            length: 0,
            ..Default::default()
        };
        assert!(EveryNthTrigger::new("nth", BacklogPolicy::Unbounded, options).is_err());
    }
}
