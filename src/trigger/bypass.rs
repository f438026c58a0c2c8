//! BypassTrigger: pass-through episode.
//!
//! Starts an episode on the first frame it sees and forwards every later
//! frame into it until the trigger is stopped. Useful when a classifier
//! should see the raw stream, or as the first stage of a chain.

use crate::episode::BacklogPolicy;
use crate::trigger::{Trigger, TriggerCore};
use crate::types::{Payload, SourceKind, UserData};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Configuration options for [`BypassTrigger`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BypassOptions {
    /// User data attached to every sample
    pub user_data: UserData,
    /// Source kinds to subscribe to
    pub sources: BTreeSet<SourceKind>,
}

impl Default for BypassOptions {
    fn default() -> Self {
        Self {
            user_data: -1,
            sources: default_sources(),
        }
    }
}

pub(crate) fn default_sources() -> BTreeSet<SourceKind> {
    [SourceKind::Synthetic, SourceKind::Directory]
        .into_iter()
        .collect()
}

pub struct BypassTrigger {
    core: TriggerCore,
    options: BypassOptions,
}

impl BypassTrigger {
    pub fn new(name: impl Into<String>, backlog: BacklogPolicy, options: BypassOptions) -> Self {
        Self {
            core: TriggerCore::new(name, backlog),
            options,
        }
    }
}

impl Trigger for BypassTrigger {
    fn core(&self) -> &TriggerCore {
        &self.core
    }

    fn supported_sources(&self) -> BTreeSet<SourceKind> {
        self.options.sources.clone()
    }

    fn on_data(&self, _source: &str, payload: Payload) {
        // send_start appends when an episode is already live
        self.core.send_start(payload, self.options.user_data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::EpisodeIterator;
    use crate::types::Frame;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_bypass_forwards_everything_into_one_episode() {
        let trigger = BypassTrigger::new("bypass", BacklogPolicy::Unbounded, BypassOptions::default());
        let seen: Arc<Mutex<Vec<Arc<EpisodeIterator>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        trigger
            .bind(Arc::new(move |ep: Arc<EpisodeIterator>| sink.lock().unwrap().push(ep)))
            .unwrap();

        for seq in 0..5 {
            trigger.process_data("cam", Frame::new("f", seq, vec![]).into_payload());
        }
        trigger.core().send_stop();

        let episodes = seen.lock().unwrap();
        assert_eq!(episodes.len(), 1);
        let samples: Vec<_> = episodes[0].samples().collect();
        assert_eq!(samples.len(), 5);
        assert!(samples.iter().all(|s| s.user_data == -1));
        assert_eq!(samples[4].payload.source_seq, 4);
    }

    #[test]
    fn test_stopped_bypass_ignores_data() {
        let trigger = BypassTrigger::new("bypass", BacklogPolicy::Unbounded, BypassOptions::default());
        trigger.bind(Arc::new(|_: Arc<EpisodeIterator>| {})).unwrap();
        trigger.stop();
        trigger.process_data("cam", Frame::new("f", 0, vec![]).into_payload());
        assert_eq!(trigger.core().episodes_started(), 0);
    }
}
