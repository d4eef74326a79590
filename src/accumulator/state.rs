use crate::telemetry::{BatchToken, ReadingBatch};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ChannelState {
    pub(in crate::accumulator) first: Option<ReadingBatch>,
    pub(in crate::accumulator) second: Option<ReadingBatch>,
    pub(in crate::accumulator) last_token: Option<BatchToken>,
}

impl ChannelState {
    /// Holds a full batch that a pairing policy may use.
    pub fn is_ready(&self) -> bool {
        self.first.is_some()
    }

    pub fn fill_level(&self) -> usize {
        self.first.as_ref().map_or(0, ReadingBatch::len)
            + self.second.as_ref().map_or(0, ReadingBatch::len)
    }

    fn clear(&mut self) {
        self.first = None;
        self.second = None;
    }
}

/// Per-channel accumulation state, keyed by published channel name, in configured order.
#[derive(Debug)]
pub struct ChannelSlots {
    order: Vec<String>,
    states: HashMap<String, ChannelState>,
}

impl ChannelSlots {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        let order: Vec<String> = names.into_iter().collect();
        let states = order
            .iter()
            .map(|name| (name.clone(), ChannelState::default()))
            .collect();
        Self { order, states }
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, channel: &str) -> Option<&ChannelState> {
        self.states.get(channel)
    }

    pub fn get_mut(&mut self, channel: &str) -> Option<&mut ChannelState> {
        self.states.get_mut(channel)
    }

    /// The batch a pairing policy would use for `channel`.
    pub fn held(&self, channel: &str) -> Option<&ReadingBatch> {
        self.states.get(channel).and_then(|state| state.first.as_ref())
    }

    pub fn clear(&mut self, channel: &str) {
        if let Some(state) = self.states.get_mut(channel) {
            state.clear();
        }
    }

    pub fn fill_levels(&self) -> Vec<(String, usize)> {
        self.order
            .iter()
            .map(|name| {
                let level = self.states.get(name).map_or(0, ChannelState::fill_level);
                (name.clone(), level)
            })
            .collect()
    }
}
