mod policy;
mod state;
mod window;

pub use policy::{AnchorPair, DoubleBuffer, PolicyKind, ReplaceAndPair, WindowPolicy};
pub use state::{ChannelSlots, ChannelState};
pub use window::Window;

use crate::telemetry::ReadingBatch;

#[derive(Debug, PartialEq)]
pub enum Delivery {
    /// Same token as the last accepted batch for the channel; state untouched.
    Duplicate,
    UnknownChannel,
    Accepted(Vec<Window>),
}

/// Turns per-channel batches into complete windows according to one policy.
///
/// Owned by the ingestion task; nothing else mutates it.
#[derive(Debug)]
pub struct Accumulator {
    slots: ChannelSlots,
    policy: Box<dyn WindowPolicy>,
    window_size: usize,
}

impl Accumulator {
    pub fn new(
        channels: impl IntoIterator<Item = String>,
        policy: Box<dyn WindowPolicy>,
        window_size: usize,
    ) -> Self {
        Self {
            slots: ChannelSlots::new(channels),
            policy,
            window_size,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn deliver(&mut self, batch: ReadingBatch) -> Delivery {
        let Some(state) = self.slots.get_mut(&batch.channel) else {
            return Delivery::UnknownChannel;
        };
        if state.last_token.as_ref() == Some(&batch.token) {
            return Delivery::Duplicate;
        }
        state.last_token = Some(batch.token.clone());

        let windows = self.policy.accept(&mut self.slots, batch, self.window_size);
        debug_assert!(windows.iter().all(|window| window.len() == self.window_size));
        Delivery::Accepted(windows)
    }

    pub fn fill_level(&self, channel: &str) -> Option<usize> {
        self.slots.get(channel).map(ChannelState::fill_level)
    }

    pub fn fill_levels(&self) -> Vec<(String, usize)> {
        self.slots.fill_levels()
    }
}
