use super::state::ChannelSlots;
use super::window::Window;
use crate::telemetry::ReadingBatch;
use std::fmt;

/// Decides when buffered batches form a window. Runs after duplicate suppression, so
/// every batch handed in is new for its channel.
pub trait WindowPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn accept(&self, slots: &mut ChannelSlots, batch: ReadingBatch, window_size: usize)
        -> Vec<Window>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyKind {
    ReplaceAndPair { primary: String, partner: String },
    DoubleBuffer,
    Anchor { anchor: String },
}

impl PolicyKind {
    pub fn build(&self) -> Box<dyn WindowPolicy> {
        match self {
            PolicyKind::ReplaceAndPair { primary, partner } => Box::new(ReplaceAndPair {
                primary: primary.clone(),
                partner: partner.clone(),
            }),
            PolicyKind::DoubleBuffer => Box::new(DoubleBuffer),
            PolicyKind::Anchor { anchor } => Box::new(AnchorPair {
                anchor: anchor.clone(),
            }),
        }
    }
}

/// Latest batch per channel; `primary ++ partner` once both hold one, then both reset.
#[derive(Debug)]
pub struct ReplaceAndPair {
    primary: String,
    partner: String,
}

impl WindowPolicy for ReplaceAndPair {
    fn name(&self) -> &'static str {
        "replace_and_pair"
    }

    fn accept(
        &self,
        slots: &mut ChannelSlots,
        batch: ReadingBatch,
        window_size: usize,
    ) -> Vec<Window> {
        let channel = batch.channel.clone();
        let Some(state) = slots.get_mut(&channel) else {
            return Vec::new();
        };
        state.first = Some(batch);
        state.second = None;

        if channel != self.primary && channel != self.partner {
            return Vec::new();
        }
        let (Some(primary), Some(partner)) = (slots.held(&self.primary), slots.held(&self.partner))
        else {
            return Vec::new();
        };
        let Some(window) = Window::assemble(&self.primary, &[primary, partner], window_size) else {
            return Vec::new();
        };
        slots.clear(&self.primary);
        slots.clear(&self.partner);
        vec![window]
    }
}

/// Two slots per channel; a full pair yields `first ++ second` and slides by one batch.
#[derive(Debug)]
pub struct DoubleBuffer;

impl WindowPolicy for DoubleBuffer {
    fn name(&self) -> &'static str {
        "double_buffer"
    }

    fn accept(
        &self,
        slots: &mut ChannelSlots,
        batch: ReadingBatch,
        window_size: usize,
    ) -> Vec<Window> {
        let channel = batch.channel.clone();
        let Some(state) = slots.get_mut(&channel) else {
            return Vec::new();
        };
        if state.first.is_none() {
            state.first = Some(batch);
            return Vec::new();
        }
        state.second = Some(batch);

        let window = match (&state.first, &state.second) {
            (Some(first), Some(second)) => {
                Window::assemble(&channel, &[first, second], window_size)
            }
            _ => None,
        };
        state.first = state.second.take();
        window.into_iter().collect()
    }
}

/// Each non-anchor channel pairs its own latest batch with the anchor's. The anchor
/// batch is kept for future pairings and never forms a window on its own; the other
/// side is cleared once used.
#[derive(Debug)]
pub struct AnchorPair {
    anchor: String,
}

impl AnchorPair {
    fn pair_with_anchor(
        &self,
        slots: &mut ChannelSlots,
        channel: &str,
        window_size: usize,
    ) -> Option<Window> {
        let own = slots.held(channel)?;
        let anchor = slots.held(&self.anchor)?;
        let window = Window::assemble(channel, &[own, anchor], window_size)?;
        slots.clear(channel);
        Some(window)
    }
}

impl WindowPolicy for AnchorPair {
    fn name(&self) -> &'static str {
        "anchor"
    }

    fn accept(
        &self,
        slots: &mut ChannelSlots,
        batch: ReadingBatch,
        window_size: usize,
    ) -> Vec<Window> {
        let channel = batch.channel.clone();
        let Some(state) = slots.get_mut(&channel) else {
            return Vec::new();
        };
        state.first = Some(batch);
        state.second = None;

        if channel != self.anchor {
            return self
                .pair_with_anchor(slots, &channel, window_size)
                .into_iter()
                .collect();
        }

        let waiting: Vec<String> = slots
            .names()
            .iter()
            .filter(|name| {
                name.as_str() != self.anchor
                    && slots.get(name.as_str()).is_some_and(|state| state.is_ready())
            })
            .cloned()
            .collect();

        waiting
            .iter()
            .filter_map(|name| self.pair_with_anchor(slots, name, window_size))
            .collect()
    }
}
