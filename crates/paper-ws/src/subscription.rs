//! Subscription set management.
//!
//! Holds the instrument ids the client believes the venue is streaming.
//! Every replacement is paired with a subscribe frame by the caller, so the
//! in-memory list and the venue-side subscription never drift while a
//! channel is open.

use crate::error::WsResult;
use crate::message::SubscribeRequest;
use paper_core::InstrumentId;
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::debug;

/// Difference between two subscription lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub added: Vec<InstrumentId>,
    pub removed: Vec<InstrumentId>,
}

impl SubscriptionDiff {
    pub fn between(old: &[InstrumentId], new: &[InstrumentId]) -> Self {
        let old_set: HashSet<&InstrumentId> = old.iter().collect();
        let new_set: HashSet<&InstrumentId> = new.iter().collect();
        Self {
            added: new
                .iter()
                .filter(|id| !old_set.contains(id))
                .cloned()
                .collect(),
            removed: old
                .iter()
                .filter(|id| !new_set.contains(id))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
struct SubscriptionState {
    /// Ordered list as last sent to the venue.
    instruments: Vec<InstrumentId>,
    /// Lookup mirror of `instruments`.
    index: HashSet<InstrumentId>,
}

/// Subscription manager.
///
/// Replace semantics only: the venue has no incremental protocol, so every
/// change swaps the whole list.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    state: RwLock<SubscriptionState>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list, returning what changed.
    pub fn replace(&self, instruments: Vec<InstrumentId>) -> SubscriptionDiff {
        let mut state = self.state.write();
        let diff = SubscriptionDiff::between(&state.instruments, &instruments);
        state.index = instruments.iter().cloned().collect();
        state.instruments = instruments;
        debug!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            total = state.instruments.len(),
            "Subscription list replaced"
        );
        diff
    }

    /// Drop every instrument (session end).
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.instruments.clear();
        state.index.clear();
    }

    /// Copy of the current list.
    pub fn current(&self) -> Vec<InstrumentId> {
        self.state.read().instruments.clone()
    }

    pub fn contains(&self, instrument: &InstrumentId) -> bool {
        self.state.read().index.contains(instrument)
    }

    pub fn len(&self) -> usize {
        self.state.read().instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().instruments.is_empty()
    }

    /// Subscribe frame for the current list.
    pub fn subscribe_frame(&self) -> WsResult<String> {
        let state = self.state.read();
        SubscribeRequest::market(&state.instruments).to_json()
    }
}
