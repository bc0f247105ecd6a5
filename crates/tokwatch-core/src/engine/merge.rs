//! Ordering buffer for concurrent fetch results.
//!
//! Fetch+parse for one response may overlap with the next response's
//! fetch+parse, but mutation of the token state must be applied in the
//! order the response events were observed. Slots are numbered when the
//! event arrives; completions are held back until every earlier slot has
//! completed or failed, so a stale snapshot can never overwrite a newer
//! one.

use std::collections::BTreeMap;

/// Sequenced hold-back buffer. `begin` at event time, `complete` when the
/// fetch+parse finishes (or fails, with `None`).
#[derive(Debug)]
pub struct MergeQueue<T> {
    next_seq: u64,
    next_apply: u64,
    done: BTreeMap<u64, Option<T>>,
}

impl<T> Default for MergeQueue<T> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            next_apply: 0,
            done: BTreeMap::new(),
        }
    }
}

impl<T> MergeQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next slot, in event-observation order.
    pub fn begin(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Record the outcome for a slot (`None` for a failed fetch, which
    /// releases the slot without producing a result). Returns every
    /// outcome that is now applicable, in slot order.
    pub fn complete(&mut self, seq: u64, outcome: Option<T>) -> Vec<T> {
        self.done.insert(seq, outcome);
        let mut ready = Vec::new();
        while let Some(outcome) = self.done.remove(&self.next_apply) {
            self.next_apply += 1;
            if let Some(value) = outcome {
                ready.push(value);
            }
        }
        ready
    }

    /// Whether every claimed slot has been applied.
    pub fn is_drained(&self) -> bool {
        self.next_apply == self.next_seq && self.done.is_empty()
    }
}
