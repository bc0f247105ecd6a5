//! The canonical token budget state.
//!
//! Exactly one [`TokenState`] exists per engine instance. Only the
//! reconciler writes category fields; every other component reads a
//! cloned snapshot.

mod store;

pub use store::StateStore;

use serde::{Deserialize, Serialize};

/// Running token budget for the observed conversation.
///
/// Invariant after any completed mutation:
/// `total == input_text + input_file + thinking + output_text + output_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    /// Currently detected model identifier
    pub model: String,
    /// Context-window ceiling for `model`
    pub max_tokens: u64,
    /// User input text tokens
    pub input_text: u64,
    /// User-attached file tokens
    pub input_file: u64,
    /// Model thinking tokens
    pub thinking: u64,
    /// Model output text tokens
    pub output_text: u64,
    /// Model-generated file tokens
    pub output_file: u64,
    /// Sum of the five categories
    pub total: u64,
}

impl TokenState {
    /// Zero-valued state keyed to a model.
    pub fn for_model(model: impl Into<String>, max_tokens: u64) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            input_text: 0,
            input_file: 0,
            thinking: 0,
            output_text: 0,
            output_file: 0,
            total: 0,
        }
    }

    /// Recompute `total` from the category subtotals.
    pub fn recompute_total(&mut self) {
        self.total =
            self.input_text + self.input_file + self.thinking + self.output_text + self.output_file;
    }

    /// Zero all category counters and `total`, keeping `model` and
    /// `max_tokens` (a new turn does not change the model).
    pub fn reset_counters(&mut self) {
        self.input_text = 0;
        self.input_file = 0;
        self.thinking = 0;
        self.output_text = 0;
        self.output_file = 0;
        self.total = 0;
    }

    /// Whether the total invariant holds.
    pub fn is_consistent(&self) -> bool {
        self.total
            == self.input_text + self.input_file + self.thinking + self.output_text
                + self.output_file
    }
}
