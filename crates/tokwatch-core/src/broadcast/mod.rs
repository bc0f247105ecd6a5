//! Fan-out of committed state to subscribers.
//!
//! At-most-once-per-change delivery through a `tokio::sync::watch`
//! channel. Publishing while nobody listens is expected (the observer UI
//! may simply not be open) and is swallowed, never escalated.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::state::TokenState;

/// Suffix appended to the displayed model label while the
/// instrumentation session is down. Numeric state is untouched so
/// reattachment resumes from the same numbers.
pub const DISCONNECTED_MARKER: &str = " (disconnected)";

/// The state as delivered to subscribers. `state.model` already carries
/// the disconnected marker when applicable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(flatten)]
    pub state: TokenState,
    #[serde(default)]
    pub disconnected: bool,
}

impl StateSnapshot {
    /// Snapshot of a live session.
    pub fn connected(state: &TokenState) -> Self {
        Self {
            state: state.clone(),
            disconnected: false,
        }
    }

    /// Snapshot after session loss: same numbers, annotated label.
    pub fn disconnected(state: &TokenState) -> Self {
        let mut state = state.clone();
        state.model.push_str(DISCONNECTED_MARKER);
        Self {
            state,
            disconnected: true,
        }
    }
}

/// Delivers the current snapshot to all interested subscribers.
pub struct Broadcaster {
    tx: watch::Sender<StateSnapshot>,
}

impl Broadcaster {
    pub fn new(initial: StateSnapshot) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Subscribe to snapshot changes. The receiver immediately sees the
    /// latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.tx.subscribe()
    }

    /// Publish a snapshot. Succeeds whether or not anyone is listening.
    pub fn publish(&self, snapshot: StateSnapshot) {
        self.tx.send_replace(snapshot);
    }

    /// Latest published snapshot.
    pub fn current(&self) -> StateSnapshot {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state() -> TokenState {
        let mut s = TokenState::for_model("Gemini 2.5 Pro", 1_048_576);
        s.input_text = 450;
        s.thinking = 50;
        s.output_text = 120;
        s.recompute_total();
        s
    }

    #[test]
    fn test_publish_without_subscribers_is_swallowed() {
        let b = Broadcaster::new(StateSnapshot::connected(&state()));
        b.publish(StateSnapshot::connected(&state()));
        assert_eq!(b.current().state.total, 620);
    }

    #[tokio::test]
    async fn test_subscriber_sees_change() {
        let b = Broadcaster::new(StateSnapshot::connected(&TokenState::for_model("m", 1)));
        let mut rx = b.subscribe();
        b.publish(StateSnapshot::connected(&state()));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state.total, 620);
    }

    #[test]
    fn test_disconnected_snapshot_annotates_label_only() {
        let snapshot = StateSnapshot::disconnected(&state());
        assert_eq!(snapshot.state.model, "Gemini 2.5 Pro (disconnected)");
        assert_eq!(snapshot.state.total, 620);
        assert!(snapshot.disconnected);
    }

    #[test]
    fn test_snapshot_serialization_is_flat() {
        let json = serde_json::to_string(&StateSnapshot::connected(&state())).unwrap();
        assert!(json.contains("\"model\":\"Gemini 2.5 Pro\""));
        assert!(json.contains("\"total\":620"));
        assert!(json.contains("\"disconnected\":false"));
    }
}
