//! Durable persistence for [`TokenState`].
//!
//! A single JSON record at a fixed path. Loading falls back to a default
//! state when the file is absent or structurally invalid; persistence
//! failures are logged and non-fatal — the in-memory state stays
//! authoritative and the next commit retries the write.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::TokenState;

/// File name of the persisted record inside the data directory.
const STATE_FILE: &str = "state.json";

/// Holds the canonical [`TokenState`] and mirrors every committed state
/// to disk.
pub struct StateStore {
    path: PathBuf,
    state: TokenState,
}

impl StateStore {
    /// Default location of the persisted record.
    pub fn default_path() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/tokwatch-{}", uid))
        });
        base.join("tokwatch").join(STATE_FILE)
    }

    /// Open the store, loading prior state from `path` or falling back to
    /// `default` when no valid record exists.
    pub fn open(path: impl Into<PathBuf>, default: TokenState) -> Self {
        let path = path.into();
        let state = match load_state(&path) {
            Some(state) => {
                debug!("Loaded persisted token state (total={})", state.total);
                state
            }
            None => default,
        };
        Self { path, state }
    }

    /// Current in-memory state.
    pub fn state(&self) -> &TokenState {
        &self.state
    }

    /// Replace the in-memory state and persist it. Persistence errors are
    /// logged, never propagated.
    pub fn commit(&mut self, state: TokenState) {
        self.state = state;
        self.persist();
    }

    /// Write the current state to disk (temp file + rename).
    pub fn persist(&self) {
        if let Err(e) = write_state(&self.path, &self.state) {
            warn!("Failed to persist token state: {e:#}");
        }
    }
}

fn load_state(path: &Path) -> Option<TokenState> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read token state from {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<TokenState>(&raw) {
        Ok(state) if state.is_consistent() => Some(state),
        Ok(state) => {
            warn!(
                "Persisted token state inconsistent (total={}, parts differ); starting fresh",
                state.total
            );
            None
        }
        Err(e) => {
            warn!("Persisted token state unreadable, starting fresh: {}", e);
            None
        }
    }
}

fn write_state(path: &Path, state: &TokenState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn default_state() -> TokenState {
        TokenState::for_model("Gemini 2.5 Pro", 1_048_576)
    }

    #[test]
    fn test_open_without_file_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join(STATE_FILE), default_state());
        assert_eq!(store.state(), &default_state());
    }

    #[test]
    fn test_commit_then_reopen_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILE);

        let mut store = StateStore::open(&path, default_state());
        let mut state = default_state();
        state.input_text = 450;
        state.thinking = 50;
        state.output_text = 120;
        state.recompute_total();
        store.commit(state.clone());

        let reopened = StateStore::open(&path, default_state());
        assert_eq!(reopened.state(), &state);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let store = StateStore::open(&path, default_state());
        assert_eq!(store.state(), &default_state());
    }

    #[test]
    fn test_inconsistent_totals_fall_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILE);
        // total does not match the category sum
        std::fs::write(
            &path,
            r#"{"model":"m","max_tokens":10,"input_text":5,"input_file":0,
                "thinking":0,"output_text":0,"output_file":0,"total":999}"#,
        )
        .unwrap();

        let store = StateStore::open(&path, default_state());
        assert_eq!(store.state(), &default_state());
    }

    #[test]
    fn test_persist_failure_is_non_fatal() {
        // Point at a path whose parent cannot be created
        let mut store = StateStore::open("/dev/null/nope/state.json", default_state());
        let mut state = default_state();
        state.output_text = 7;
        state.recompute_total();
        store.commit(state.clone());
        // In-memory state stays authoritative
        assert_eq!(store.state(), &state);
    }
}
