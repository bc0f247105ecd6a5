//! Capped on-disk diagnostics log.
//!
//! A small ring of recent engine events (attach failures, parse misses,
//! persistence errors) persisted beside the state file so drift in the
//! upstream wire format can be diagnosed after the fact. Writes are
//! best-effort; the log never blocks or fails the engine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum retained entries; older ones are dropped.
const MAX_LOG_ENTRIES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<String>,
}

/// Append-mostly diagnostics ring, mirrored to a JSON file.
pub struct AuditLog {
    path: Option<PathBuf>,
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    /// Default location beside the persisted token state.
    pub fn default_path() -> PathBuf {
        crate::state::StateStore::default_path().with_file_name("audit.json")
    }

    /// Open the log, loading whatever prior entries are readable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    /// In-memory only log, used in tests and when no data dir exists.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn error(&self, message: impl Into<String>, details: impl Into<String>) {
        self.record(AuditLevel::Error, message.into(), Some(details.into()));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.record(AuditLevel::Warning, message.into(), None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(AuditLevel::Info, message.into(), None);
    }

    fn record(&self, level: AuditLevel, message: String, details: Option<String>) {
        let mut entries = self.entries.lock();
        entries.push(AuditEntry {
            timestamp: Utc::now(),
            level,
            message,
            details,
        });
        let excess = entries.len().saturating_sub(MAX_LOG_ENTRIES);
        if excess > 0 {
            entries.drain(..excess);
        }
        if let Some(path) = &self.path {
            if let Ok(json) = serde_json::to_vec(&*entries) {
                if let Err(e) = std::fs::write(path, json) {
                    debug!("Audit log write failed: {}", e);
                }
            }
        }
    }

    /// Snapshot of retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_entries_are_capped() {
        let log = AuditLog::ephemeral();
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            log.info(format!("entry {i}"));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), MAX_LOG_ENTRIES);
        assert_eq!(entries[0].message, "entry 10");
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        {
            let log = AuditLog::open(&path);
            log.error("attach failed", "tab closed");
            log.warning("usage metadata missing");
        }
        let reopened = AuditLog::open(&path);
        let entries = reopened.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, AuditLevel::Error);
        assert_eq!(entries[0].details.as_deref(), Some("tab closed"));
    }

    #[test]
    fn test_unreadable_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        std::fs::write(&path, "not json").unwrap();
        let log = AuditLog::open(&path);
        assert!(log.entries().is_empty());
    }
}
