//! IPC protocol definitions for engine ↔ observer UI communication.
//!
//! Uses newline-delimited JSON (ndjson) for bidirectional messaging over
//! Unix domain sockets.

use std::path::PathBuf;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::broadcast::StateSnapshot;

/// Get the base runtime directory, preferring XDG_RUNTIME_DIR for
/// security.
pub fn state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg).join("tokwatch")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/tokwatch-{}", uid))
    }
}

/// Get the IPC socket path.
pub fn socket_path() -> PathBuf {
    state_dir().join("observer.sock")
}

/// Message from an observer UI to the engine (upstream).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Request the current state snapshot; the engine re-broadcasts and
    /// (re)attaches to the target tab if it is not already attached.
    RequestInitialState,
}

/// Message from the engine to observer UIs (downstream).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Current token budget, sent on every committed change and on every
    /// `RequestInitialState`.
    StateSnapshot { snapshot: StateSnapshot },
}

/// Encode a message as ndjson (JSON + newline).
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let mut json = serde_json::to_vec(msg)?;
    json.push(b'\n');
    Ok(json)
}

/// Decode a message from a JSON line.
pub fn decode<T: DeserializeOwned>(line: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(line)?)
}
