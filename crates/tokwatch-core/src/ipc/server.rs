//! IPC server for the engine process.
//!
//! Listens on a Unix domain socket for observer UI connections. Each
//! connection receives the current snapshot immediately, then every
//! committed change; `RequestInitialState` additionally nudges the engine
//! to re-broadcast and to (re)attach to the target tab.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::broadcast::Broadcaster;
use crate::engine::EngineCommand;
use crate::ipc::protocol::*;

/// IPC server fanning snapshots out to observer connections.
pub struct IpcServer {
    path: PathBuf,
}

impl IpcServer {
    /// Start the IPC server, binding the Unix domain socket at `path`.
    pub async fn start(
        path: impl Into<PathBuf>,
        broadcaster: Arc<Broadcaster>,
        engine_tx: mpsc::Sender<EngineCommand>,
    ) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            ensure_runtime_dir(dir)?;
        }

        // Clean up stale socket
        if path.exists() {
            match UnixStream::connect(&path).await {
                Ok(_) => {
                    anyhow::bail!(
                        "Another tokwatch instance is already running (socket {} is active)",
                        path.display()
                    );
                }
                Err(_) => {
                    std::fs::remove_file(&path).with_context(|| {
                        format!("Failed to remove stale socket: {}", path.display())
                    })?;
                }
            }
        }

        let listener = UnixListener::bind(&path).context("Failed to bind IPC Unix socket")?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
            .context("Failed to set socket permissions")?;

        tokio::spawn(async move {
            Self::accept_loop(listener, broadcaster, engine_tx).await;
        });

        tracing::debug!("IPC server started");
        Ok(Self { path })
    }

    async fn accept_loop(
        listener: UnixListener,
        broadcaster: Arc<Broadcaster>,
        engine_tx: mpsc::Sender<EngineCommand>,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let broadcaster = broadcaster.clone();
                    let engine_tx = engine_tx.clone();
                    tokio::spawn(async move {
                        let id = uuid::Uuid::new_v4();
                        tracing::debug!("Observer connected: {id}");
                        if let Err(e) =
                            Self::handle_connection(stream, broadcaster, engine_tx).await
                        {
                            tracing::debug!("Observer {id} disconnected: {e}");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("IPC accept error: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        stream: UnixStream,
        broadcaster: Arc<Broadcaster>,
        engine_tx: mpsc::Sender<EngineCommand>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut buf_reader = BufReader::new(reader);
        let mut line_buf = String::new();
        let mut snapshots = broadcaster.subscribe();

        // New observers start from the latest snapshot
        let current = ServerMessage::StateSnapshot {
            snapshot: broadcaster.current(),
        };
        writer.write_all(&encode(&current)?).await?;
        writer.flush().await?;

        loop {
            tokio::select! {
                result = buf_reader.read_line(&mut line_buf) => {
                    match result {
                        Ok(0) => break, // EOF
                        Ok(_) => {
                            if let Ok(ClientMessage::RequestInitialState) =
                                decode::<ClientMessage>(line_buf.trim_end().as_bytes())
                            {
                                let msg = ServerMessage::StateSnapshot {
                                    snapshot: broadcaster.current(),
                                };
                                writer.write_all(&encode(&msg)?).await?;
                                writer.flush().await?;
                                // Best effort; the engine may be gone during shutdown
                                let _ = engine_tx.send(EngineCommand::Rebroadcast).await;
                                let _ = engine_tx.send(EngineCommand::EnsureAttached).await;
                            }
                            line_buf.clear();
                        }
                        Err(e) => {
                            tracing::debug!("IPC read error: {}", e);
                            break;
                        }
                    }
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break; // Broadcaster gone
                    }
                    let msg = ServerMessage::StateSnapshot {
                        snapshot: snapshots.borrow_and_update().clone(),
                    };
                    if writer.write_all(&encode(&msg)?).await.is_err() {
                        break;
                    }
                    let _ = writer.flush().await;
                }
            }
        }
        Ok(())
    }
}

/// Ensure the runtime directory exists with owner-only permissions.
fn ensure_runtime_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        let meta = std::fs::symlink_metadata(dir)
            .with_context(|| format!("Failed to read metadata for: {}", dir.display()))?;
        if meta.is_symlink() {
            anyhow::bail!(
                "Runtime directory is a symlink (possible attack): {}",
                dir.display()
            );
        }
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create runtime directory: {}", dir.display()))?;
    let metadata = std::fs::metadata(dir)
        .with_context(|| format!("Failed to read metadata for: {}", dir.display()))?;
    if !metadata.is_dir() {
        anyhow::bail!("Runtime path is not a directory: {}", dir.display());
    }
    let mode = metadata.permissions().mode() & 0o777;
    if mode != 0o700 {
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on: {}", dir.display()))?;
    }
    Ok(())
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
