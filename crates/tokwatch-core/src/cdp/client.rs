//! WebSocket-backed DevTools protocol client.
//!
//! One connection to the browser endpoint carries everything: command
//! replies are matched to callers through a pending map keyed by command
//! id, and network-lifecycle events for the attached session are fanned
//! out on an mpsc channel as typed [`NetEvent`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::protocol::*;
use super::{
    AttachedSession, NetEvent, PageTarget, ResponseBody, ResponseBodySource, SessionTransport,
};

/// Bounded wait for any single command reply.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// DevTools protocol client for one browser endpoint.
pub struct CdpClient {
    out_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    session: RwLock<Option<String>>,
}

impl CdpClient {
    /// Connect to the browser's DevTools WebSocket endpoint.
    ///
    /// Returns the client plus the receiver of network events for the
    /// session attached later via [`SessionTransport::attach`].
    pub async fn connect(url: &str) -> Result<(Arc<Self>, mpsc::Receiver<NetEvent>)> {
        let (ws, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to browser endpoint {url}"))?;
        let (mut write, read) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (event_tx, event_rx) = mpsc::channel::<NetEvent>(256);

        let client = Arc::new(Self {
            out_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            session: RwLock::new(None),
        });

        tokio::spawn(async move {
            while let Some(json) = out_rx.recv().await {
                if write.send(Message::text(json)).await.is_err() {
                    break;
                }
            }
        });

        let reader = client.clone();
        tokio::spawn(async move {
            reader.read_loop(read, event_tx).await;
        });

        Ok((client, event_rx))
    }

    /// Session id of the currently attached target, if any.
    pub fn current_session(&self) -> Option<String> {
        self.session.read().clone()
    }

    /// Issue one command and await its reply, bounded by
    /// [`COMMAND_TIMEOUT`].
    pub async fn execute(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let cmd = Command {
            id,
            method,
            session_id,
            params,
        };
        let json = serde_json::to_string(&cmd)?;
        if self.out_tx.send(json).await.is_err() {
            self.pending.lock().remove(&id);
            anyhow::bail!("Browser connection closed");
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => anyhow::bail!("Browser connection closed while awaiting {method}"),
            Err(_) => {
                self.pending.lock().remove(&id);
                anyhow::bail!("{method} did not reply within {COMMAND_TIMEOUT:?}")
            }
        }
    }

    async fn read_loop(self: Arc<Self>, mut read: WsRead, event_tx: mpsc::Sender<NetEvent>) {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_frame(text.as_str(), &event_tx).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Browser connection error: {}", e);
                    break;
                }
            }
        }

        // Connection gone: fail anything still waiting, then let the
        // engine see a terminal detach.
        let waiters: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in waiters {
            let _ = tx.send(Err(anyhow::anyhow!("Browser connection closed")));
        }
        *self.session.write() = None;
        let _ = event_tx
            .send(NetEvent::Detached {
                reason: "browser connection closed".into(),
            })
            .await;
    }

    async fn handle_frame(&self, text: &str, event_tx: &mpsc::Sender<NetEvent>) {
        let frame: Incoming = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Unparseable protocol frame ({} bytes): {}", text.len(), e);
                return;
            }
        };

        if let Some(id) = frame.id {
            let reply = match frame.error {
                Some(err) => Err(anyhow::anyhow!("{} (code {})", err.message, err.code)),
                None => Ok(frame.result.unwrap_or(Value::Null)),
            };
            if let Some(tx) = self.pending.lock().remove(&id) {
                let _ = tx.send(reply);
            }
            return;
        }

        let (Some(method), Some(params)) = (frame.method.as_deref(), frame.params) else {
            return;
        };
        let from_current = {
            let current = self.session.read();
            current.is_some() && current.as_deref() == frame.session_id.as_deref()
        };
        if method == "Target.detachedFromTarget" {
            // Arrives on the parent connection, not the session itself
            if let Ok(detached) = serde_json::from_value::<DetachedFromTarget>(params) {
                let ours = {
                    let mut current = self.session.write();
                    let ours = current.as_deref() == Some(detached.session_id.as_str());
                    if ours {
                        *current = None;
                    }
                    ours
                };
                if ours {
                    let _ = event_tx
                        .send(NetEvent::Detached {
                            reason: "target detached".into(),
                        })
                        .await;
                }
            }
            return;
        }
        if !from_current {
            return;
        }
        if let Some(event) = net_event(method, params) {
            let _ = event_tx.send(event).await;
        }
    }
}

/// Translate a session-scoped protocol event into a [`NetEvent`].
fn net_event(method: &str, params: Value) -> Option<NetEvent> {
    match method {
        "Network.requestWillBeSent" => {
            let ev: RequestWillBeSent = serde_json::from_value(params).ok()?;
            Some(NetEvent::RequestSent {
                url: ev.request.url,
                method: ev.request.method,
            })
        }
        "Network.responseReceived" => {
            let ev: ResponseReceived = serde_json::from_value(params).ok()?;
            Some(NetEvent::ResponseReceived {
                url: ev.response.url,
                request_id: ev.request_id,
            })
        }
        _ => None,
    }
}

#[async_trait]
impl SessionTransport for CdpClient {
    async fn list_pages(&self) -> Result<Vec<PageTarget>> {
        let result = self.execute("Target.getTargets", json!({}), None).await?;
        let targets: GetTargets =
            serde_json::from_value(result).context("Unexpected Target.getTargets reply")?;
        Ok(targets
            .target_infos
            .into_iter()
            .filter(|t| t.kind == "page")
            .map(|t| PageTarget {
                target_id: t.target_id,
                url: t.url,
                title: t.title,
            })
            .collect())
    }

    async fn attach(&self, target_id: &str) -> Result<AttachedSession> {
        let result = self
            .execute(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let attached: AttachToTarget =
            serde_json::from_value(result).context("Unexpected Target.attachToTarget reply")?;
        *self.session.write() = Some(attached.session_id.clone());
        Ok(AttachedSession {
            session_id: attached.session_id,
            protocol_version: PROTOCOL_VERSION.to_string(),
        })
    }

    async fn detach(&self, session_id: &str) -> Result<()> {
        self.execute(
            "Target.detachFromTarget",
            json!({ "sessionId": session_id }),
            None,
        )
        .await?;
        let mut current = self.session.write();
        if current.as_deref() == Some(session_id) {
            *current = None;
        }
        Ok(())
    }

    async fn enable_domains(&self, session_id: &str) -> Result<()> {
        self.execute("Network.enable", json!({}), Some(session_id))
            .await?;
        self.execute("DOM.enable", json!({}), Some(session_id))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResponseBodySource for CdpClient {
    async fn response_body(&self, request_id: &str) -> Result<ResponseBody> {
        let session = self
            .current_session()
            .context("No attached instrumentation session")?;
        let result = self
            .execute(
                "Network.getResponseBody",
                json!({ "requestId": request_id }),
                Some(&session),
            )
            .await?;
        let body: GetResponseBody =
            serde_json::from_value(result).context("Unexpected Network.getResponseBody reply")?;
        Ok(ResponseBody {
            body: body.body,
            base64_encoded: body.base64_encoded,
        })
    }
}
