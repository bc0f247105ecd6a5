//! The DevTools protocol subset consumed by the engine.
//!
//! tokwatch is not a CDP implementation. It needs exactly three
//! capabilities from the browser: attach to one page's network layer,
//! receive request/response lifecycle events, and fetch a response body
//! by request id. The traits below capture those seams so the engine and
//! session controller can be driven by a mock in tests; [`CdpClient`] is
//! the real WebSocket-backed implementation.

pub mod client;
pub mod protocol;

pub use client::CdpClient;

use anyhow::Result;
use async_trait::async_trait;

/// Typed network-layer event delivered to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// `Network.requestWillBeSent`
    RequestSent { url: String, method: String },
    /// `Network.responseReceived`
    ResponseReceived { url: String, request_id: String },
    /// The instrumentation session ended (voluntarily or forced)
    Detached { reason: String },
}

/// A debuggable page target reported by the browser.
#[derive(Debug, Clone)]
pub struct PageTarget {
    pub target_id: String,
    pub url: String,
    pub title: String,
}

/// Result of a successful attach.
#[derive(Debug, Clone)]
pub struct AttachedSession {
    pub session_id: String,
    pub protocol_version: String,
}

/// Raw response body as reported by `Network.getResponseBody`.
#[derive(Debug, Clone)]
pub struct ResponseBody {
    pub body: String,
    pub base64_encoded: bool,
}

/// Session lifecycle operations against the browser.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Enumerate debuggable page targets.
    async fn list_pages(&self) -> Result<Vec<PageTarget>>;

    /// Attach an instrumentation session to one target.
    async fn attach(&self, target_id: &str) -> Result<AttachedSession>;

    /// Detach the given session.
    async fn detach(&self, session_id: &str) -> Result<()>;

    /// Enable the Network and DOM domains on an attached session.
    async fn enable_domains(&self, session_id: &str) -> Result<()>;
}

/// Asynchronous response-body retrieval for the currently attached tab.
#[async_trait]
pub trait ResponseBodySource: Send + Sync {
    async fn response_body(&self, request_id: &str) -> Result<ResponseBody>;
}
