//! Bounded, normalized response-body retrieval.
//!
//! Wraps the instrumentation protocol's "get response body by request id"
//! call with a timeout so callers never block indefinitely, and decodes
//! base64-encoded bodies. On any [`FetchError`] the reconciler drops the
//! response without mutating state — partial data is never merged.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;
use tokio::time::timeout;

use crate::cdp::ResponseBodySource;

/// Default bound on a single body fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a response body could not be retrieved.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The underlying call never resolved within the bounded wait
    #[error("response body fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The host reported an error for the request id
    #[error("instrumentation call failed: {0:#}")]
    Protocol(#[source] anyhow::Error),

    /// The host returned an empty or shapeless body
    #[error("response body was empty")]
    EmptyBody,

    /// The body claimed base64 encoding but did not decode
    #[error("response body base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Retrieves full response bodies for the currently attached tab.
pub struct ResponseFetcher {
    source: Arc<dyn ResponseBodySource>,
    timeout: Duration,
}

impl ResponseFetcher {
    pub fn new(source: Arc<dyn ResponseBodySource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Fetch and decode the response body for `request_id`.
    pub async fn fetch(&self, request_id: &str) -> Result<String, FetchError> {
        let raw = timeout(self.timeout, self.source.response_body(request_id))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(FetchError::Protocol)?;

        if raw.body.is_empty() {
            return Err(FetchError::EmptyBody);
        }
        if raw.base64_encoded {
            let bytes = BASE64.decode(raw.body.as_bytes())?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            Ok(raw.body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::ResponseBody;
    use anyhow::Result;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct FixedSource(ResponseBody);

    #[async_trait]
    impl ResponseBodySource for FixedSource {
        async fn response_body(&self, _request_id: &str) -> Result<ResponseBody> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ResponseBodySource for FailingSource {
        async fn response_body(&self, request_id: &str) -> Result<ResponseBody> {
            anyhow::bail!("No resource with given identifier: {request_id}")
        }
    }

    struct StalledSource;

    #[async_trait]
    impl ResponseBodySource for StalledSource {
        async fn response_body(&self, _request_id: &str) -> Result<ResponseBody> {
            futures_util::future::pending().await
        }
    }

    fn fetcher(source: impl ResponseBodySource + 'static) -> ResponseFetcher {
        ResponseFetcher::new(Arc::new(source), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_plain_body_passthrough() {
        let f = fetcher(FixedSource(ResponseBody {
            body: "hello".into(),
            base64_encoded: false,
        }));
        assert_eq!(f.fetch("1.1").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_base64_body_decoded() {
        let f = fetcher(FixedSource(ResponseBody {
            body: BASE64.encode("usage payload"),
            base64_encoded: true,
        }));
        assert_eq!(f.fetch("1.1").await.unwrap(), "usage payload");
    }

    #[tokio::test]
    async fn test_empty_body_is_an_error() {
        let f = fetcher(FixedSource(ResponseBody {
            body: String::new(),
            base64_encoded: false,
        }));
        assert!(matches!(f.fetch("1.1").await, Err(FetchError::EmptyBody)));
    }

    #[tokio::test]
    async fn test_host_error_normalized() {
        let f = fetcher(FailingSource);
        assert!(matches!(f.fetch("1.1").await, Err(FetchError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_invalid_base64_is_an_error() {
        let f = fetcher(FixedSource(ResponseBody {
            body: "not base64 !!!".into(),
            base64_encoded: true,
        }));
        assert!(matches!(f.fetch("1.1").await, Err(FetchError::Decode(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_call_times_out() {
        let f = fetcher(StalledSource);
        assert!(matches!(f.fetch("1.1").await, Err(FetchError::Timeout(_))));
    }
}
