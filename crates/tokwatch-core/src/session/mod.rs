//! Attach/detach lifecycle for the instrumentation session.
//!
//! Maintains a 1:1 mapping between "the tab the user wants observed" and
//! an active session: at most one session per process, keyed by target
//! id. Attaching to a different tab detaches the existing session first
//! (best-effort). The controller owns session lifecycle exclusively; it
//! never touches token state.

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cdp::{PageTarget, SessionTransport};

/// Instrumentation could not bind to the tab. Reported once; the session
/// stays idle and is retried only on the next explicit request.
#[derive(Debug, Error)]
#[error("could not attach to tab {target_id}: {reason}")]
pub struct AttachFailed {
    pub target_id: String,
    pub reason: String,
}

/// Lifecycle phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session, none being established
    #[default]
    Idle,
    /// Attach call in flight
    Attaching,
    /// Session live, domains enabled
    Attached,
}

/// The one active session, at most one per process.
#[derive(Debug, Clone)]
pub struct InstrumentationSession {
    pub target_id: String,
    pub session_id: String,
    pub protocol_version: String,
}

/// Owns the attach/detach lifecycle for exactly one tab at a time.
pub struct SessionController {
    transport: Arc<dyn SessionTransport>,
    phase: SessionPhase,
    session: Option<InstrumentationSession>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            transport,
            phase: SessionPhase::Idle,
            session: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&InstrumentationSession> {
        self.session.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.phase == SessionPhase::Attached
    }

    pub fn is_attached_to(&self, target_id: &str) -> bool {
        self.is_attached()
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.target_id == target_id)
    }

    /// Find the first debuggable page whose URL contains `fragment`.
    pub async fn locate(&self, fragment: &str) -> Result<Option<PageTarget>> {
        let pages = self.transport.list_pages().await?;
        Ok(pages.into_iter().find(|p| p.url.contains(fragment)))
    }

    /// Attach to `target_id`, enabling the network and DOM domains.
    ///
    /// No-op when already attached to that tab. When attached to a
    /// different tab the old session is detached first; detach failures
    /// are logged, not fatal.
    pub async fn attach(&mut self, target_id: &str) -> Result<(), AttachFailed> {
        if self.is_attached_to(target_id) {
            debug!("Already attached to {target_id}");
            return Ok(());
        }
        if let Some(old) = self.session.take() {
            if let Err(e) = self.transport.detach(&old.session_id).await {
                warn!("Best-effort detach of {} failed: {e:#}", old.target_id);
            }
            self.phase = SessionPhase::Idle;
        }

        self.phase = SessionPhase::Attaching;
        let attached = match self.transport.attach(target_id).await {
            Ok(attached) => attached,
            Err(e) => {
                self.clear();
                return Err(AttachFailed {
                    target_id: target_id.to_string(),
                    reason: format!("{e:#}"),
                });
            }
        };

        if let Err(e) = self.transport.enable_domains(&attached.session_id).await {
            let _ = self.transport.detach(&attached.session_id).await;
            self.clear();
            return Err(AttachFailed {
                target_id: target_id.to_string(),
                reason: format!("could not enable domains: {e:#}"),
            });
        }

        info!(
            "Attached to tab {target_id} (session {}, protocol {})",
            attached.session_id, attached.protocol_version
        );
        self.session = Some(InstrumentationSession {
            target_id: target_id.to_string(),
            session_id: attached.session_id,
            protocol_version: attached.protocol_version,
        });
        self.phase = SessionPhase::Attached;
        Ok(())
    }

    /// Voluntarily detach the current session, if any.
    pub async fn detach(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.transport.detach(&session.session_id).await {
                warn!("Detach of {} failed: {e:#}", session.target_id);
            }
        }
        self.phase = SessionPhase::Idle;
    }

    /// The host ended the session involuntarily (devtools opened on the
    /// tab, tab closed, browser gone). Clears session state; the caller
    /// emits the disconnected broadcast.
    pub fn on_detach(&mut self, reason: &str) {
        if let Some(session) = self.session.take() {
            info!("Session for tab {} detached: {reason}", session.target_id);
        }
        self.phase = SessionPhase::Idle;
    }

    fn clear(&mut self) {
        self.session = None;
        self.phase = SessionPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::AttachedSession;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<Vec<String>>,
        fail_attach: bool,
        fail_enable: bool,
        pages: Vec<PageTarget>,
    }

    impl MockTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl SessionTransport for MockTransport {
        async fn list_pages(&self) -> Result<Vec<PageTarget>> {
            self.calls.lock().push("list".into());
            Ok(self.pages.clone())
        }

        async fn attach(&self, target_id: &str) -> Result<AttachedSession> {
            self.calls.lock().push(format!("attach {target_id}"));
            if self.fail_attach {
                anyhow::bail!("tab is being debugged");
            }
            Ok(AttachedSession {
                session_id: format!("S-{target_id}"),
                protocol_version: "1.3".into(),
            })
        }

        async fn detach(&self, session_id: &str) -> Result<()> {
            self.calls.lock().push(format!("detach {session_id}"));
            Ok(())
        }

        async fn enable_domains(&self, session_id: &str) -> Result<()> {
            self.calls.lock().push(format!("enable {session_id}"));
            if self.fail_enable {
                anyhow::bail!("Network.enable refused");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_attach_success() {
        let transport = Arc::new(MockTransport::default());
        let mut ctl = SessionController::new(transport.clone());
        assert_eq!(ctl.phase(), SessionPhase::Idle);

        ctl.attach("T1").await.unwrap();
        assert_eq!(ctl.phase(), SessionPhase::Attached);
        assert!(ctl.is_attached_to("T1"));
        assert_eq!(transport.calls(), vec!["attach T1", "enable S-T1"]);
    }

    #[tokio::test]
    async fn test_attach_same_tab_is_noop() {
        let transport = Arc::new(MockTransport::default());
        let mut ctl = SessionController::new(transport.clone());
        ctl.attach("T1").await.unwrap();
        ctl.attach("T1").await.unwrap();
        // No second attach issued
        assert_eq!(transport.calls(), vec!["attach T1", "enable S-T1"]);
    }

    #[tokio::test]
    async fn test_attach_other_tab_detaches_first() {
        let transport = Arc::new(MockTransport::default());
        let mut ctl = SessionController::new(transport.clone());
        ctl.attach("T1").await.unwrap();
        ctl.attach("T2").await.unwrap();
        assert!(ctl.is_attached_to("T2"));
        assert_eq!(
            transport.calls(),
            vec!["attach T1", "enable S-T1", "detach S-T1", "attach T2", "enable S-T2"]
        );
    }

    #[tokio::test]
    async fn test_attach_failure_clears_state() {
        let transport = Arc::new(MockTransport {
            fail_attach: true,
            ..Default::default()
        });
        let mut ctl = SessionController::new(transport);
        let err = ctl.attach("T1").await.unwrap_err();
        assert!(err.reason.contains("being debugged"));
        assert_eq!(ctl.phase(), SessionPhase::Idle);
        assert!(ctl.session().is_none());
    }

    #[tokio::test]
    async fn test_enable_failure_detaches_and_reports() {
        let transport = Arc::new(MockTransport {
            fail_enable: true,
            ..Default::default()
        });
        let mut ctl = SessionController::new(transport.clone());
        assert!(ctl.attach("T1").await.is_err());
        assert_eq!(ctl.phase(), SessionPhase::Idle);
        assert_eq!(
            transport.calls(),
            vec!["attach T1", "enable S-T1", "detach S-T1"]
        );
    }

    #[tokio::test]
    async fn test_forced_detach_allows_reattach() {
        let transport = Arc::new(MockTransport::default());
        let mut ctl = SessionController::new(transport);
        ctl.attach("T1").await.unwrap();
        ctl.on_detach("devtools opened");
        assert_eq!(ctl.phase(), SessionPhase::Idle);
        ctl.attach("T1").await.unwrap();
        assert!(ctl.is_attached_to("T1"));
    }

    #[tokio::test]
    async fn test_locate_filters_by_url_fragment() {
        let transport = Arc::new(MockTransport {
            pages: vec![
                PageTarget {
                    target_id: "T1".into(),
                    url: "https://news.example.com".into(),
                    title: "News".into(),
                },
                PageTarget {
                    target_id: "T2".into(),
                    url: "https://gemini.google.com/app".into(),
                    title: "Gemini".into(),
                },
            ],
            ..Default::default()
        });
        let ctl = SessionController::new(transport);
        let page = ctl.locate("gemini.google.com").await.unwrap().unwrap();
        assert_eq!(page.target_id, "T2");
        assert!(ctl.locate("claude.ai").await.unwrap().is_none());
    }
}
