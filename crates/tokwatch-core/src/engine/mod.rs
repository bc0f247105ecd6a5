//! The reconciler — the engine's state machine and single writer.
//!
//! Consumes protocol events, runs fetch+parse concurrently, and applies
//! results to the token state under well-defined merge rules: resets on
//! request start, model-switch resets, last-usage-wins, and in-event-order
//! application of overlapping fetches (see [`merge`]).

pub mod merge;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::broadcast::{Broadcaster, StateSnapshot};
use crate::cdp::NetEvent;
use crate::fetch::ResponseFetcher;
use crate::parse::{self, ParsedUsage};
use crate::rules::ModelRules;
use crate::session::SessionController;
use crate::state::StateStore;

use merge::MergeQueue;

/// Which traffic belongs to the observed conversation.
#[derive(Debug, Clone)]
pub struct ApiTarget {
    /// URL fragment of the chat service's generate endpoint
    pub path_fragment: String,
    /// HTTP method that starts a turn
    pub method: String,
}

impl Default for ApiTarget {
    fn default() -> Self {
        Self {
            path_fragment: "batchexecute".into(),
            method: "POST".into(),
        }
    }
}

impl ApiTarget {
    fn matches_request(&self, url: &str, method: &str) -> bool {
        url.contains(&self.path_fragment) && method.eq_ignore_ascii_case(&self.method)
    }

    fn matches_response(&self, url: &str) -> bool {
        url.contains(&self.path_fragment)
    }
}

/// Per-turn phase of the observed conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    /// No in-flight request
    #[default]
    Idle,
    /// A matching request went out; counters were reset for the new turn
    AwaitingResponse,
    /// A matching response arrived; body fetch + parse in flight
    ProcessingResponse,
}

/// Requests from the observer surface into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Re-broadcast the current state (observer just connected)
    Rebroadcast,
    /// (Re)attach to the target tab if not already attached
    EnsureAttached,
}

/// Outcome of one fetch+parse, applied in event order.
#[derive(Debug, Clone)]
struct TurnSample {
    model: Option<&'static str>,
    usage: Option<ParsedUsage>,
}

/// The engine: owns the only mutable token state and the session
/// lifecycle, driven by protocol events and observer commands.
pub struct Engine {
    store: StateStore,
    rules: ModelRules,
    broadcaster: Arc<Broadcaster>,
    fetcher: Arc<ResponseFetcher>,
    session: SessionController,
    audit: Arc<AuditLog>,
    target: ApiTarget,
    /// URL fragment identifying the tab to observe
    page_fragment: String,
    phase: TurnPhase,
    queue: MergeQueue<TurnSample>,
    connected: bool,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StateStore,
        rules: ModelRules,
        broadcaster: Arc<Broadcaster>,
        fetcher: Arc<ResponseFetcher>,
        session: SessionController,
        audit: Arc<AuditLog>,
        target: ApiTarget,
        page_fragment: String,
    ) -> Self {
        Self {
            store,
            rules,
            broadcaster,
            fetcher,
            session,
            audit,
            target,
            page_fragment,
            phase: TurnPhase::Idle,
            queue: MergeQueue::new(),
            connected: true,
        }
    }

    /// Drive the engine until the event stream ends.
    ///
    /// All token-state mutation happens on this task; fetch+parse work is
    /// spawned concurrently and funneled back through the merge queue.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<NetEvent>,
        mut commands: mpsc::Receiver<EngineCommand>,
    ) {
        let (sample_tx, mut samples) = mpsc::channel::<(u64, Option<TurnSample>)>(32);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.on_event(event, &sample_tx),
                    None => break,
                },
                Some((seq, sample)) = samples.recv() => self.on_sample(seq, sample),
                Some(command) = commands.recv() => self.on_command(command).await,
            }
        }
        // Final mirror of whatever the session accumulated
        self.store.persist();
    }

    fn on_event(&mut self, event: NetEvent, sample_tx: &mpsc::Sender<(u64, Option<TurnSample>)>) {
        match event {
            NetEvent::RequestSent { url, method } => {
                if !self.target.matches_request(&url, &method) {
                    return;
                }
                debug!("Turn start: {method} {url}");
                let mut state = self.store.state().clone();
                state.reset_counters();
                self.store.commit(state);
                self.broadcast_current();
                self.phase = TurnPhase::AwaitingResponse;
            }
            NetEvent::ResponseReceived { url, request_id } => {
                if !self.target.matches_response(&url) {
                    return;
                }
                self.phase = TurnPhase::ProcessingResponse;
                let seq = self.queue.begin();
                let fetcher = self.fetcher.clone();
                let audit = self.audit.clone();
                let tx = sample_tx.clone();
                tokio::spawn(async move {
                    let sample = fetch_and_parse(&fetcher, &audit, &request_id).await;
                    let _ = tx.send((seq, sample)).await;
                });
            }
            NetEvent::Detached { reason } => {
                self.session.on_detach(&reason);
                self.connected = false;
                self.audit.warning(format!("Session detached: {reason}"));
                // Counters survive; only the label is annotated
                self.broadcaster
                    .publish(StateSnapshot::disconnected(self.store.state()));
            }
        }
    }

    /// Feed one completed fetch into the ordering queue and apply
    /// whatever became ready.
    fn on_sample(&mut self, seq: u64, sample: Option<TurnSample>) {
        for ready in self.queue.complete(seq, sample) {
            self.apply_sample(ready);
        }
        if self.queue.is_drained() && self.phase == TurnPhase::ProcessingResponse {
            self.phase = TurnPhase::Idle;
        }
    }

    async fn on_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Rebroadcast => self.broadcast_current(),
            EngineCommand::EnsureAttached => self.ensure_attached().await,
        }
    }

    /// Merge one sample into the token state.
    fn apply_sample(&mut self, sample: TurnSample) {
        let mut state = self.store.state().clone();

        if let Some(model) = sample.model {
            if model != state.model {
                info!("Model switched: {} -> {}", state.model, model);
                state.model = model.to_string();
                state.max_tokens = self.rules.max_tokens_for(model);
                state.reset_counters();
            }
        }

        if let Some(usage) = sample.usage {
            let thinking = usage
                .thoughts_tokens
                .unwrap_or(self.rules.thought_cost_per_turn);
            state.thinking = thinking;
            state.input_text = usage.prompt_tokens.saturating_sub(thinking);
            state.output_text = usage.candidates_tokens;
            state.recompute_total();
        }

        // Identical merges produce identical state; skip the redundant
        // persistence write and notification.
        if state != *self.store.state() {
            self.store.commit(state);
            self.broadcast_current();
        }
    }

    async fn ensure_attached(&mut self) {
        if self.session.is_attached() {
            return;
        }
        let page = match self.session.locate(&self.page_fragment).await {
            Ok(Some(page)) => page,
            Ok(None) => {
                debug!("No open tab matches '{}'", self.page_fragment);
                return;
            }
            Err(e) => {
                warn!("Target discovery failed: {e:#}");
                return;
            }
        };
        match self.session.attach(&page.target_id).await {
            Ok(()) => {
                self.connected = true;
                self.audit.info(format!("Attached to {}", page.url));
                self.broadcast_current();
            }
            Err(e) => {
                warn!("{e}");
                self.audit.error("Attach failed", e.reason);
            }
        }
    }

    fn broadcast_current(&self) {
        let snapshot = if self.connected {
            StateSnapshot::connected(self.store.state())
        } else {
            StateSnapshot::disconnected(self.store.state())
        };
        self.broadcaster.publish(snapshot);
    }
}

/// Fetch one response body and extract whatever it carries. `None` means
/// the fetch failed and the slot is released without a merge.
async fn fetch_and_parse(
    fetcher: &ResponseFetcher,
    audit: &AuditLog,
    request_id: &str,
) -> Option<TurnSample> {
    let body = match fetcher.fetch(request_id).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Dropping response {request_id}: {e}");
            audit.error(format!("Response {request_id} dropped"), e.to_string());
            return None;
        }
    };
    let model = parse::parse_model_name(&body);
    let usage = parse::parse_usage(&body);
    if usage.is_none() {
        audit.warning(format!(
            "No usage metadata in response {request_id} ({} bytes)",
            body.len()
        ));
    }
    Some(TurnSample { model, usage })
}
