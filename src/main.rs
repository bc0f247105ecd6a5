//! tokwatch — passive token-budget watcher for a browser AI chat tab.
//!
//! Connects to a browser's DevTools WebSocket endpoint, observes the chat
//! tab's network traffic, and keeps a running token budget that observer
//! UIs read over a Unix socket.

mod config;
mod status;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Config, Settings};
use tokwatch_core::audit::AuditLog;
use tokwatch_core::broadcast::{Broadcaster, StateSnapshot};
use tokwatch_core::cdp::{CdpClient, ResponseBodySource, SessionTransport};
use tokwatch_core::engine::{ApiTarget, Engine, EngineCommand};
use tokwatch_core::fetch::ResponseFetcher;
use tokwatch_core::ipc::{socket_path, IpcServer};
use tokwatch_core::rules::ModelRules;
use tokwatch_core::session::SessionController;
use tokwatch_core::state::{StateStore, TokenState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Config::parse_args();
    setup_logging(cli.debug);

    if cli.is_status_mode() {
        return status::run().await;
    }

    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_cli(&cli);
    settings.validate();

    run(settings).await
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("tokwatch=debug,tokwatch_core=debug"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("tokwatch=info,tokwatch_core=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn run(settings: Settings) -> Result<()> {
    let rules = ModelRules::load(settings.rules_path.as_deref())?;
    let default_state = TokenState::for_model(
        rules.default_model.clone(),
        rules.max_tokens_for(&rules.default_model),
    );
    let state_path = settings
        .state_path
        .clone()
        .unwrap_or_else(StateStore::default_path);
    let store = StateStore::open(state_path, default_state);
    let audit = Arc::new(AuditLog::open(AuditLog::default_path()));
    let broadcaster = Arc::new(Broadcaster::new(StateSnapshot::connected(store.state())));

    info!("Connecting to browser at {}", settings.browser_ws);
    let (client, events) = CdpClient::connect(&settings.browser_ws).await?;
    let fetcher = Arc::new(ResponseFetcher::new(
        client.clone() as Arc<dyn ResponseBodySource>,
        Duration::from_millis(settings.fetch_timeout_ms),
    ));
    let session = SessionController::new(client.clone() as Arc<dyn SessionTransport>);

    let (command_tx, command_rx) = mpsc::channel(16);
    let _ipc = IpcServer::start(socket_path(), broadcaster.clone(), command_tx.clone()).await?;

    let engine = Engine::new(
        store,
        rules,
        broadcaster,
        fetcher,
        session,
        audit,
        ApiTarget {
            path_fragment: settings.api_path.clone(),
            method: "POST".to_string(),
        },
        settings.page_fragment.clone(),
    );

    // Attach to the chat tab straight away; observers nudge a retry via
    // RequestInitialState if the tab is not open yet.
    command_tx.send(EngineCommand::EnsureAttached).await?;

    let mut engine_task = tokio::spawn(engine.run(events, command_rx));
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
        result = &mut engine_task => {
            warn!("Browser connection lost");
            result?;
        }
    }
    Ok(())
}
