use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use alfred_agent::anthropic::AnthropicProvider;
use alfred_agent::Analyzer;
use alfred_clients::session_store::SessionStore;
use alfred_clients::{ClientManager, SourceEventSink};
use alfred_core::bus::MessageBus;
use alfred_core::config::{AlfredConfig, SHUTDOWN_BUDGET_SECS};
use alfred_engine::scheduler::RunGate;
use alfred_engine::sync::{CalendarApi, TokenRefresher};
use alfred_engine::{Processor, ProposalEngine, ReminderScheduler, SyncWorker};
use alfred_google::gcal::CalendarClient;
use alfred_google::gmail::GmailClient;
use alfred_google::oauth::{GoogleCredentials, OAuthClient};
use alfred_ingest::{BackfillHook, GmailPoller, HistoryDebouncer, Ingestor};
use alfred_notify::email::EmailSender;
use alfred_notify::push::PushSender;
use alfred_notify::Notifier;
use alfred_store::Store;

mod app;
mod auth;
mod error;
mod http;
mod service;

use service::ServiceManager;

#[derive(Parser)]
#[command(name = "alfred-gateway", about = "Messaging-to-calendar assistant core")]
struct Cli {
    /// Path to alfred.toml (env vars override file values).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AlfredConfig::load(cli.config.as_deref())?;

    // --- persistence --------------------------------------------------
    let store = Store::open(&config.database.path, config.encryption_key.as_deref())?;
    let purged = store.purge_expired_sessions()?;
    if purged > 0 {
        info!(purged, "expired sessions purged at startup");
    }

    // --- delivery ------------------------------------------------------
    let notifier = Arc::new(Notifier::new(
        PushSender::from_config(&config.notify.push_api_url, &config.notify.push_api_key),
        EmailSender::from_config(
            &config.notify.email_api_url,
            &config.notify.email_api_key,
            &config.notify.email_from,
        ),
    ));

    // --- agent ---------------------------------------------------------
    let provider = Arc::new(AnthropicProvider::new(
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
    ));
    let analyzer = Arc::new(Analyzer::new(
        provider,
        config.llm.model.clone(),
        config.llm.temperature,
        config.runtime.max_turns,
    ));

    // --- engine --------------------------------------------------------
    let proposals = Arc::new(ProposalEngine::new(
        store.clone(),
        notifier.clone(),
        config.runtime.confidence_floor,
    ));
    let processor = Processor::new(
        store.clone(),
        analyzer,
        proposals,
        config.ingest.message_history_size,
    );

    // --- ingestion -----------------------------------------------------
    let mut bus = MessageBus::new(config.bus_capacity());
    let debouncer = HistoryDebouncer::spawn(
        processor.clone() as Arc<dyn BackfillHook>,
        config.ingest.history_debounce_ms,
    );
    let ingestor = Arc::new(Ingestor::new(
        store.clone(),
        bus.publisher(),
        notifier.clone(),
        debouncer,
        config.ingest.message_history_size,
    ));

    // --- clients -------------------------------------------------------
    let session_store = SessionStore::new(&config.sessions.store_path)?;
    let clients = Arc::new(ClientManager::new(
        config.bridges.clone(),
        session_store,
        ingestor.clone() as Arc<dyn SourceEventSink>,
        store.clone(),
    ));

    // --- google --------------------------------------------------------
    let oauth = if config.google.credentials_json.is_empty() {
        warn!("PROVIDER_CREDENTIALS_JSON is not set — login and calendar sync are disabled");
        None
    } else {
        Some(Arc::new(OAuthClient::new(GoogleCredentials::parse(
            &config.google.credentials_json,
        )?)))
    };
    let worker_oauth = oauth
        .clone()
        .unwrap_or_else(|| Arc::new(OAuthClient::new(GoogleCredentials::unconfigured())));
    let gcal = Arc::new(CalendarClient::default());

    let gmail = Arc::new(GmailPoller::new(
        store.clone(),
        Arc::new(GmailClient::default()),
        worker_oauth.clone(),
        bus.publisher(),
        config.ingest.gmail_poll_minutes,
    ));

    // --- workers -------------------------------------------------------
    let sync = SyncWorker::new(
        store.clone(),
        gcal.clone() as Arc<dyn CalendarApi>,
        worker_oauth as Arc<dyn TokenRefresher>,
        notifier.clone(),
    );
    let services = ServiceManager::new(store.clone(), clients.clone(), gmail);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let processor_handle = processor
        .clone()
        .spawn(bus.take_receiver(), shutdown_rx.clone());
    sync.clone().spawn_sweeper(shutdown_rx.clone());
    let scheduler = ReminderScheduler::new(
        store.clone(),
        notifier.clone(),
        services.clone() as Arc<dyn RunGate>,
    );
    scheduler.spawn(shutdown_rx.clone());

    // --- restore -------------------------------------------------------
    clients.restore_all();
    services.start_restored_users();

    // --- serve ---------------------------------------------------------
    let state = Arc::new(app::AppState {
        config: config.clone(),
        store,
        clients: clients.clone(),
        notifier,
        sync,
        services,
        oauth,
        gcal,
        oauth_states: dashmap::DashMap::new(),
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.http.bind, config.http.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("alfred gateway listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // --- drain ---------------------------------------------------------
    let _ = shutdown_tx.send(true);
    let budget = std::time::Duration::from_secs(SHUTDOWN_BUDGET_SECS);
    if tokio::time::timeout(budget, processor_handle).await.is_err() {
        warn!("processor did not drain within the shutdown budget");
    }
    clients.shutdown().await;
    info!("goodbye");

    Ok(())
}
