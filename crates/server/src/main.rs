use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticketdesk_core::{
    load_config, validate_config, ChangeProposer, CommandOrchestrator, EventHub,
    KeywordChangeProposer, KeywordQueryInterpreter, QueryInterpreter, SqliteTelemetryStore,
    SqliteTicketStore, TelemetryStore, TicketStore,
};

use ticketdesk_server::api::create_router;
use ticketdesk_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("TICKETDESK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    // Create SQLite ticket store
    let ticket_store: Arc<dyn TicketStore> = Arc::new(
        SqliteTicketStore::new(&config.database.path).context("Failed to create ticket store")?,
    );
    info!("Ticket store initialized");

    // Create SQLite telemetry store
    let telemetry_store: Arc<dyn TelemetryStore> = Arc::new(
        SqliteTelemetryStore::new(&config.database.path)
            .context("Failed to create telemetry store")?,
    );
    info!("Telemetry store initialized");

    // Event hub with its heartbeat loop
    let hub = EventHub::new(config.events.clone());
    hub.spawn_heartbeat();
    info!(
        "Event hub started (ping every {}ms, {} missed pings allowed)",
        config.events.ping_interval_ms, config.events.max_missed_pings
    );

    // Natural-language collaborators
    let interpreter: Arc<dyn QueryInterpreter> =
        Arc::new(KeywordQueryInterpreter::with_store(Arc::clone(&ticket_store)));
    let proposer: Arc<dyn ChangeProposer> = Arc::new(KeywordChangeProposer::new());
    info!(
        "Using interpreter: {}, proposer: {}",
        interpreter.name(),
        proposer.name()
    );

    let orchestrator = Arc::new(CommandOrchestrator::new(
        config.pipeline.clone(),
        Arc::clone(&ticket_store),
        Arc::clone(&telemetry_store),
        interpreter,
        proposer,
        hub.clone(),
    ));

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        ticket_store,
        telemetry_store,
        hub.clone(),
        orchestrator,
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub.clone()))
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM), then close every event
/// stream so graceful shutdown is not held open by long-lived responses.
async fn shutdown_signal(hub: EventHub) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Server shutting down...");
    hub.shutdown();
}
