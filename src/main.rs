use anyhow::{Context, Result};
use axum::{Router, middleware, routing::get};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{Level, error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use chat_warden::{
    ChannelTrustStateMachine, ConfigHotReloader, DatabasePool, DryRunAdapter, EnforcementAdapter,
    EnforcementLedger, LimitsConfig, MemoryStore, ProfileService, ReconciliationEngine,
    TelegramAdapter, TrustStore, WardenError,
    api::{
        AdminApiState, AdminAuthState, auth_middleware, create_admin_router, logging_middleware,
        security_headers_middleware,
    },
    config::{WardenConfig, sanitize_for_logging},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - this validates all security requirements
    let config = WardenConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!("Please check WARDEN_* environment variables.");
        e
    })?;

    init_logging(&config)?;

    info!("Starting chat warden");
    info!(
        admin_key = %sanitize_for_logging(&config.admin.api_key),
        postgres = config.database.postgres_enabled,
        "Configuration loaded"
    );

    let store = init_store(&config).await?;
    let (adapter, dry_run) = init_adapter(&config)?;

    // Limits: start from defaults, then apply the file if present
    let reloader = Arc::new(ConfigHotReloader::new(
        &config.limits.path,
        LimitsConfig::default(),
    ));
    match reloader.reload().await {
        Ok(outcome) => info!(outcome = ?outcome, "Initial limits loaded"),
        Err(WardenError::Io(e)) => warn!(
            path = %config.limits.path.display(),
            error = %e,
            "Limits file unreadable, running with defaults"
        ),
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Invalid limits file {}", config.limits.path.display())
            });
        }
    }
    let limits = reloader.handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ledger = Arc::new(EnforcementLedger::new(
        store.clone(),
        adapter.clone(),
        limits.clone(),
    ));
    let machine = Arc::new(ChannelTrustStateMachine::new(
        store.clone(),
        ledger.clone(),
        limits.clone(),
    ));
    let profiles = Arc::new(ProfileService::new(store.clone(), machine.clone(), limits));
    let reconciler = Arc::new(
        ReconciliationEngine::new(store.clone(), adapter.clone())
            .with_bootstrap(config.reconciliation.bootstrap.clone())
            .with_shutdown(shutdown_rx.clone()),
    );

    // Background tasks
    let mut tasks = Vec::new();
    {
        let reloader = reloader.clone();
        let poll = Duration::from_secs(config.limits.poll_interval_secs);
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { reloader.run(poll, shutdown).await }));
    }
    if dry_run {
        warn!("Dry-run adapter active, enforcement is logged only and periodic reconciliation is off");
    } else {
        let reconciler = reconciler.clone();
        let interval = Duration::from_secs(config.reconciliation.interval_secs);
        let chats = config.reconciliation.chat_ids.clone();
        tasks.push(tokio::spawn(async move { reconciler.run(interval, chats).await }));
    }
    {
        let machine = machine.clone();
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = ticker.tick() => machine.limiter().cleanup(),
                    _ = shutdown.changed() => break,
                }
            }
        }));
    }

    let auth_state = AdminAuthState::new(config.admin.api_key.clone());
    let app = Router::new()
        .merge(create_admin_router(AdminApiState {
            machine,
            ledger,
            reconciler,
            reloader,
            profiles,
        }))
        .route("/health", get(|| async { "OK" }))
        // Apply middleware layers (order matters!)
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    info!("Admin API listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("Admin API server failed")?;

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task ended abnormally");
        }
    }

    info!("Chat warden stopped");
    Ok(())
}

/// Initialize logging from configuration
fn init_logging(config: &WardenConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

/// PostgreSQL when enabled, otherwise the in-memory store
async fn init_store(config: &WardenConfig) -> Result<Arc<dyn TrustStore>> {
    if !config.database.postgres_enabled {
        warn!("PostgreSQL disabled, state will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = DatabasePool::new(
        &config.database.postgres_url,
        config.database.max_connections,
    )
    .await
    .map_err(|e| anyhow::anyhow!(e))
    .context("Failed to connect to PostgreSQL")?;
    pool.init_schema()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to initialize database schema")?;

    Ok(Arc::new(pool))
}

/// Telegram adapter when a token is configured, otherwise the log-only adapter
fn init_adapter(config: &WardenConfig) -> Result<(Arc<dyn EnforcementAdapter>, bool)> {
    if !config.enforcement_enabled() {
        return Ok((Arc::new(DryRunAdapter::new()), true));
    }
    let adapter =
        TelegramAdapter::new(config.telegram.clone()).context("Failed to create Telegram adapter")?;
    Ok((Arc::new(adapter), false))
}
