//! Movie Recommendation Batch Engine
//!
//! Generates versioned recommendation batches for the movie catalog and serves
//! the latest batch per user.
//!
//! # Architecture
//!
//! - **Orchestrator**: runs one of four strategies and commits the batch atomically
//! - **Scheduler**: optional periodic batch generation
//! - **API Server**: admin trigger, batch history, per-user reads
//!
//! # Graceful Shutdown
//!
//! The engine handles SIGTERM and SIGINT signals, ensuring:
//! - In-flight requests complete
//! - Batch runs already started finish and record their outcome
//! - The scheduler stops between runs
//! - Database connections are closed cleanly

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use movie_recs::api::{self, AppState};
use movie_recs::database::{self, Database};
use movie_recs::recommendation::scheduler::spawn_batch_scheduler;
use movie_recs::{BatchOrchestrator, Config, PgStore, RecommendationStore, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with structured logging
    init_tracing();

    info!("═══════════════════════════════════════════════════════════════");
    info!("  🚀 Movie Recommendation Engine v{}", env!("CARGO_PKG_VERSION"));
    info!("═══════════════════════════════════════════════════════════════");
    info!("  Components:");
    info!("    • Batch Orchestrator (popularity, content, collaborative, hybrid)");
    info!("    • Batch Scheduler");
    info!("    • REST API Server");
    info!("═══════════════════════════════════════════════════════════════");

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    info!("✅ Configuration loaded and validated");

    #[cfg(feature = "metrics")]
    install_metrics_exporter(config.api.metrics_port)?;

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Initialize database connection pool
    let db = Database::new(&config.database).await?;
    db.health_check().await?;
    info!("✅ Database connection pool established");

    // Run migrations
    info!("📦 Running database migrations...");
    database::run_migrations(db.pool()).await?;
    info!("✅ Database migrations applied");

    let store: Arc<dyn RecommendationStore> = Arc::new(PgStore::new(db.pool().clone()));
    let orchestrator = Arc::new(BatchOrchestrator::new(
        Arc::clone(&store),
        config.recommendation.clone(),
    )?);

    let state = Arc::new(AppState::new(
        store,
        Arc::clone(&orchestrator),
        config.api.admin_token.clone(),
    ));

    // Spawn all services
    let mut handles = Vec::new();

    if let Some(every) = config.recommendation.schedule_interval {
        info!(
            "📊 Starting batch scheduler ({} every {:?})...",
            config.recommendation.scheduled_algorithm, every
        );
        handles.push(spawn_batch_scheduler(
            Arc::clone(&orchestrator),
            config.recommendation.scheduled_algorithm,
            every,
            shutdown_tx.subscribe(),
        ));
    }

    // Spawn API server
    info!("🌐 Starting API server on port {}...", config.api.port);
    handles.push(spawn_api_server(state, &config, shutdown_tx.subscribe()));

    info!("═══════════════════════════════════════════════════════════════");
    info!("  ✅ All services started successfully");
    info!("  📡 API: http://{}:{}", config.api.host, config.api.port);
    info!(
        "  🔗 Health: http://{}:{}/health",
        config.api.host, config.api.port
    );
    info!("═══════════════════════════════════════════════════════════════");

    // Wait for shutdown signal or service failure
    tokio::select! {
        _ = shutdown_signal() => {
            info!("📴 Shutdown signal received");
        }
        _ = wait_for_any_failure(&mut handles) => {
            warn!("⚠️ A service failed, initiating shutdown");
        }
    }

    // Graceful shutdown
    info!("🛑 Initiating graceful shutdown...");

    // Signal all services to stop
    let _ = shutdown_tx.send(());

    // Wait for services and detached batch runs to finish with timeout
    let shutdown_timeout = Duration::from_secs(30);
    let drained = async {
        shutdown_services(handles).await;
        if orchestrator.is_busy() {
            info!("⏳ Waiting for in-flight batch runs...");
        }
        orchestrator.wait_idle().await;
    };
    if tokio::time::timeout(shutdown_timeout, drained).await.is_err() {
        warn!("⚠️ Shutdown timeout exceeded, forcing exit");
    }

    db.close().await;

    info!("👋 Recommendation engine stopped gracefully");
    Ok(())
}

/// Initialize structured logging with tracing; `LOG_FORMAT=json` switches to JSON lines
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default log levels
        EnvFilter::new("movie_recs=debug,movie_recs_engine=debug,tower_http=debug,sqlx=warn,info")
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_target(true)))
        .with((!json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(std::env::var("NO_COLOR").is_err())
        }))
        .init();
}

#[cfg(feature = "metrics")]
fn install_metrics_exporter(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .map_err(movie_recs::Error::internal)?;
    info!("📈 Prometheus exporter listening on port {}", port);
    Ok(())
}

/// Spawn the API server
fn spawn_api_server(
    state: Arc<AppState>,
    config: &Config,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let api_config = config.api.clone();

    let shutdown = async move {
        let _ = shutdown_rx.recv().await;
        info!("API server shutting down, draining in-flight requests");
    };

    tokio::spawn(async move {
        if let Err(e) = api::start_server(state, api_config, shutdown).await {
            error!("API server error: {:?}", e);
        }
    })
}

/// Wait for any task to fail
async fn wait_for_any_failure(handles: &mut [tokio::task::JoinHandle<()>]) {
    loop {
        for handle in handles.iter_mut() {
            if handle.is_finished() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Wait for all services to complete shutdown
async fn shutdown_services(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
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
}
