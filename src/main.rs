//! upcheck - uptime monitoring engine

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upcheck::routes;
use upcheck::state::AppState;
use upcheck::{Config, Database};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upcheck=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let db = Database::new(&config.database_url, config.max_db_connections)
        .await
        .context("Failed to open database")?;

    let state = AppState::new(db, &config).context("Failed to initialise check engine")?;

    // Scheduler - one check loop per service, reconciled with the registry
    tokio::spawn(state.scheduler.clone().run());

    let app = routes::router(state.clone());

    info!("upcheck v{} starting on {}", env!("CARGO_PKG_VERSION"), config.listen_addr);
    info!("Database: {}", config.database_url);
    info!(
        window_hours = config.online_window.as_secs() / 3600,
        hits_limit = config.hits_limit,
        "Statistics configured"
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    state.scheduler.shutdown();
    info!("upcheck stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
