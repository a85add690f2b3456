use order_payments_engine::api::{self, AppState};
use order_payments_engine::config::AppConfig;
use order_payments_engine::database::{self, Stores};
use order_payments_engine::logging::init_tracing;
use order_payments_engine::workers::pending_order_expiry::{
    PendingOrderExpiryConfig, PendingOrderExpiryWorker,
};
use std::net::SocketAddr;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
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
                error!(error = %e, "failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        gateways = ?config.gateways.enabled,
        "🚀 Starting order payments engine"
    );

    let stores = if config.server.skip_externals {
        info!("⏭️  Using in-memory stores (SKIP_EXTERNALS=true)");
        Stores::memory()
    } else {
        info!("📊 Initializing database connection pool...");
        let pool = database::init_pool_from_config(&config.database)
            .await
            .map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
        database::run_migrations(&pool).await.map_err(|e| {
            error!("Failed to run migrations: {}", e);
            e
        })?;
        info!(
            max_connections = pool.options().get_max_connections(),
            "✅ Database connection pool initialized"
        );
        Stores::postgres(pool)
    };

    let state = AppState::from_config(&config, stores)?;

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let expiry_worker = PendingOrderExpiryWorker::new(
        state.orders.clone(),
        PendingOrderExpiryConfig::from(&config.expiry),
    );
    let expiry_handle = tokio::spawn(expiry_worker.run(worker_shutdown_rx));

    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if tokio::time::timeout(std::time::Duration::from_secs(5), expiry_handle)
        .await
        .is_err()
    {
        warn!("Timed out waiting for expiry worker shutdown");
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
