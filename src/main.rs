use anyhow::Result;
use std::io::ErrorKind;
use storage_api::{config, db, routes, services::storage_service::ObjectStore, state};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    let default_level = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!("Starting {} with config: {:?}", cfg.app_name, cfg);

    // --- Initialize SQLite pool ---
    let db = db::connect_lazy(&cfg.database_url)?;

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db, db::INIT_MIGRATION).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    match db::check_connection(&db).await {
        Ok(()) => tracing::info!("Database connection successful"),
        Err(e) => tracing::error!("Database connection failed: {}", e),
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(signal_shutdown(shutdown.clone()));

    // --- Initialize object storage; failure leaves the API running degraded ---
    let storage = ObjectStore::new(&cfg.storage);
    match ObjectStore::cancellable(&shutdown, storage.ensure_bucket()).await {
        Ok(()) => tracing::info!(bucket = %storage.bucket(), "S3 storage initialized"),
        Err(e) => tracing::error!("S3 storage initialization failed: {}", e),
    }

    // --- Build router ---
    let app = routes::routes::routes(&cfg.allowed_origins).with_state(state::AppState {
        db: db.clone(),
        storage,
    });

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(
        "{} v{} listening on http://{}",
        cfg.app_name,
        cfg.app_version,
        listener.local_addr()?
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    // --- Shutdown ---
    db.close().await;
    tracing::info!("Database connections closed");

    Ok(())
}

/// Cancel `shutdown` on Ctrl-C (and SIGTERM on Unix).
async fn signal_shutdown(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
