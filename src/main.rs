use duckdb::Connection;
use std::sync::Arc;
use usage_stats::config::Config;
use usage_stats::server::{build_router, AppState};
use usage_stats::storage;

#[tokio::main]
async fn main() {
    init_tracing();

    // Load configuration
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref().map(std::path::Path::new));

    tracing::info!(
        host = %config.host,
        port = config.port,
        route = %config.route_prefix(),
        database = ?config.database_path,
        countries_enabled = config.statistics_schema.is_some(),
        "Starting usage statistics service"
    );

    // Initialize DuckDB
    let conn = match &config.database_path {
        Some(path) => Connection::open(path).expect("Failed to open DuckDB database file"),
        None => {
            tracing::warn!("No database_path configured, using an empty in-memory database");
            Connection::open_in_memory().expect("Failed to open DuckDB")
        }
    };
    storage::migrations::run_migrations(&conn, config.statistics_schema.as_deref())
        .expect("Failed to run migrations");

    let state = Arc::new(AppState::new(conn, &config));
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(addr = %addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.shutdown_timeout_secs))
        .await
        .expect("Server error");

    tracing::info!("Server stopped");
}

/// `USAGE_STATS_LOG_FORMAT=json` switches to structured JSON output.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "usage_stats=info,tower_http=info".into());
    let json = std::env::var("USAGE_STATS_LOG_FORMAT").is_ok_and(|v| v == "json");

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on Ctrl-C or SIGTERM, then arms a hard deadline for in-flight requests.
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!(timeout_secs, "Shutdown signal received, draining connections");
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timed out, exiting");
        std::process::exit(1);
    });
}
