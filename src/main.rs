mod catalog;
mod config;
mod error;
mod idempotency;
mod metrics;
mod models;
mod orders;
mod routes;
mod security;
mod state;
mod store;
mod uploads;
mod users;

use config::AppConfig;
use state::AppState;
use std::net::SocketAddr;
use store::Database;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "storefront.api", "server crashed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let dotenv = dotenvy::dotenv();
    init_tracing();
    if let Ok(path) = dotenv {
        info!(target = "storefront.config", path = %path.display(), "loaded .env");
    }

    let config = AppConfig::from_env();
    let db = Database::connect(config.mongodb_uri.as_deref(), &config.mongodb_db).await?;
    info!(target = "storefront.store", backend = db.backend_name(), "database ready");

    uploads::ensure_dirs(&[config.upload_dir.clone(), config.product_upload_dir()]).await?;
    users::seed_admin(&db, &config).await?;

    let prometheus_handle = metrics::install_recorder();
    let port = config.port;
    let state = AppState::new(config, db, prometheus_handle);
    let app = routes::build_router(state);

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "storefront.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!(target = "storefront.api", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target = "storefront.api", error = %err, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
