use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use gathering_server::clock::SystemClock;
use gathering_server::config::Config;
use gathering_server::routes::create_routes;
use gathering_server::services::StatusSweeper;
use gathering_server::state::AppState;
use gathering_server::store::PgStore;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let store = Arc::new(PgStore::new(pool));
    let state = AppState::new(store, Arc::new(SystemClock));

    let sweeper = StatusSweeper::new(state.reconciler.clone())
        .with_interval(config.sweep_interval)
        .start();
    tracing::info!(interval_secs = config.sweep_interval.as_secs(), "Status sweeper started");

    let app: Router = create_routes(state, &config.frontend_urls);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind address");
    tracing::info!("Server running at http://{}", config.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    served.expect("Server failed");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
