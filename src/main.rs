use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use teleopd::config::Config;
use teleopd::services::cache::CacheService;
use teleopd::services::storage::StorageService;
use teleopd::state::AppState;
use teleopd::{db, routes};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env();
    let port = config.port;

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");

    let cache = CacheService::new(config.redis_url.as_deref(), Duration::from_secs_f64(config.cache_ttl_secs)).await;
    let storage = StorageService::from_config(&config);

    let state = AppState::new(config, pool, cache, storage);
    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    info!(%port, "teleopd listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");
}

/// `LOG_LEVEL` feeds the filter, `LOG_FORMAT` picks json or console output.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
