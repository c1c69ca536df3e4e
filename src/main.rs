use anyhow::Context;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reservation_system::{config::Config, controllers, services::sweeper::SweeperService, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Reservation API");

    // Connect to the database, Redis and build the engine
    let app_state = AppState::new(config.clone())
        .await
        .context("Failed to initialize application state")?;
    info!("Database connected, migrations applied");

    app_state
        .redis
        .ping()
        .await
        .context("Failed to reach Redis")?;
    info!("Redis connected");

    // Warm up the units cache
    app_state.cache.warmup_cache().await;

    // --- Start background tasks ---

    // Expiry sweeper: releases lapsed holds and purges old terminal rows
    let sweeper = SweeperService::new(app_state.engine.clone(), &config.reservation);
    let interval = Duration::from_secs(config.reservation.sweep_interval_seconds);
    task::spawn(async move {
        loop {
            sweeper.run_sweep().await;
            tokio::time::sleep(interval).await;
        }
    });

    // --- Start the web server ---

    let app = Router::new()
        .route("/", get(|| async { "Reservation API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        // Mount the routes from the controllers module
        .nest("/api", controllers::routes())
        // Pass the application state to the router
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http())
        // дашборд и страницы продаж ходят с других origin'ов
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind listener")?;
    axum::serve(listener, app.into_make_service())
        .await
        .context("Server error")?;

    Ok(())
}
