pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod models;
pub mod redis_client;
pub mod reservation;
pub mod services;
pub mod session;

use std::sync::Arc;

use reservation::{PostgresStore, ReservationEngine};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub engine: ReservationEngine,
    pub config: config::Config,
}

impl AppState {
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::new(&config.database.url, config.database.pool_size).await?;

        db.run_migrations().await?;

        let redis = redis_client::RedisClient::new(&config.redis.url).await?;

        let engine = ReservationEngine::new(
            Arc::new(PostgresStore::new(db.pool.clone())),
            config.reservation.hold_ttl_seconds,
        );
        engine.warn_if_short_ttl();

        let cache = cache::CacheService::new(redis.clone(), engine.clone());

        Ok(Arc::new(Self {
            db,
            redis,
            cache,
            engine,
            config,
        }))
    }
}
