use redis::AsyncCommands;
use tracing::info;

use crate::models::SellableUnit;
use crate::redis_client::RedisClient;
use crate::reservation::{ReservationEngine, ReservationError};

const UNITS_KEY: &str = "units";
const UNITS_TTL_SECONDS: u64 = 3600;

/// Cache-aside для каталога позиций. Кеширует только справочные данные
/// для GET-запросов; остаток и брони движок всегда считает сам, внутри
/// своих атомарных операций — их кешировать нельзя.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    engine: ReservationEngine,
}

impl CacheService {
    pub fn new(redis: RedisClient, engine: ReservationEngine) -> Self {
        Self { redis, engine }
    }

    // Прогрев кеша при старте
    pub async fn warmup_cache(&self) {
        info!("Starting cache warmup...");

        if let Ok(units) = self.engine.list_units().await {
            info!("Loaded {} units", units.len());
            let _ = self.save_units_to_cache(&units).await;
        }

        info!("Cache warmup done");
    }

    // Каталог позиций: сначала кеш, при любом сбое Redis - напрямую в БД
    pub async fn get_units(&self) -> Result<Vec<SellableUnit>, ReservationError> {
        if let Ok(units) = self.get_units_from_cache().await {
            return Ok(units);
        }

        let units = self.engine.list_units().await?;
        let _ = self.save_units_to_cache(&units).await;
        Ok(units)
    }

    // Инвалидация после создания/изменения позиции
    pub async fn invalidate_units(&self) {
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del(UNITS_KEY).await;
        info!("Invalidated units cache");
    }

    // === Работа с кешем ===

    async fn get_units_from_cache(&self) -> Result<Vec<SellableUnit>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: String = conn.get(UNITS_KEY).await?;
        let units: Vec<SellableUnit> = serde_json::from_str(&data).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
        })?;
        Ok(units)
    }

    async fn save_units_to_cache(&self, units: &[SellableUnit]) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(units).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(UNITS_KEY, data, UNITS_TTL_SECONDS).await
    }
}
