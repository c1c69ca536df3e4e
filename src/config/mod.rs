use serde::Deserialize;
use std::env;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub reservation: ReservationConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Настройки движка бронирования
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationConfig {
    // TTL брони (окно на оплату), по умолчанию 15 минут
    pub hold_ttl_seconds: i64,
    // период фонового свипера
    pub sweep_interval_seconds: u64,
    // сколько просроченных броней снимать за один проход
    pub sweep_batch_size: i64,
    // через сколько часов удалять терминальные ряды (GC)
    pub purge_after_hours: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "reservation_system=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            },
            reservation: ReservationConfig {
                hold_ttl_seconds: env::var("HOLD_TTL_SECONDS")
                    .unwrap_or_else(|_| "900".to_string())
                    .parse()
                    .expect("HOLD_TTL_SECONDS must be a valid number"),
                sweep_interval_seconds: env::var("SWEEP_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("SWEEP_INTERVAL_SECONDS must be a valid number"),
                sweep_batch_size: env::var("SWEEP_BATCH_SIZE")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .expect("SWEEP_BATCH_SIZE must be a valid number"),
                purge_after_hours: env::var("PURGE_AFTER_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .expect("PURGE_AFTER_HOURS must be a valid number"),
            },
        }
    }
}
