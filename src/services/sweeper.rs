//! sweeper.rs
//!
//! Фоновый свипер просроченных броней. Страховочный механизм, а не
//! основной: инвариант ёмкости держится на ленивой проверке TTL внутри
//! reserve, так что корректность от своевременности свипера не зависит.
//! Свипер лишь приводит физическое состояние хранилища к логическому,
//! ограничивает устаревание данных для отчётности и подчищает старые
//! терминальные ряды.

use chrono::Duration;
use tracing::{error, info, warn};

use crate::config::ReservationConfig;
use crate::reservation::ReservationEngine;

pub struct SweeperService {
    engine: ReservationEngine,
    batch_size: i64,
    retention: Duration,
}

impl SweeperService {
    pub fn new(engine: ReservationEngine, config: &ReservationConfig) -> Self {
        Self {
            engine,
            batch_size: config.sweep_batch_size,
            retention: Duration::hours(config.purge_after_hours),
        }
    }

    /// Один проход: снять пачку просроченных броней и вычистить старые
    /// терминальные ряды. Остаток, не влезший в пачку, заберёт следующий
    /// проход.
    pub async fn run_sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        let expired = match self.engine.expired_holds(self.batch_size).await {
            Ok(ids) => ids,
            Err(e) => {
                error!("sweep: failed to list expired holds: {e}");
                return stats;
            }
        };

        for hold_id in expired {
            match self.engine.expire(hold_id).await {
                Ok(_) => stats.expired += 1,
                // идемпотентно: параллельная отмена клиентом — не сбой
                Err(e) => {
                    warn!(%hold_id, "sweep: failed to expire hold: {e}");
                    stats.failed += 1;
                }
            }
        }

        match self.engine.purge_terminal(self.retention).await {
            Ok(purged) => stats.purged = purged,
            Err(e) => error!("sweep: failed to purge terminal holds: {e}"),
        }

        if stats.expired > 0 || stats.purged > 0 {
            info!(
                "🧹 Sweep done: {} holds expired, {} old rows purged",
                stats.expired, stats.purged
            );
        }

        stats
    }
}

#[derive(Debug, Default)]
pub struct SweepStats {
    pub expired: u64,
    pub failed: u64,
    pub purged: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReservationConfig;
    use crate::models::HoldState;
    use crate::reservation::{MemoryStore, ReservationEngine};
    use std::sync::Arc;

    fn sweeper_fixture(ttl_seconds: i64) -> (ReservationEngine, SweeperService) {
        let engine = ReservationEngine::new(Arc::new(MemoryStore::new()), ttl_seconds);
        let config = ReservationConfig {
            hold_ttl_seconds: ttl_seconds,
            sweep_interval_seconds: 30,
            sweep_batch_size: 100,
            purge_after_hours: 24,
        };
        let sweeper = SweeperService::new(engine.clone(), &config);
        (engine, sweeper)
    }

    #[tokio::test]
    async fn sweep_marks_lapsed_holds_expired() {
        let (engine, sweeper) = sweeper_fixture(0);
        let unit = engine.create_unit("slot", 10).await.unwrap();
        let a = engine.reserve(unit.id, 2, "s1", None).await.unwrap();
        let b = engine.reserve(unit.id, 3, "s2", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let stats = sweeper.run_sweep().await;
        assert_eq!(stats.expired, 2);
        assert_eq!(stats.failed, 0);

        for res in [a, b] {
            let hold = engine.get_hold(res.reservation_id.unwrap()).await.unwrap();
            assert_eq!(hold.state, HoldState::Expired);
        }
    }

    #[tokio::test]
    async fn sweep_leaves_live_and_confirmed_holds_alone() {
        let (engine, sweeper) = sweeper_fixture(900);
        let unit = engine.create_unit("slot", 10).await.unwrap();
        let live = engine.reserve(unit.id, 2, "s1", None).await.unwrap();
        let confirmed = engine.reserve(unit.id, 3, "s2", None).await.unwrap();
        engine
            .confirm(confirmed.reservation_id.unwrap(), "order-1")
            .await
            .unwrap();

        let stats = sweeper.run_sweep().await;
        assert_eq!(stats.expired, 0);

        let hold = engine.get_hold(live.reservation_id.unwrap()).await.unwrap();
        assert_eq!(hold.state, HoldState::Active);
        let hold = engine
            .get_hold(confirmed.reservation_id.unwrap())
            .await
            .unwrap();
        assert_eq!(hold.state, HoldState::Confirmed);
    }

    #[tokio::test]
    async fn sweep_purges_old_terminal_rows() {
        let (engine, _) = sweeper_fixture(0);
        // retention = 0: терминальные ряды выметаются сразу
        let config = ReservationConfig {
            hold_ttl_seconds: 0,
            sweep_interval_seconds: 30,
            sweep_batch_size: 100,
            purge_after_hours: 0,
        };
        let sweeper = SweeperService::new(engine.clone(), &config);

        let unit = engine.create_unit("slot", 10).await.unwrap();
        let res = engine.reserve(unit.id, 2, "s1", None).await.unwrap();
        let hold_id = res.reservation_id.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let stats = sweeper.run_sweep().await;
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.purged, 1);
        assert!(matches!(
            engine.get_hold(hold_id).await,
            Err(crate::reservation::ReservationError::HoldNotFound)
        ));
    }
}
