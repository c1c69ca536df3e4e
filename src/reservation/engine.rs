use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::models::{Hold, SellableUnit};

use super::error::ReservationError;
use super::store::{InsertOutcome, NewHold, ReleaseReason, ReservationStore};

/// Результат reserve — контракт внешнего API. Нехватка остатка приходит
/// сюда с success=false, а не ошибкой: для UI это штатный исход.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationResult {
    pub success: bool,
    pub reservation_id: Option<Uuid>,
    pub available_quantity: i64,
    pub error_message: Option<String>,
}

/// Транзакционное ядро: четыре операции над бронями плюс учёт позиций.
/// Ledger и holds мутируются только отсюда; каждая операция — одна
/// атомарная единица работы в хранилище.
#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn ReservationStore>,
    hold_ttl: Duration,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn ReservationStore>, hold_ttl_seconds: i64) -> Self {
        Self {
            store,
            hold_ttl: Duration::seconds(hold_ttl_seconds),
        }
    }

    pub fn hold_ttl(&self) -> Duration {
        self.hold_ttl
    }

    // === Учёт позиций ===

    pub async fn create_unit(
        &self,
        name: &str,
        total_capacity: i64,
    ) -> Result<SellableUnit, ReservationError> {
        if total_capacity < 0 {
            return Err(ReservationError::InvalidQuantity(total_capacity));
        }
        let unit = self.store.create_unit(name, total_capacity).await?;
        debug!(unit_id = unit.id, total_capacity, "unit created");
        Ok(unit)
    }

    pub async fn get_unit(&self, unit_id: i64) -> Result<SellableUnit, ReservationError> {
        self.store.get_unit(unit_id).await
    }

    pub async fn list_units(&self) -> Result<Vec<SellableUnit>, ReservationError> {
        self.store.list_units().await
    }

    /// Свободный остаток на текущий момент. Только для чтения: reserve
    /// пересчитывает остаток сам, внутри своей атомарной операции.
    pub async fn availability(&self, unit_id: i64) -> Result<i64, ReservationError> {
        self.store.availability(unit_id, Utc::now()).await
    }

    // === Операции над бронями ===

    pub async fn reserve(
        &self,
        unit_id: i64,
        quantity: i64,
        session_id: &str,
        customer_email: Option<&str>,
    ) -> Result<ReservationResult, ReservationError> {
        if quantity <= 0 {
            return Err(ReservationError::InvalidQuantity(quantity));
        }

        let now = Utc::now();
        let req = NewHold {
            unit_id,
            session_id,
            quantity,
            customer_email,
        };

        match self.store.insert_hold(req, now, now + self.hold_ttl).await? {
            InsertOutcome::Created { hold, remaining } => {
                debug!(
                    hold_id = %hold.id,
                    unit_id,
                    quantity,
                    session_id,
                    remaining,
                    "hold created"
                );
                Ok(ReservationResult {
                    success: true,
                    reservation_id: Some(hold.id),
                    available_quantity: remaining,
                    error_message: None,
                })
            }
            InsertOutcome::Insufficient { available } => {
                debug!(unit_id, quantity, available, "reserve rejected: insufficient");
                Ok(ReservationResult {
                    success: false,
                    reservation_id: None,
                    available_quantity: available,
                    error_message: Some("insufficient availability".to_string()),
                })
            }
        }
    }

    /// Подтверждение после успешной оплаты у внешнего шлюза. Сам движок
    /// никакого I/O к шлюзу не делает и не должен.
    pub async fn confirm(
        &self,
        hold_id: Uuid,
        order_id: &str,
    ) -> Result<bool, ReservationError> {
        match self.store.confirm_hold(hold_id, order_id, Utc::now()).await {
            Ok(newly) => {
                if newly {
                    debug!(%hold_id, order_id, "hold confirmed");
                } else {
                    debug!(%hold_id, order_id, "repeat confirm, already committed");
                }
                Ok(true)
            }
            Err(e @ ReservationError::CapacityExceeded { .. }) => {
                // сюда попадать нельзя: значит reserve пропустил лишнее.
                // Не глотаем — оплаченный заказ уходит на ручную сверку.
                error!(%hold_id, order_id, error = %e, "INVARIANT VIOLATION on confirm");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Явный отказ покупателя. Идемпотентна: повторная отмена и гонка со
    /// свипером возвращают успех, а не ошибку.
    pub async fn cancel(&self, hold_id: Uuid) -> Result<bool, ReservationError> {
        let transitioned = self
            .store
            .release_hold(hold_id, ReleaseReason::Cancel, Utc::now())
            .await?;
        if transitioned {
            debug!(%hold_id, "hold cancelled");
        }
        Ok(true)
    }

    /// Снятие по таймауту — вызывается только свипером. Отдельное
    /// терминальное состояние нужно аудиту: покупатель ушёл сам или
    /// просто не успел.
    pub async fn expire(&self, hold_id: Uuid) -> Result<bool, ReservationError> {
        let transitioned = self
            .store
            .release_hold(hold_id, ReleaseReason::Expire, Utc::now())
            .await?;
        if transitioned {
            debug!(%hold_id, "hold expired");
        }
        Ok(true)
    }

    /// Массовая отмена всех активных броней сессии (уход со страницы).
    pub async fn cancel_by_session(&self, session_id: &str) -> Result<u64, ReservationError> {
        let released = self.store.release_session(session_id, Utc::now()).await?;
        if released > 0 {
            debug!(session_id, released, "session holds released");
        }
        Ok(released)
    }

    // === Вход свипера ===

    pub async fn expired_holds(&self, limit: i64) -> Result<Vec<Uuid>, ReservationError> {
        self.store.expired_hold_ids(Utc::now(), limit).await
    }

    pub async fn purge_terminal(&self, retention: Duration) -> Result<u64, ReservationError> {
        let cutoff = Utc::now() - retention;
        self.store.purge_terminal_before(cutoff).await
    }

    pub async fn get_hold(&self, hold_id: Uuid) -> Result<Hold, ReservationError> {
        self.store.get_hold(hold_id).await
    }

    /// now + TTL — крайний срок для брони, созданной прямо сейчас.
    pub fn deadline_from_now(&self) -> DateTime<Utc> {
        Utc::now() + self.hold_ttl
    }

    // предупреждение при запуске с подозрительно коротким TTL
    pub fn warn_if_short_ttl(&self) {
        if self.hold_ttl < Duration::seconds(60) {
            warn!(
                ttl_seconds = self.hold_ttl.num_seconds(),
                "hold TTL is under a minute"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::MemoryStore;
    use super::*;
    use crate::models::HoldState;

    fn engine_with_ttl(ttl_seconds: i64) -> ReservationEngine {
        ReservationEngine::new(Arc::new(MemoryStore::new()), ttl_seconds)
    }

    async fn engine_with_unit(capacity: i64) -> (ReservationEngine, i64) {
        let engine = engine_with_ttl(900);
        let unit = engine.create_unit("GA ticket", capacity).await.unwrap();
        (engine, unit.id)
    }

    #[tokio::test]
    async fn reserve_decrements_availability() {
        let (engine, unit_id) = engine_with_unit(10).await;

        let res = engine.reserve(unit_id, 3, "s1", None).await.unwrap();
        assert!(res.success);
        assert_eq!(res.available_quantity, 7);
        assert_eq!(engine.availability(unit_id).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn reserve_shortfall_reports_available_and_writes_nothing() {
        let (engine, unit_id) = engine_with_unit(5).await;
        engine.reserve(unit_id, 4, "s1", None).await.unwrap();

        let res = engine.reserve(unit_id, 2, "s2", None).await.unwrap();
        assert!(!res.success);
        assert!(res.reservation_id.is_none());
        assert_eq!(res.available_quantity, 1);
        assert_eq!(
            res.error_message.as_deref(),
            Some("insufficient availability")
        );
        // отказ ничего не записал
        assert_eq!(engine.availability(unit_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reserve_rejects_non_positive_quantity() {
        let (engine, unit_id) = engine_with_unit(5).await;
        for qty in [0, -3] {
            let err = engine.reserve(unit_id, qty, "s1", None).await.unwrap_err();
            assert!(matches!(err, ReservationError::InvalidQuantity(_)));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ten_concurrent_reserves_fill_capacity_exactly() {
        let (engine, unit_id) = engine_with_unit(10).await;

        let mut handles = Vec::new();
        for i in 0..10 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .reserve(unit_id, 1, &format!("session-{i}"), None)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().success);
        }

        assert_eq!(engine.availability(unit_id).await.unwrap(), 0);

        let eleventh = engine.reserve(unit_id, 1, "session-11", None).await.unwrap();
        assert!(!eleventh.success);
        assert_eq!(eleventh.available_quantity, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_oversubscription_never_exceeds_capacity() {
        let (engine, unit_id) = engine_with_unit(7).await;

        // 20 покупателей на 7 мест, кратности разные
        let mut handles = Vec::new();
        for i in 0..20 {
            let engine = engine.clone();
            let qty = 1 + (i % 3) as i64;
            handles.push(tokio::spawn(async move {
                let res = engine
                    .reserve(unit_id, qty, &format!("s-{i}"), None)
                    .await
                    .unwrap();
                if res.success { qty } else { 0 }
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            accepted += handle.await.unwrap();
        }
        assert!(accepted <= 7, "oversold: accepted {accepted} of 7");
        assert_eq!(engine.availability(unit_id).await.unwrap(), 7 - accepted);
    }

    #[tokio::test]
    async fn confirm_commits_and_is_idempotent() {
        let (engine, unit_id) = engine_with_unit(10).await;
        let res = engine.reserve(unit_id, 4, "s1", None).await.unwrap();
        let hold_id = res.reservation_id.unwrap();

        assert!(engine.confirm(hold_id, "order-1").await.unwrap());
        let unit = engine.get_unit(unit_id).await.unwrap();
        assert_eq!(unit.committed, 4);

        // повторный confirm того же заказа не задваивает committed
        assert!(engine.confirm(hold_id, "order-1").await.unwrap());
        let unit = engine.get_unit(unit_id).await.unwrap();
        assert_eq!(unit.committed, 4);
        assert_eq!(engine.availability(unit_id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn confirm_with_different_order_id_is_rejected() {
        let (engine, unit_id) = engine_with_unit(10).await;
        let res = engine.reserve(unit_id, 2, "s1", None).await.unwrap();
        let hold_id = res.reservation_id.unwrap();

        engine.confirm(hold_id, "order-1").await.unwrap();
        let err = engine.confirm(hold_id, "order-2").await.unwrap_err();
        assert!(matches!(err, ReservationError::HoldExpired { .. }));
    }

    #[tokio::test]
    async fn confirm_unknown_hold_is_not_found() {
        let (engine, _) = engine_with_unit(10).await;
        let err = engine.confirm(Uuid::new_v4(), "order-1").await.unwrap_err();
        assert!(matches!(err, ReservationError::HoldNotFound));
    }

    #[tokio::test]
    async fn cancel_frees_capacity_and_is_idempotent() {
        let (engine, unit_id) = engine_with_unit(10).await;
        let res = engine.reserve(unit_id, 6, "s1", None).await.unwrap();
        let hold_id = res.reservation_id.unwrap();
        assert_eq!(engine.availability(unit_id).await.unwrap(), 4);

        assert!(engine.cancel(hold_id).await.unwrap());
        assert_eq!(engine.availability(unit_id).await.unwrap(), 10);

        // гонка: повторная отмена и отмена после expire — успех, не ошибка
        assert!(engine.cancel(hold_id).await.unwrap());
        assert!(engine.expire(hold_id).await.unwrap());

        let hold = engine.get_hold(hold_id).await.unwrap();
        assert_eq!(hold.state, HoldState::Cancelled);
        assert_eq!(engine.get_unit(unit_id).await.unwrap().committed, 0);
    }

    #[tokio::test]
    async fn confirm_after_cancel_is_rejected() {
        let (engine, unit_id) = engine_with_unit(10).await;
        let res = engine.reserve(unit_id, 2, "s1", None).await.unwrap();
        let hold_id = res.reservation_id.unwrap();

        engine.cancel(hold_id).await.unwrap();
        let err = engine.confirm(hold_id, "order-1").await.unwrap_err();
        assert!(matches!(
            err,
            ReservationError::HoldExpired {
                state: HoldState::Cancelled
            }
        ));
    }

    #[tokio::test]
    async fn lazy_expiry_frees_capacity_before_sweep() {
        // TTL = 0: бронь мертва сразу после создания, свипер ещё не ходил
        let engine = engine_with_ttl(0);
        let unit = engine.create_unit("slot", 5).await.unwrap();

        let first = engine.reserve(unit.id, 5, "s1", None).await.unwrap();
        assert!(first.success);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // вся ёмкость снова видна без участия свипера
        let second = engine.reserve(unit.id, 5, "s2", None).await.unwrap();
        assert!(second.success, "lapsed hold must not block capacity");
    }

    #[tokio::test]
    async fn confirm_after_ttl_lapse_is_rejected_and_marks_expired() {
        let engine = engine_with_ttl(0);
        let unit = engine.create_unit("slot", 5).await.unwrap();
        let res = engine.reserve(unit.id, 3, "s1", None).await.unwrap();
        let hold_id = res.reservation_id.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let err = engine.confirm(hold_id, "order-1").await.unwrap_err();
        assert!(matches!(err, ReservationError::HoldExpired { .. }));

        let hold = engine.get_hold(hold_id).await.unwrap();
        assert_eq!(hold.state, HoldState::Expired);
        assert_eq!(engine.get_unit(unit.id).await.unwrap().committed, 0);
    }

    #[tokio::test]
    async fn cancel_by_session_releases_all_active_holds() {
        let (engine, unit_a) = engine_with_unit(10).await;
        let unit_b = engine.create_unit("slot B", 10).await.unwrap().id;

        engine.reserve(unit_a, 3, "s1", None).await.unwrap();
        engine.reserve(unit_b, 2, "s1", None).await.unwrap();
        engine.reserve(unit_a, 1, "s2", None).await.unwrap();

        let released = engine.cancel_by_session("s1").await.unwrap();
        assert_eq!(released, 2);
        assert_eq!(engine.availability(unit_a).await.unwrap(), 9); // +3, s2 держит 1
        assert_eq!(engine.availability(unit_b).await.unwrap(), 10); // +2

        // повторный вызов ничего не находит
        assert_eq!(engine.cancel_by_session("s1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_unit_is_reported() {
        let engine = engine_with_ttl(900);
        let err = engine.reserve(42, 1, "s1", None).await.unwrap_err();
        assert!(matches!(err, ReservationError::UnitNotFound(42)));
        let err = engine.availability(42).await.unwrap_err();
        assert!(matches!(err, ReservationError::UnitNotFound(42)));
    }

    mod capacity_property {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// Рандомизированные конкурентные reserve: суммарно принятое
            /// никогда не превышает ёмкость, какой бы ни была смесь заявок.
            #[test]
            fn accepted_quantity_never_exceeds_capacity(
                capacity in 1..40i64,
                requests in prop::collection::vec(1..8i64, 1..30),
            ) {
                let rt = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(4)
                    .enable_time()
                    .build()
                    .unwrap();

                rt.block_on(async move {
                    let engine = engine_with_ttl(900);
                    let unit = engine.create_unit("prop unit", capacity).await.unwrap();

                    let mut handles = Vec::new();
                    for (i, qty) in requests.into_iter().enumerate() {
                        let engine = engine.clone();
                        let unit_id = unit.id;
                        handles.push(tokio::spawn(async move {
                            let res = engine
                                .reserve(unit_id, qty, &format!("s-{i}"), None)
                                .await
                                .unwrap();
                            if res.success { qty } else { 0 }
                        }));
                    }

                    let mut accepted = 0;
                    for handle in handles {
                        accepted += handle.await.unwrap();
                    }

                    assert!(
                        accepted <= capacity,
                        "oversold: {accepted} accepted with capacity {capacity}"
                    );
                    assert_eq!(
                        engine.availability(unit.id).await.unwrap(),
                        capacity - accepted
                    );
                });
            }
        }
    }
}
