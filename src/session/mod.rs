//! Оркестрация одной checkout-попытки поверх движка: набор корзины,
//! общий дедлайн, подтверждение после оплаты и best-effort отмена при
//! уходе покупателя. Сам по себе ничего не хранит на сервере — session_id
//! лишь корреляционный ключ у броней.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::reservation::{ReservationEngine, ReservationResult};

/// Строка корзины: сколько единиц какой позиции хочет покупатель.
#[derive(Debug, Clone, Deserialize)]
pub struct CartLine {
    pub unit_id: i64,
    pub name: String,
    pub quantity: i64,
}

/// Успешно удержанная строка.
#[derive(Debug, Clone, Serialize)]
pub struct HeldLine {
    pub unit_id: i64,
    pub name: String,
    pub quantity: i64,
    pub reservation_id: Uuid,
}

/// Строка, на которую не хватило остатка (или позиция не найдена).
#[derive(Debug, Clone, Serialize)]
pub struct FailedLine {
    pub name: String,
    pub requested: i64,
    pub available: i64,
}

/// Итог бронирования корзины. Частичный успех — валидный исход:
/// удавшиеся строки остаются удержанными, откатывать их или нет —
/// решение вызывающего, не наше.
#[derive(Debug, Serialize)]
pub struct CartReservation {
    pub success: bool,
    pub held: Vec<HeldLine>,
    pub failed_items: Vec<FailedLine>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Оплата прошла, но часть броней не подтвердилась. Никогда не
    /// глотается: заказ уходит на ручную сверку.
    #[error("order {order_id}: {failed:?} paid but not confirmed")]
    ConfirmIncomplete {
        order_id: String,
        failed: Vec<String>,
    },
}

/// Построчное бронирование корзины под одним session_id. Ошибки движка по
/// отдельной строке не валят остальные — строка попадает в failed_items.
pub async fn reserve_lines(
    engine: &ReservationEngine,
    session_id: &str,
    lines: &[CartLine],
    customer_email: Option<&str>,
) -> CartReservation {
    let mut held = Vec::new();
    let mut failed = Vec::new();
    let mut expires_at = None;

    for line in lines {
        match engine
            .reserve(line.unit_id, line.quantity, session_id, customer_email)
            .await
        {
            Ok(ReservationResult {
                success: true,
                reservation_id: Some(reservation_id),
                ..
            }) => {
                // одно общее окно, передёргиваемое на каждый новый успех
                expires_at = Some(engine.deadline_from_now());
                held.push(HeldLine {
                    unit_id: line.unit_id,
                    name: line.name.clone(),
                    quantity: line.quantity,
                    reservation_id,
                });
            }
            Ok(res) => {
                failed.push(FailedLine {
                    name: line.name.clone(),
                    requested: line.quantity,
                    available: res.available_quantity,
                });
            }
            Err(e) => {
                warn!(unit_id = line.unit_id, error = %e, "cart line failed to reserve");
                failed.push(FailedLine {
                    name: line.name.clone(),
                    requested: line.quantity,
                    available: 0,
                });
            }
        }
    }

    CartReservation {
        success: failed.is_empty(),
        held,
        failed_items: failed,
        expires_at,
    }
}

/// Одна checkout-попытка. Генерирует session_id, копит удержанные строки
/// и ведёт общий дедлайн.
pub struct CheckoutSession {
    engine: ReservationEngine,
    session_id: String,
    held: Vec<HeldLine>,
    expires_at: Option<DateTime<Utc>>,
}

impl CheckoutSession {
    pub fn new(engine: ReservationEngine) -> Self {
        Self {
            engine,
            session_id: Uuid::new_v4().to_string(),
            held: Vec::new(),
            expires_at: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn held(&self) -> &[HeldLine] {
        &self.held
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Остаток таймера — чистая производная от expires_at, никакого
    /// самостоятельно тикающего состояния.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.expires_at {
            Some(deadline) if deadline > now => deadline - now,
            _ => Duration::zero(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some() && self.time_remaining(now) == Duration::zero()
    }

    /// Бронирует строки корзины. Частичный провал не откатывает то, что
    /// уже удержано — шорт-лист уходит в UI как есть.
    pub async fn reserve_cart(
        &mut self,
        lines: &[CartLine],
        customer_email: Option<&str>,
    ) -> CartReservation {
        let outcome = reserve_lines(&self.engine, &self.session_id, lines, customer_email).await;
        self.held.extend(outcome.held.iter().cloned());
        if outcome.expires_at.is_some() {
            self.expires_at = outcome.expires_at;
        }
        outcome
    }

    /// Подтверждает все удержанные брони после успешной оплаты.
    /// Локальное состояние чистится только если подтвердилось всё:
    /// частично подтверждённый оплаченный заказ — ЧП для сверки.
    pub async fn confirm_all(&mut self, order_id: &str) -> Result<usize, CheckoutError> {
        let mut failed = Vec::new();
        for line in &self.held {
            if let Err(e) = self.engine.confirm(line.reservation_id, order_id).await {
                error!(
                    reservation_id = %line.reservation_id,
                    order_id,
                    error = %e,
                    "PAID ORDER NOT FULLY CONFIRMED — manual reconciliation required"
                );
                failed.push(line.name.clone());
            }
        }

        if failed.is_empty() {
            let confirmed = self.held.len();
            self.held.clear();
            self.expires_at = None;
            debug!(order_id, confirmed, "checkout confirmed");
            Ok(confirmed)
        } else {
            Err(CheckoutError::ConfirmIncomplete {
                order_id: order_id.to_string(),
                failed,
            })
        }
    }

    /// Покупатель ушёл без покупки. Best-effort: если вызов не долетит,
    /// брони добьёт свипер по TTL.
    pub async fn abandon(self) {
        match self.engine.cancel_by_session(&self.session_id).await {
            Ok(released) => debug!(session_id = %self.session_id, released, "session abandoned"),
            Err(e) => warn!(session_id = %self.session_id, error = %e, "abandon failed, sweeper will catch up"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::{MemoryStore, ReservationEngine};
    use std::sync::Arc;

    async fn checkout_fixture() -> (ReservationEngine, Vec<CartLine>) {
        let engine = ReservationEngine::new(Arc::new(MemoryStore::new()), 900);
        let mut lines = Vec::new();
        for (name, capacity, want) in [
            ("Adult day pass", 50, 2),
            ("VIP lounge", 2, 3), // не хватит
            ("Parking", 20, 1),
        ] {
            let unit = engine.create_unit(name, capacity).await.unwrap();
            lines.push(CartLine {
                unit_id: unit.id,
                name: name.to_string(),
                quantity: want,
            });
        }
        (engine, lines)
    }

    #[tokio::test]
    async fn partial_failure_keeps_successful_lines_held() {
        let (engine, lines) = checkout_fixture().await;
        let mut session = CheckoutSession::new(engine.clone());

        let outcome = session.reserve_cart(&lines, None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.held.len(), 2);
        assert_eq!(outcome.failed_items.len(), 1);
        assert_eq!(outcome.failed_items[0].name, "VIP lounge");
        assert_eq!(outcome.failed_items[0].available, 2);

        // строки 1 и 3 остались активными
        for line in session.held() {
            let hold = engine.get_hold(line.reservation_id).await.unwrap();
            assert_eq!(hold.state, crate::models::HoldState::Active);
        }
    }

    #[tokio::test]
    async fn full_success_sets_shared_deadline() {
        let (engine, mut lines) = checkout_fixture().await;
        lines[1].quantity = 1; // теперь хватает
        let mut session = CheckoutSession::new(engine);

        let before = Utc::now();
        let outcome = session.reserve_cart(&lines, Some("buyer@example.com")).await;
        assert!(outcome.success);
        assert_eq!(session.held().len(), 3);

        let deadline = session.expires_at().unwrap();
        assert!(deadline > before + Duration::seconds(890));
        assert!(session.time_remaining(before) > Duration::seconds(890));
        assert!(!session.is_expired(before));
        assert!(session.is_expired(deadline + Duration::seconds(1)));
    }

    #[tokio::test]
    async fn confirm_all_commits_everything_and_clears_state() {
        let (engine, mut lines) = checkout_fixture().await;
        lines[1].quantity = 1;
        let mut session = CheckoutSession::new(engine.clone());
        session.reserve_cart(&lines, None).await;

        let confirmed = session.confirm_all("order-77").await.unwrap();
        assert_eq!(confirmed, 3);
        assert!(session.held().is_empty());
        assert!(session.expires_at().is_none());

        for line in &lines {
            let unit = engine.get_unit(line.unit_id).await.unwrap();
            assert_eq!(unit.committed, line.quantity);
        }
    }

    #[tokio::test]
    async fn confirm_all_surfaces_partial_confirm_failure() {
        let (engine, mut lines) = checkout_fixture().await;
        lines[1].quantity = 1;
        let mut session = CheckoutSession::new(engine.clone());
        session.reserve_cart(&lines, None).await;

        // другая рука отменила одну бронь до confirm — гонка со свипером
        let victim = session.held()[1].reservation_id;
        engine.cancel(victim).await.unwrap();

        let err = session.confirm_all("order-78").await.unwrap_err();
        let CheckoutError::ConfirmIncomplete { order_id, failed } = err;
        assert_eq!(order_id, "order-78");
        assert_eq!(failed, vec!["VIP lounge".to_string()]);
        // состояние не чистим: заказ должен уйти на сверку
        assert_eq!(session.held().len(), 3);
    }

    #[tokio::test]
    async fn abandon_releases_all_session_holds() {
        let (engine, mut lines) = checkout_fixture().await;
        lines[1].quantity = 1;
        let mut session = CheckoutSession::new(engine.clone());
        session.reserve_cart(&lines, None).await;
        let unit_id = lines[0].unit_id;
        assert_eq!(engine.availability(unit_id).await.unwrap(), 48);

        session.abandon().await;
        assert_eq!(engine.availability(unit_id).await.unwrap(), 50);
    }
}
