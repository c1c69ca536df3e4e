use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Hold, SellableUnit};

use super::error::ReservationError;

/// Параметры новой брони. TTL уже рассчитан движком.
#[derive(Debug)]
pub struct NewHold<'a> {
    pub unit_id: i64,
    pub session_id: &'a str,
    pub quantity: i64,
    pub customer_email: Option<&'a str>,
}

/// Результат попытки вставить бронь. Нехватка остатка — не ошибка,
/// а штатный исход, поэтому она здесь, а не в ReservationError.
#[derive(Debug)]
pub enum InsertOutcome {
    Created { hold: Hold, remaining: i64 },
    Insufficient { available: i64 },
}

/// Причина освобождения активной брони.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Покупатель отказался сам.
    Cancel,
    /// TTL истёк, бронь снимает свипер.
    Expire,
}

/// Шов хранилища. Каждый метод — одна атомарная единица работы:
/// остаток всегда вычисляется внутри той же операции, что создаёт или
/// снимает бронь, и никогда не кешируется через её границу.
///
/// Реализации: Postgres (блокировка строки позиции) и in-memory (mutex).
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn create_unit(
        &self,
        name: &str,
        total_capacity: i64,
    ) -> Result<SellableUnit, ReservationError>;

    async fn get_unit(&self, unit_id: i64) -> Result<SellableUnit, ReservationError>;

    async fn list_units(&self) -> Result<Vec<SellableUnit>, ReservationError>;

    /// total_capacity - committed - SUM(quantity) живых броней.
    async fn availability(
        &self,
        unit_id: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, ReservationError>;

    /// Проверка остатка и вставка брони одной атомарной операцией.
    async fn insert_hold(
        &self,
        req: NewHold<'_>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, ReservationError>;

    /// Active -> Confirmed плюс увеличение committed, атомарно.
    /// Ok(true) — подтверждена сейчас, Ok(false) — повторный confirm
    /// с тем же order_id (идемпотентный ретрай).
    async fn confirm_hold(
        &self,
        hold_id: Uuid,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ReservationError>;

    /// Active -> Cancelled|Expired. Ok(true) — переход случился сейчас,
    /// Ok(false) — бронь уже была терминальной (no-op).
    async fn release_hold(
        &self,
        hold_id: Uuid,
        reason: ReleaseReason,
        now: DateTime<Utc>,
    ) -> Result<bool, ReservationError>;

    /// Снимает все активные брони сессии, возвращает число снятых.
    async fn release_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, ReservationError>;

    /// Активные брони с истёкшим TTL — вход свипера.
    async fn expired_hold_ids(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, ReservationError>;

    /// GC терминальных рядов (cancelled/expired) старше cutoff.
    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, ReservationError>;

    async fn get_hold(&self, hold_id: Uuid) -> Result<Hold, ReservationError>;
}
