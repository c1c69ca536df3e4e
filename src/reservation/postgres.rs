use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{Hold, HoldState, SellableUnit};

use super::error::ReservationError;
use super::store::{InsertOutcome, NewHold, ReleaseReason, ReservationStore};

/// Postgres-хранилище. Атомарность обеспечивается транзакцией с
/// блокировкой строки позиции (`SELECT ... FOR UPDATE`): конкурирующие
/// reserve/confirm по одной позиции сериализуются на этой строке.
/// Порядок блокировок всегда один — сначала строка позиции, потом бронь,
/// иначе reserve и confirm могут взаимно заблокироваться.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Блокирует строку позиции и возвращает (total_capacity, committed).
    async fn lock_unit(
        tx: &mut Transaction<'_, Postgres>,
        unit_id: i64,
    ) -> Result<(i64, i64), ReservationError> {
        sqlx::query_as::<_, (i64, i64)>(
            "SELECT total_capacity, committed FROM units WHERE id = $1 FOR UPDATE",
        )
        .bind(unit_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(ReservationError::UnitNotFound(unit_id))
    }

    /// Сумма живых броней позиции. Вызывать только под блокировкой позиции.
    async fn live_held(
        tx: &mut Transaction<'_, Postgres>,
        unit_id: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, ReservationError> {
        let held: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM holds
             WHERE unit_id = $1 AND state = 'active' AND expires_at > $2",
        )
        .bind(unit_id)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;
        Ok(held)
    }

    fn decode_state(s: &str) -> Result<HoldState, ReservationError> {
        HoldState::parse(s).ok_or_else(|| {
            ReservationError::Storage(sqlx::Error::Decode(
                format!("unknown hold state: {s}").into(),
            ))
        })
    }
}

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn create_unit(
        &self,
        name: &str,
        total_capacity: i64,
    ) -> Result<SellableUnit, ReservationError> {
        let (id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "INSERT INTO units (name, total_capacity) VALUES ($1, $2)
             RETURNING id, created_at",
        )
        .bind(name)
        .bind(total_capacity)
        .fetch_one(&self.pool)
        .await?;

        Ok(SellableUnit {
            id,
            name: name.to_string(),
            total_capacity,
            committed: 0,
            created_at,
        })
    }

    async fn get_unit(&self, unit_id: i64) -> Result<SellableUnit, ReservationError> {
        sqlx::query_as::<_, SellableUnit>(
            "SELECT id, name, total_capacity, committed, created_at FROM units WHERE id = $1",
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ReservationError::UnitNotFound(unit_id))
    }

    async fn list_units(&self) -> Result<Vec<SellableUnit>, ReservationError> {
        Ok(sqlx::query_as::<_, SellableUnit>(
            "SELECT id, name, total_capacity, committed, created_at FROM units ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn availability(
        &self,
        unit_id: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, ReservationError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT u.total_capacity - u.committed - COALESCE((
                 SELECT SUM(h.quantity) FROM holds h
                 WHERE h.unit_id = u.id AND h.state = 'active' AND h.expires_at > $2
             ), 0)::BIGINT
             FROM units u WHERE u.id = $1",
        )
        .bind(unit_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ReservationError::UnitNotFound(unit_id))
    }

    async fn insert_hold(
        &self,
        req: NewHold<'_>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, ReservationError> {
        let mut tx = self.pool.begin().await?;

        let (total_capacity, committed) = Self::lock_unit(&mut tx, req.unit_id).await?;
        let held = Self::live_held(&mut tx, req.unit_id, now).await?;
        let available = total_capacity - committed - held;

        if req.quantity > available {
            // ничего не пишем
            tx.rollback().await?;
            return Ok(InsertOutcome::Insufficient { available });
        }

        let hold = Hold {
            id: Uuid::new_v4(),
            unit_id: req.unit_id,
            session_id: req.session_id.to_string(),
            quantity: req.quantity,
            state: HoldState::Active,
            order_id: None,
            customer_email: req.customer_email.map(str::to_string),
            created_at: now,
            expires_at,
        };

        sqlx::query(
            "INSERT INTO holds (id, unit_id, session_id, quantity, state, customer_email, created_at, expires_at)
             VALUES ($1, $2, $3, $4, 'active', $5, $6, $7)",
        )
        .bind(hold.id)
        .bind(hold.unit_id)
        .bind(&hold.session_id)
        .bind(hold.quantity)
        .bind(hold.customer_email.as_deref())
        .bind(hold.created_at)
        .bind(hold.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(InsertOutcome::Created {
            remaining: available - hold.quantity,
            hold,
        })
    }

    async fn confirm_hold(
        &self,
        hold_id: Uuid,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ReservationError> {
        let mut tx = self.pool.begin().await?;

        // сперва узнаём позицию брони, чтобы взять блокировки в общем порядке
        let unit_id: i64 = sqlx::query_scalar("SELECT unit_id FROM holds WHERE id = $1")
            .bind(hold_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(ReservationError::HoldNotFound)?;

        let (total_capacity, committed) = Self::lock_unit(&mut tx, unit_id).await?;

        // перечитываем бронь уже под блокировкой позиции
        let (quantity, state, existing_order, expires_at) =
            sqlx::query_as::<_, (i64, String, Option<String>, DateTime<Utc>)>(
                "SELECT quantity, state, order_id, expires_at FROM holds WHERE id = $1 FOR UPDATE",
            )
            .bind(hold_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(ReservationError::HoldNotFound)?;

        match Self::decode_state(&state)? {
            HoldState::Active if expires_at > now => {
                if committed + quantity > total_capacity {
                    tx.rollback().await?;
                    return Err(ReservationError::CapacityExceeded {
                        unit_id,
                        committed,
                        quantity,
                        total_capacity,
                    });
                }

                sqlx::query("UPDATE holds SET state = 'confirmed', order_id = $2 WHERE id = $1")
                    .bind(hold_id)
                    .bind(order_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("UPDATE units SET committed = committed + $2 WHERE id = $1")
                    .bind(unit_id)
                    .bind(quantity)
                    .execute(&mut *tx)
                    .await?;

                tx.commit().await?;
                Ok(true)
            }
            // TTL истёк до подтверждения: помечаем и отказываем
            HoldState::Active => {
                sqlx::query("UPDATE holds SET state = 'expired' WHERE id = $1")
                    .bind(hold_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Err(ReservationError::HoldExpired {
                    state: HoldState::Expired,
                })
            }
            HoldState::Confirmed if existing_order.as_deref() == Some(order_id) => {
                tx.rollback().await?;
                Ok(false)
            }
            state => {
                tx.rollback().await?;
                Err(ReservationError::HoldExpired { state })
            }
        }
    }

    async fn release_hold(
        &self,
        hold_id: Uuid,
        reason: ReleaseReason,
        now: DateTime<Utc>,
    ) -> Result<bool, ReservationError> {
        // одиночный условный UPDATE — атомарен и идемпотентен без транзакции
        let affected = match reason {
            ReleaseReason::Cancel => {
                sqlx::query(
                    "UPDATE holds
                     SET state = CASE WHEN expires_at <= $2 THEN 'expired' ELSE 'cancelled' END
                     WHERE id = $1 AND state = 'active'",
                )
                .bind(hold_id)
                .bind(now)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
            ReleaseReason::Expire => {
                sqlx::query("UPDATE holds SET state = 'expired' WHERE id = $1 AND state = 'active'")
                    .bind(hold_id)
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            }
        };

        if affected > 0 {
            return Ok(true);
        }

        // либо брони нет, либо она уже терминальна
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM holds WHERE id = $1)")
            .bind(hold_id)
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(false)
        } else {
            Err(ReservationError::HoldNotFound)
        }
    }

    async fn release_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, ReservationError> {
        let affected = sqlx::query(
            "UPDATE holds
             SET state = CASE WHEN expires_at <= $2 THEN 'expired' ELSE 'cancelled' END
             WHERE session_id = $1 AND state = 'active'",
        )
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    async fn expired_hold_ids(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, ReservationError> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM holds
             WHERE state = 'active' AND expires_at <= $1
             ORDER BY expires_at LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, ReservationError> {
        let affected = sqlx::query(
            "DELETE FROM holds
             WHERE state IN ('cancelled', 'expired') AND expires_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    async fn get_hold(&self, hold_id: Uuid) -> Result<Hold, ReservationError> {
        let row = sqlx::query_as::<
            _,
            (
                Uuid,
                i64,
                String,
                i64,
                String,
                Option<String>,
                Option<String>,
                DateTime<Utc>,
                DateTime<Utc>,
            ),
        >(
            "SELECT id, unit_id, session_id, quantity, state, order_id, customer_email, created_at, expires_at
             FROM holds WHERE id = $1",
        )
        .bind(hold_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ReservationError::HoldNotFound)?;

        Ok(Hold {
            id: row.0,
            unit_id: row.1,
            session_id: row.2,
            quantity: row.3,
            state: Self::decode_state(&row.4)?,
            order_id: row.5,
            customer_email: row.6,
            created_at: row.7,
            expires_at: row.8,
        })
    }
}
