use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Hold, HoldState, SellableUnit};

use super::error::ReservationError;
use super::store::{InsertOutcome, NewHold, ReleaseReason, ReservationStore};

/// In-memory хранилище под одним mutex. Каждая операция берёт блокировку
/// один раз, поэтому все операции линеаризуемы относительно инварианта
/// ёмкости. Используется тестами и как референс контракта для Postgres.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_unit_id: i64,
    units: HashMap<i64, SellableUnit>,
    holds: HashMap<Uuid, Hold>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryInner {
    fn live_held(&self, unit_id: i64, now: DateTime<Utc>) -> i64 {
        self.holds
            .values()
            .filter(|h| h.unit_id == unit_id && h.is_live(now))
            .map(|h| h.quantity)
            .sum()
    }

    fn available(&self, unit: &SellableUnit, now: DateTime<Utc>) -> i64 {
        unit.uncommitted() - self.live_held(unit.id, now)
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn create_unit(
        &self,
        name: &str,
        total_capacity: i64,
    ) -> Result<SellableUnit, ReservationError> {
        let mut inner = self.inner.lock().await;
        inner.next_unit_id += 1;
        let unit = SellableUnit {
            id: inner.next_unit_id,
            name: name.to_string(),
            total_capacity,
            committed: 0,
            created_at: Utc::now(),
        };
        inner.units.insert(unit.id, unit.clone());
        Ok(unit)
    }

    async fn get_unit(&self, unit_id: i64) -> Result<SellableUnit, ReservationError> {
        let inner = self.inner.lock().await;
        inner
            .units
            .get(&unit_id)
            .cloned()
            .ok_or(ReservationError::UnitNotFound(unit_id))
    }

    async fn list_units(&self) -> Result<Vec<SellableUnit>, ReservationError> {
        let inner = self.inner.lock().await;
        let mut units: Vec<_> = inner.units.values().cloned().collect();
        units.sort_by_key(|u| u.id);
        Ok(units)
    }

    async fn availability(
        &self,
        unit_id: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, ReservationError> {
        let inner = self.inner.lock().await;
        let unit = inner
            .units
            .get(&unit_id)
            .ok_or(ReservationError::UnitNotFound(unit_id))?;
        Ok(inner.available(unit, now))
    }

    async fn insert_hold(
        &self,
        req: NewHold<'_>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, ReservationError> {
        let mut inner = self.inner.lock().await;
        let unit = inner
            .units
            .get(&req.unit_id)
            .ok_or(ReservationError::UnitNotFound(req.unit_id))?
            .clone();

        let available = inner.available(&unit, now);
        if req.quantity > available {
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
        inner.holds.insert(hold.id, hold.clone());

        Ok(InsertOutcome::Created {
            hold,
            remaining: available - req.quantity,
        })
    }

    async fn confirm_hold(
        &self,
        hold_id: Uuid,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ReservationError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let hold = inner
            .holds
            .get_mut(&hold_id)
            .ok_or(ReservationError::HoldNotFound)?;

        match hold.state {
            HoldState::Active if hold.expires_at > now => {
                let unit = inner
                    .units
                    .get_mut(&hold.unit_id)
                    .ok_or(ReservationError::UnitNotFound(hold.unit_id))?;
                if unit.committed + hold.quantity > unit.total_capacity {
                    return Err(ReservationError::CapacityExceeded {
                        unit_id: unit.id,
                        committed: unit.committed,
                        quantity: hold.quantity,
                        total_capacity: unit.total_capacity,
                    });
                }
                unit.committed += hold.quantity;
                hold.state = HoldState::Confirmed;
                hold.order_id = Some(order_id.to_string());
                Ok(true)
            }
            // TTL истёк, но свипер ряд ещё не пометил: фиксируем факт
            HoldState::Active => {
                hold.state = HoldState::Expired;
                Err(ReservationError::HoldExpired {
                    state: HoldState::Expired,
                })
            }
            HoldState::Confirmed if hold.order_id.as_deref() == Some(order_id) => Ok(false),
            state => Err(ReservationError::HoldExpired { state }),
        }
    }

    async fn release_hold(
        &self,
        hold_id: Uuid,
        reason: ReleaseReason,
        now: DateTime<Utc>,
    ) -> Result<bool, ReservationError> {
        let mut inner = self.inner.lock().await;
        let hold = inner
            .holds
            .get_mut(&hold_id)
            .ok_or(ReservationError::HoldNotFound)?;

        if hold.state.is_terminal() {
            return Ok(false);
        }
        // отмена, пришедшая после истечения TTL, для аудита — expired
        hold.state = match reason {
            ReleaseReason::Cancel if hold.expires_at > now => HoldState::Cancelled,
            _ => HoldState::Expired,
        };
        Ok(true)
    }

    async fn release_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, ReservationError> {
        let mut inner = self.inner.lock().await;
        let mut released = 0;
        for hold in inner.holds.values_mut() {
            if hold.session_id == session_id && hold.state == HoldState::Active {
                hold.state = if hold.expires_at > now {
                    HoldState::Cancelled
                } else {
                    HoldState::Expired
                };
                released += 1;
            }
        }
        Ok(released)
    }

    async fn expired_hold_ids(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, ReservationError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .holds
            .values()
            .filter(|h| h.state == HoldState::Active && h.expires_at <= now)
            .take(limit.max(0) as usize)
            .map(|h| h.id)
            .collect())
    }

    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, ReservationError> {
        let mut inner = self.inner.lock().await;
        let before = inner.holds.len();
        inner.holds.retain(|_, h| {
            !(matches!(h.state, HoldState::Cancelled | HoldState::Expired)
                && h.expires_at < cutoff)
        });
        Ok((before - inner.holds.len()) as u64)
    }

    async fn get_hold(&self, hold_id: Uuid) -> Result<Hold, ReservationError> {
        let inner = self.inner.lock().await;
        inner
            .holds
            .get(&hold_id)
            .cloned()
            .ok_or(ReservationError::HoldNotFound)
    }
}
