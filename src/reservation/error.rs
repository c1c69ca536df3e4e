use thiserror::Error;

use crate::models::HoldState;

#[derive(Debug, Error)]
pub enum ReservationError {
    /// Ожидаемый отказ: свободного остатка меньше, чем запрошено.
    #[error("insufficient availability: only {available} left")]
    InsufficientAvailability { available: i64 },

    #[error("unit {0} not found")]
    UnitNotFound(i64),

    #[error("hold not found")]
    HoldNotFound,

    /// Бронь уже в терминальном состоянии либо её TTL истёк.
    /// Гонка клиента со свипером — вызывающий должен бронировать заново.
    #[error("hold is no longer active (state: {state:?})")]
    HoldExpired { state: HoldState },

    /// Защитный инвариант на commit: `committed` не может превысить
    /// `total_capacity`. Срабатывание означает баг в reserve.
    #[error("capacity exceeded for unit {unit_id}: committed {committed} + {quantity} > {total_capacity}")]
    CapacityExceeded {
        unit_id: i64,
        committed: i64,
        quantity: i64,
        total_capacity: i64,
    },

    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ReservationError {
    /// Признак отказа, который UI показывает покупателю как "осталось N".
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ReservationError::InsufficientAvailability { .. }
                | ReservationError::InvalidQuantity(_)
        )
    }
}
