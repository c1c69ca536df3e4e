//! Транзакционное ядро бронирования: ledger позиций, хранилище броней и
//! движок с операциями reserve / confirm / cancel / expire.
//!
//! Центральный инвариант: для каждой позиции
//! `committed + SUM(quantity живых броней) <= total_capacity`
//! при любом чередовании конкурентных вызовов. Живой считается бронь
//! в состоянии active с неистёкшим TTL — ряд с истёкшим TTL трактуется
//! как уже освобождённый, не дожидаясь свипера.

pub mod engine;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use engine::{ReservationEngine, ReservationResult};
pub use error::ReservationError;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use store::{InsertOutcome, NewHold, ReleaseReason, ReservationStore};
