use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SellableUnit {
    pub id: i64,
    pub name: String,
    pub total_capacity: i64,
    pub committed: i64,
    pub created_at: DateTime<Utc>,
}

impl SellableUnit {
    // остаток без учёта активных броней (их считает хранилище)
    pub fn uncommitted(&self) -> i64 {
        self.total_capacity - self.committed
    }
}
