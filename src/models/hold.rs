use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Состояния брони. Из `Active` есть ровно один переход в одно из
/// терминальных состояний; терминальные состояния неизменяемы.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldState {
    Active,
    Confirmed,
    Cancelled,
    Expired,
}

impl HoldState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldState::Active => "active",
            HoldState::Confirmed => "confirmed",
            HoldState::Cancelled => "cancelled",
            HoldState::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<HoldState> {
        match s {
            "active" => Some(HoldState::Active),
            "confirmed" => Some(HoldState::Confirmed),
            "cancelled" => Some(HoldState::Cancelled),
            "expired" => Some(HoldState::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, HoldState::Active)
    }
}

/// Временная бронь количества по одной позиции на одну checkout-сессию.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    pub id: Uuid,
    pub unit_id: i64,
    pub session_id: String,
    pub quantity: i64,
    pub state: HoldState,
    pub order_id: Option<String>,
    pub customer_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    // "несомненно активная": active и TTL ещё не истёк. Ряд с истёкшим TTL
    // считается уже освобождённым, даже если свипер его ещё не пометил.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.state == HoldState::Active && self.expires_at > now
    }
}
