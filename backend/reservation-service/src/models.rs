/// Domain model for the reservation core
///
/// The reservation is the primary aggregate; orders back-reference it after a
/// successful confirmation. Terminal rows are never deleted.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Hold,
    Confirmed,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Hold => "HOLD",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Hold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: Uuid,
    pub event_id: String,
    pub user_id: String,
    pub quantity: u32,
    pub seat_ids: Vec<String>,
    pub status: ReservationStatus,

    /// Present while the reservation is a HOLD, cleared on any transition out
    pub hold_expires_at: Option<DateTime<Utc>>,

    /// Opaque handle from the inventory reserve, needed to commit or release
    pub hold_token: String,

    /// Set when the reservation is confirmed, so replays can return the order
    pub order_id: Option<Uuid>,

    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub reservation_id: Uuid,
    pub event_id: String,
    pub user_id: String,

    /// Carried opaquely from the payment context; no pricing logic here
    pub amount: u64,

    pub status: OrderStatus,
    pub payment_intent_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request-deduplication record; evicted by store TTL after its window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,

    /// sha-256 over the canonical request body
    pub request_fingerprint: String,

    /// Serialized prior outcome, replayed on repeats
    pub response_snapshot: serde_json::Value,

    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names_are_screaming_snake() {
        assert_eq!(serde_json::to_string(&ReservationStatus::Hold).unwrap(), "\"HOLD\"");
        assert_eq!(
            serde_json::to_string(&ReservationStatus::Confirmed).unwrap(),
            "\"CONFIRMED\""
        );
        assert_eq!(serde_json::to_string(&OrderStatus::Refunded).unwrap(), "\"REFUNDED\"");

        let parsed: ReservationStatus = serde_json::from_str("\"EXPIRED\"").unwrap();
        assert_eq!(parsed, ReservationStatus::Expired);
    }

    #[test]
    fn only_hold_is_non_terminal() {
        assert!(!ReservationStatus::Hold.is_terminal());
        assert!(ReservationStatus::Confirmed.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
    }

    #[test]
    fn reservation_round_trips_through_json() {
        let now = Utc::now();
        let reservation = Reservation {
            reservation_id: Uuid::new_v4(),
            event_id: "evt-100".into(),
            user_id: "user-7".into(),
            quantity: 2,
            seat_ids: vec!["A-1".into(), "A-2".into()],
            status: ReservationStatus::Hold,
            hold_expires_at: Some(now),
            hold_token: "hold-abc".into(),
            order_id: None,
            idempotency_key: "key-1".into(),
            created_at: now,
            updated_at: now,
        };

        let value = serde_json::to_value(&reservation).unwrap();
        let back: Reservation = serde_json::from_value(value).unwrap();
        assert_eq!(back.reservation_id, reservation.reservation_id);
        assert_eq!(back.status, ReservationStatus::Hold);
        assert_eq!(back.seat_ids, reservation.seat_ids);
    }
}
