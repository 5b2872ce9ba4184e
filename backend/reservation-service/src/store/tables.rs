/// Codecs between domain aggregates and stored rows
///
/// Key layout:
/// - reservations: pk = reservation_id, sk = "RESERVATION"
/// - orders:       pk = order_id,       sk = reservation_id
/// - idempotency:  pk = idempotency_key, sk = "RECORD"
/// - outbox:       pk = outbox_id,      sk = "EVENT"
use crate::models::{IdempotencyRecord, Order, Reservation};
use crate::store::{StoreError, StoreResult, StoredRow};
use transactional_outbox::OutboxEntry;

pub const RESERVATION_SK: &str = "RESERVATION";
pub const IDEMPOTENCY_SK: &str = "RECORD";
pub const OUTBOX_SK: &str = "EVENT";

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(row: &StoredRow) -> StoreResult<T> {
    serde_json::from_value(row.body.clone()).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub fn reservation_row(reservation: &Reservation) -> StoreResult<StoredRow> {
    Ok(StoredRow {
        pk: reservation.reservation_id.to_string(),
        sk: RESERVATION_SK.to_string(),
        status: reservation.status.as_str().to_string(),
        body: encode(reservation)?,
        created_at: reservation.created_at,
        updated_at: reservation.updated_at,
        expires_at: reservation.hold_expires_at,
        retry_at: None,
    })
}

pub fn decode_reservation(row: &StoredRow) -> StoreResult<Reservation> {
    decode(row)
}

pub fn order_row(order: &Order) -> StoreResult<StoredRow> {
    Ok(StoredRow {
        pk: order.order_id.to_string(),
        sk: order.reservation_id.to_string(),
        status: order.status.as_str().to_string(),
        body: encode(order)?,
        created_at: order.created_at,
        updated_at: order.updated_at,
        expires_at: None,
        retry_at: None,
    })
}

pub fn decode_order(row: &StoredRow) -> StoreResult<Order> {
    decode(row)
}

pub fn idempotency_row(record: &IdempotencyRecord) -> StoreResult<StoredRow> {
    Ok(StoredRow {
        pk: record.idempotency_key.clone(),
        sk: IDEMPOTENCY_SK.to_string(),
        status: "ACTIVE".to_string(),
        body: encode(record)?,
        created_at: record.created_at,
        updated_at: record.created_at,
        expires_at: Some(record.expires_at),
        retry_at: None,
    })
}

pub fn decode_idempotency(row: &StoredRow) -> StoreResult<IdempotencyRecord> {
    decode(row)
}

pub fn outbox_row(entry: &OutboxEntry) -> StoreResult<StoredRow> {
    Ok(StoredRow {
        pk: entry.outbox_id.to_string(),
        sk: OUTBOX_SK.to_string(),
        status: entry.status.as_str().to_string(),
        body: encode(entry)?,
        created_at: entry.created_at,
        updated_at: entry.created_at,
        expires_at: None,
        retry_at: entry.next_retry_at,
    })
}

pub fn decode_outbox(row: &StoredRow) -> StoreResult<OutboxEntry> {
    decode(row)
}
