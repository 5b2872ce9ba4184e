//! Reservation core for the Ticketline platform.
//!
//! Callers take a short-lived seat hold, then confirm it into an order or
//! cancel it; unconfirmed holds expire on their own. The core guarantees
//! at-most-once side effects per client intent (idempotency layer), no
//! oversell (inventory coordination + conditional writes), bounded hold
//! lifetime (timer + sweeper expiry), and reliable downstream event delivery
//! (transactional outbox).
//!
//! Transport adapters, authentication, the inventory service, and the event
//! bus itself live elsewhere; this crate ends at their interfaces.

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod expiry;
pub mod idempotency;
pub mod inventory;
pub mod models;
pub mod outbox;
pub mod reservation;
pub mod store;
pub mod testsupport;

pub use transactional_outbox::{Clock, ManualClock, SystemClock};
