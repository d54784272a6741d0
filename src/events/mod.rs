//! Append-only time-series event store (clicks, leads, sales).
//!
//! Lives in its own database file (mirroring how audit data is isolated from
//! relational data) so analytics growth never bloats the relational store.
//! Records are immutable after creation and idempotent on event_id.

mod store;

pub use store::*;
