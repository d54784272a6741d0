//! Payment provider integration: inbound webhook signature verification and
//! typed event payloads.

mod stripe;

pub use stripe::*;
