//! Attribution resolution over the time-series event store.
//!
//! Read-only, point-in-time snapshot queries - never transactional with the
//! event writes. Absence of a matching event signals a customer who converted
//! outside of a tracked link: a benign skip at every call site, not an error.

use rusqlite::Connection;

use crate::error::Result;
use crate::events::{self, ClickEvent, LeadEvent};

/// Outcome of resolving the lead that explains a sale.
#[derive(Debug)]
pub enum SaleAttribution {
    /// The customer has a prior lead event; the sale is attributed to its link.
    Attributed(LeadEvent),
    /// No lead exists - the customer converted outside a tracked link.
    NotTracked,
}

/// Resolve the lead event for a customer about to be credited with a sale.
///
/// Tie-break on repeated lead recording: the first-recorded lead wins
/// (the store query orders explicitly, see `events::get_lead_by_customer`).
pub fn resolve_sale(conn: &Connection, customer_id: &str) -> Result<SaleAttribution> {
    match events::get_lead_by_customer(conn, customer_id)? {
        Some(lead) => Ok(SaleAttribution::Attributed(lead)),
        None => {
            tracing::info!(
                "No lead event for customer {} - sale not attributed to a tracked link",
                customer_id
            );
            Ok(SaleAttribution::NotTracked)
        }
    }
}

/// Resolve the originating click for a new-customer creation.
///
/// Returns None when the click id is unknown; the caller must skip cleanly
/// without creating a partial customer record.
pub fn resolve_click(conn: &Connection, click_id: &str) -> Result<Option<ClickEvent>> {
    let click = events::get_click_by_id(conn, click_id)?;
    if click.is_none() {
        tracing::info!("Click {} not found - customer creation not attributable", click_id);
    }
    Ok(click)
}
