//! Ledger writer - the durable write set for a processed event.
//!
//! Ordering is fixed:
//! 1. Append the event to the time-series store. This store is the source of
//!    truth for analytics, so a failure here aborts the whole operation and
//!    the provider retries (the idempotency guard makes that retry safe).
//! 2. Bump the link and workspace aggregate counters. Aggregates are
//!    approximate counters, not the system of record - a failure after step 1
//!    is logged for out-of-band reconciliation instead of retrying the whole
//!    pipeline (which would double-append the event).
//! 3. Create the commission row, keyed by the appended event's id. Only after
//!    step 1, since the commission references the event.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::events::{self, LeadEvent, NewLeadEvent, NewSaleEvent, SaleEvent};
use crate::models::{Commission, CreateCommission, RewardEventType};

/// A commission the reward calculator has already priced, waiting for the
/// event id the ledger assigns on append.
#[derive(Debug, Clone)]
pub struct PendingCommission {
    pub program_id: String,
    pub partner_id: String,
    pub earnings: i64,
}

/// What a sale write produced.
#[derive(Debug)]
pub struct SaleOutcome {
    pub event: SaleEvent,
    pub commission: Option<Commission>,
}

/// What a lead write produced.
#[derive(Debug)]
pub struct LeadOutcome {
    pub event: LeadEvent,
    pub commission: Option<Commission>,
}

/// Apply the durable effects of a sale.
pub fn record_sale(
    db: &Connection,
    events_db: &Connection,
    sale: &NewSaleEvent,
    commission: Option<&PendingCommission>,
) -> Result<SaleOutcome> {
    // Step 1: append the event. Any error here aborts before side effects.
    let event = events::append_sale(events_db, sale)?;

    // Step 2: aggregate increments. Neither depends on the other or on
    // step 3; failures are reconciled out-of-band.
    if let Err(e) = queries::increment_link_sales(db, &sale.link_id, sale.amount) {
        tracing::error!(
            "Aggregate update failed for link {} after sale event {} - needs reconciliation: {}",
            sale.link_id,
            event.event_id,
            e
        );
    }
    if let Err(e) = queries::increment_workspace_usage(db, &sale.workspace_id, 1, sale.amount) {
        tracing::error!(
            "Aggregate update failed for workspace {} after sale event {} - needs reconciliation: {}",
            sale.workspace_id,
            event.event_id,
            e
        );
    }

    // Step 3: commission, only now that the event it references exists.
    let commission = match commission {
        Some(pending) => queries::try_create_commission(
            db,
            &CreateCommission {
                event_type: RewardEventType::Sale,
                program_id: pending.program_id.clone(),
                partner_id: pending.partner_id.clone(),
                link_id: sale.link_id.clone(),
                customer_id: sale.customer_id.clone(),
                event_id: event.event_id.clone(),
                invoice_id: sale.invoice_id.clone(),
                quantity: 1,
                amount: sale.amount,
                currency: sale.currency.clone(),
                earnings: pending.earnings,
            },
        )?,
        None => None,
    };

    Ok(SaleOutcome { event, commission })
}

/// Apply the durable effects of a lead (attributed customer creation).
pub fn record_lead(
    db: &Connection,
    events_db: &Connection,
    lead: &NewLeadEvent,
    commission: Option<&PendingCommission>,
) -> Result<LeadOutcome> {
    let event = events::append_lead(events_db, lead)?;

    if let Err(e) = queries::increment_link_leads(db, &lead.link_id) {
        tracing::error!(
            "Aggregate update failed for link {} after lead event {} - needs reconciliation: {}",
            lead.link_id,
            event.event_id,
            e
        );
    }
    if let Err(e) = queries::increment_workspace_usage(db, &lead.workspace_id, 1, 0) {
        tracing::error!(
            "Aggregate update failed for workspace {} after lead event {} - needs reconciliation: {}",
            lead.workspace_id,
            event.event_id,
            e
        );
    }

    let commission = match commission {
        Some(pending) => queries::try_create_commission(
            db,
            &CreateCommission {
                event_type: RewardEventType::Lead,
                program_id: pending.program_id.clone(),
                partner_id: pending.partner_id.clone(),
                link_id: lead.link_id.clone(),
                customer_id: lead.customer_id.clone(),
                event_id: event.event_id.clone(),
                invoice_id: None,
                quantity: 1,
                amount: 0,
                currency: "usd".to_string(),
                earnings: pending.earnings,
            },
        )?,
        None => None,
    };

    Ok(LeadOutcome { event, commission })
}
