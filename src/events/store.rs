use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::id::EntityType;

fn now() -> i64 {
    Utc::now().timestamp()
}

/// An immutable click record.
#[derive(Debug, Clone)]
pub struct ClickEvent {
    pub event_id: String,
    pub link_id: String,
    pub workspace_id: String,
    pub url: Option<String>,
    pub country: Option<String>,
    pub timestamp: i64,
}

/// An immutable lead (signup/activation) record.
#[derive(Debug, Clone)]
pub struct LeadEvent {
    pub event_id: String,
    pub event_name: String,
    pub customer_id: String,
    pub link_id: String,
    pub workspace_id: String,
    pub click_id: Option<String>,
    pub timestamp: i64,
}

/// An immutable sale record.
#[derive(Debug, Clone)]
pub struct SaleEvent {
    pub event_id: String,
    pub event_name: String,
    pub customer_id: String,
    pub link_id: String,
    pub workspace_id: String,
    /// Amount in cents.
    pub amount: i64,
    pub currency: String,
    pub invoice_id: Option<String>,
    pub payment_processor: String,
    /// Raw provider metadata (JSON).
    pub metadata: Option<String>,
    pub timestamp: i64,
}

/// Input for appending a sale event. The event_id is generated on append.
#[derive(Debug, Clone)]
pub struct NewSaleEvent {
    pub event_name: String,
    pub customer_id: String,
    pub link_id: String,
    pub workspace_id: String,
    pub amount: i64,
    pub currency: String,
    pub invoice_id: Option<String>,
    pub payment_processor: String,
    pub metadata: Option<String>,
}

/// Input for appending a lead event.
#[derive(Debug, Clone)]
pub struct NewLeadEvent {
    pub event_name: String,
    pub customer_id: String,
    pub link_id: String,
    pub workspace_id: String,
    pub click_id: Option<String>,
}

fn click_from_row(row: &Row) -> rusqlite::Result<ClickEvent> {
    Ok(ClickEvent {
        event_id: row.get(0)?,
        link_id: row.get(1)?,
        workspace_id: row.get(2)?,
        url: row.get(3)?,
        country: row.get(4)?,
        timestamp: row.get(5)?,
    })
}

fn lead_from_row(row: &Row) -> rusqlite::Result<LeadEvent> {
    Ok(LeadEvent {
        event_id: row.get(0)?,
        event_name: row.get(1)?,
        customer_id: row.get(2)?,
        link_id: row.get(3)?,
        workspace_id: row.get(4)?,
        click_id: row.get(5)?,
        timestamp: row.get(6)?,
    })
}

const CLICK_EVENT_COLS: &str = "event_id, link_id, workspace_id, url, country, timestamp";
const LEAD_EVENT_COLS: &str =
    "event_id, event_name, customer_id, link_id, workspace_id, click_id, timestamp";

/// Record a click. The click_id doubles as the event_id and is handed to the
/// tracked site for later lead attribution.
pub fn record_click(
    conn: &Connection,
    link_id: &str,
    workspace_id: &str,
    url: Option<&str>,
    country: Option<&str>,
) -> Result<ClickEvent> {
    let event_id = EntityType::Event.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO click_events (event_id, link_id, workspace_id, url, country, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![event_id, link_id, workspace_id, url, country, ts],
    )?;
    Ok(ClickEvent {
        event_id,
        link_id: link_id.to_string(),
        workspace_id: workspace_id.to_string(),
        url: url.map(String::from),
        country: country.map(String::from),
        timestamp: ts,
    })
}

/// Append a lead event. Idempotent on event_id (INSERT OR IGNORE).
pub fn append_lead(conn: &Connection, input: &NewLeadEvent) -> Result<LeadEvent> {
    let event_id = EntityType::Event.gen_id();
    let ts = now();
    conn.execute(
        "INSERT OR IGNORE INTO lead_events (event_id, event_name, customer_id, link_id, workspace_id, click_id, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event_id,
            input.event_name,
            input.customer_id,
            input.link_id,
            input.workspace_id,
            input.click_id,
            ts
        ],
    )?;
    Ok(LeadEvent {
        event_id,
        event_name: input.event_name.clone(),
        customer_id: input.customer_id.clone(),
        link_id: input.link_id.clone(),
        workspace_id: input.workspace_id.clone(),
        click_id: input.click_id.clone(),
        timestamp: ts,
    })
}

/// Append a sale event. Idempotent on event_id (INSERT OR IGNORE).
pub fn append_sale(conn: &Connection, input: &NewSaleEvent) -> Result<SaleEvent> {
    let event_id = EntityType::Event.gen_id();
    let ts = now();
    conn.execute(
        "INSERT OR IGNORE INTO sale_events (event_id, event_name, customer_id, link_id, workspace_id, amount, currency, invoice_id, payment_processor, metadata, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            event_id,
            input.event_name,
            input.customer_id,
            input.link_id,
            input.workspace_id,
            input.amount,
            input.currency,
            input.invoice_id,
            input.payment_processor,
            input.metadata,
            ts
        ],
    )?;
    Ok(SaleEvent {
        event_id,
        event_name: input.event_name.clone(),
        customer_id: input.customer_id.clone(),
        link_id: input.link_id.clone(),
        workspace_id: input.workspace_id.clone(),
        amount: input.amount,
        currency: input.currency.clone(),
        invoice_id: input.invoice_id.clone(),
        payment_processor: input.payment_processor.clone(),
        metadata: input.metadata.clone(),
        timestamp: ts,
    })
}

/// The lead event that explains a sale for this customer.
///
/// Ordering is explicit: the first-recorded lead wins (timestamp, then
/// event_id for determinism within a second). Callers must not assume any
/// store-default ordering.
pub fn get_lead_by_customer(conn: &Connection, customer_id: &str) -> Result<Option<LeadEvent>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM lead_events WHERE customer_id = ?1
             ORDER BY timestamp ASC, event_id ASC LIMIT 1",
            LEAD_EVENT_COLS
        ),
        params![customer_id],
        lead_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Point lookup of the click event a new-customer creation attributes to.
pub fn get_click_by_id(conn: &Connection, click_id: &str) -> Result<Option<ClickEvent>> {
    conn.query_row(
        &format!("SELECT {} FROM click_events WHERE event_id = ?1", CLICK_EVENT_COLS),
        params![click_id],
        click_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Count of persisted sale events for a customer (used by tests and
/// reconciliation tooling).
pub fn count_sales_for_customer(conn: &Connection, customer_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM sale_events WHERE customer_id = ?1",
        params![customer_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}
