//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupt data.
fn parse_enum<T>(
    row: &Row,
    col: usize,
    col_name: &str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const WORKSPACE_COLS: &str =
    "id, name, plan, notify_email, usage, sales_usage, webhook_enabled, created_at, updated_at";

pub const LINK_COLS: &str = "id, workspace_id, domain, key, url, clicks, leads, sales, sale_amount, program_id, partner_id, created_at, updated_at";

pub const CUSTOMER_COLS: &str = "id, workspace_id, external_id, project_connect_id, stripe_customer_id, name, email, link_id, click_id, country, created_at, updated_at";

pub const PROGRAM_COLS: &str =
    "id, workspace_id, name, reward_type, reward_amount, reward_event, created_at";

pub const ENROLLMENT_COLS: &str =
    "id, program_id, partner_id, link_id, partner_email, commission_amount, created_at";

pub const COMMISSION_COLS: &str = "id, event_type, program_id, partner_id, link_id, customer_id, event_id, invoice_id, quantity, amount, currency, earnings, created_at";

pub const WEBHOOK_COLS: &str = "id, workspace_id, name, url, secret, triggers, disabled_at, consecutive_failures, last_failed_at, created_at, updated_at";

// ============ FromRow Implementations ============

impl FromRow for Workspace {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Workspace {
            id: row.get(0)?,
            name: row.get(1)?,
            plan: row.get(2)?,
            notify_email: row.get(3)?,
            usage: row.get(4)?,
            sales_usage: row.get(5)?,
            webhook_enabled: row.get::<_, i64>(6)? != 0,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl FromRow for Link {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Link {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            domain: row.get(2)?,
            key: row.get(3)?,
            url: row.get(4)?,
            clicks: row.get(5)?,
            leads: row.get(6)?,
            sales: row.get(7)?,
            sale_amount: row.get(8)?,
            program_id: row.get(9)?,
            partner_id: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

impl FromRow for Customer {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Customer {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            external_id: row.get(2)?,
            project_connect_id: row.get(3)?,
            stripe_customer_id: row.get(4)?,
            name: row.get(5)?,
            email: row.get(6)?,
            link_id: row.get(7)?,
            click_id: row.get(8)?,
            country: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl FromRow for Program {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Program {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            name: row.get(2)?,
            reward_type: parse_enum(row, 3, "reward_type", RewardType::from_str)?,
            reward_amount: row.get(4)?,
            reward_event: parse_enum(row, 5, "reward_event", RewardEventType::from_str)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for ProgramEnrollment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProgramEnrollment {
            id: row.get(0)?,
            program_id: row.get(1)?,
            partner_id: row.get(2)?,
            link_id: row.get(3)?,
            partner_email: row.get(4)?,
            commission_amount: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for Commission {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Commission {
            id: row.get(0)?,
            event_type: parse_enum(row, 1, "event_type", RewardEventType::from_str)?,
            program_id: row.get(2)?,
            partner_id: row.get(3)?,
            link_id: row.get(4)?,
            customer_id: row.get(5)?,
            event_id: row.get(6)?,
            invoice_id: row.get(7)?,
            quantity: row.get(8)?,
            amount: row.get(9)?,
            currency: row.get(10)?,
            earnings: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

impl FromRow for Webhook {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        // triggers is stored as a JSON array; corrupt values surface as
        // column errors rather than panics
        let triggers_raw: String = row.get(5)?;
        let triggers: Vec<String> = serde_json::from_str(&triggers_raw).map_err(|_| {
            rusqlite::Error::InvalidColumnType(5, "triggers".to_string(), rusqlite::types::Type::Text)
        })?;
        Ok(Webhook {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            name: row.get(2)?,
            url: row.get(3)?,
            secret: row.get(4)?,
            triggers,
            disabled_at: row.get(6)?,
            consecutive_failures: row.get(7)?,
            last_failed_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}
