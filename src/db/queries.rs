use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, COMMISSION_COLS, CUSTOMER_COLS, ENROLLMENT_COLS, LINK_COLS,
    PROGRAM_COLS, WEBHOOK_COLS, WORKSPACE_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Workspaces ============

pub fn create_workspace(conn: &Connection, input: &CreateWorkspace) -> Result<Workspace> {
    let id = EntityType::Workspace.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO workspaces (id, name, plan, notify_email, usage, sales_usage, webhook_enabled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, 0, 0, ?5, ?5)",
        params![id, input.name, input.plan, input.notify_email, ts],
    )?;
    get_workspace_by_id(conn, &id)?
        .ok_or_else(|| crate::error::AppError::Internal("workspace insert lost".into()))
}

pub fn get_workspace_by_id(conn: &Connection, id: &str) -> Result<Option<Workspace>> {
    query_one(
        conn,
        &format!("SELECT {} FROM workspaces WHERE id = ?1", WORKSPACE_COLS),
        &[&id],
    )
}

/// Atomically bump a workspace's usage counters.
///
/// Always an in-place `x = x + ?` increment - aggregate counters are never
/// read-modify-written in application code.
pub fn increment_workspace_usage(
    conn: &Connection,
    workspace_id: &str,
    usage_delta: i64,
    sales_usage_delta: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE workspaces
         SET usage = usage + ?1, sales_usage = sales_usage + ?2, updated_at = ?3
         WHERE id = ?4",
        params![usage_delta, sales_usage_delta, now(), workspace_id],
    )?;
    Ok(affected > 0)
}

/// Recompute the workspace's webhook_enabled flag: true iff at least one
/// non-disabled webhook remains. Called after a webhook is disabled, created,
/// or deleted.
pub fn recompute_webhook_enabled(conn: &Connection, workspace_id: &str) -> Result<bool> {
    let enabled: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM webhooks WHERE workspace_id = ?1 AND disabled_at IS NULL)",
        params![workspace_id],
        |row| row.get::<_, i64>(0).map(|v| v != 0),
    )?;
    conn.execute(
        "UPDATE workspaces SET webhook_enabled = ?1, updated_at = ?2 WHERE id = ?3",
        params![enabled as i64, now(), workspace_id],
    )?;
    Ok(enabled)
}

// ============ Links ============

pub fn create_link(conn: &Connection, input: &CreateLink) -> Result<Link> {
    let id = EntityType::Link.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO links (id, workspace_id, domain, key, url, clicks, leads, sales, sale_amount, program_id, partner_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, 0, 0, ?6, ?7, ?8, ?8)",
        params![
            id,
            input.workspace_id,
            input.domain,
            input.key,
            input.url,
            input.program_id,
            input.partner_id,
            ts
        ],
    )?;
    get_link_by_id(conn, &id)?
        .ok_or_else(|| crate::error::AppError::Internal("link insert lost".into()))
}

pub fn get_link_by_id(conn: &Connection, id: &str) -> Result<Option<Link>> {
    query_one(
        conn,
        &format!("SELECT {} FROM links WHERE id = ?1", LINK_COLS),
        &[&id],
    )
}

/// Atomically bump a link's sale counters by one sale of `amount` cents.
pub fn increment_link_sales(conn: &Connection, link_id: &str, amount: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE links
         SET sales = sales + 1, sale_amount = sale_amount + ?1, updated_at = ?2
         WHERE id = ?3",
        params![amount, now(), link_id],
    )?;
    Ok(affected > 0)
}

/// Atomically bump a link's lead counter.
pub fn increment_link_leads(conn: &Connection, link_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE links SET leads = leads + 1, updated_at = ?1 WHERE id = ?2",
        params![now(), link_id],
    )?;
    Ok(affected > 0)
}

// ============ Customers ============

pub fn create_customer(conn: &Connection, input: &CreateCustomer) -> Result<Customer> {
    let id = EntityType::Customer.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO customers (id, workspace_id, external_id, project_connect_id, stripe_customer_id, name, email, link_id, click_id, country, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            id,
            input.workspace_id,
            input.external_id,
            input.project_connect_id,
            input.stripe_customer_id,
            input.name,
            input.email,
            input.link_id,
            input.click_id,
            input.country,
            ts
        ],
    )?;
    get_customer_by_id(conn, &id)?
        .ok_or_else(|| crate::error::AppError::Internal("customer insert lost".into()))
}

pub fn get_customer_by_id(conn: &Connection, id: &str) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!("SELECT {} FROM customers WHERE id = ?1", CUSTOMER_COLS),
        &[&id],
    )
}

/// Customer by workspace-assigned ID within a connect namespace. `IS` rather
/// than `=` so a NULL namespace (direct integration, no connect account)
/// still matches.
pub fn get_customer_by_external_id(
    conn: &Connection,
    external_id: &str,
    project_connect_id: Option<&str>,
) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM customers WHERE external_id = ?1 AND project_connect_id IS ?2",
            CUSTOMER_COLS
        ),
        &[&external_id, &project_connect_id],
    )
}

pub fn get_customer_by_stripe_id(
    conn: &Connection,
    stripe_customer_id: &str,
) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM customers WHERE stripe_customer_id = ?1",
            CUSTOMER_COLS
        ),
        &[&stripe_customer_id],
    )
}

/// Update provider-side identity on an existing customer (update-in-place
/// branch of the customer lifecycle handlers). Only provided fields change.
pub fn update_customer_identity(
    conn: &Connection,
    customer_id: &str,
    stripe_customer_id: Option<&str>,
    name: Option<&str>,
    email: Option<&str>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE customers
         SET stripe_customer_id = COALESCE(?1, stripe_customer_id),
             name = COALESCE(?2, name),
             email = COALESCE(?3, email),
             updated_at = ?4
         WHERE id = ?5",
        params![stripe_customer_id, name, email, now(), customer_id],
    )?;
    Ok(affected > 0)
}

// ============ Programs & Enrollments ============

pub fn create_program(
    conn: &Connection,
    workspace_id: &str,
    name: &str,
    reward_type: RewardType,
    reward_amount: i64,
    reward_event: RewardEventType,
) -> Result<Program> {
    let id = EntityType::Program.gen_id();
    conn.execute(
        "INSERT INTO programs (id, workspace_id, name, reward_type, reward_amount, reward_event, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            workspace_id,
            name,
            reward_type.as_str(),
            reward_amount,
            reward_event.as_str(),
            now()
        ],
    )?;
    get_program_by_id(conn, &id)?
        .ok_or_else(|| crate::error::AppError::Internal("program insert lost".into()))
}

pub fn get_program_by_id(conn: &Connection, id: &str) -> Result<Option<Program>> {
    query_one(
        conn,
        &format!("SELECT {} FROM programs WHERE id = ?1", PROGRAM_COLS),
        &[&id],
    )
}

pub fn create_enrollment(conn: &Connection, input: &CreateEnrollment) -> Result<ProgramEnrollment> {
    let id = EntityType::Enrollment.gen_id();
    conn.execute(
        "INSERT INTO program_enrollments (id, program_id, partner_id, link_id, partner_email, commission_amount, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            input.program_id,
            input.partner_id,
            input.link_id,
            input.partner_email,
            input.commission_amount,
            now()
        ],
    )?;
    query_one(
        conn,
        &format!(
            "SELECT {} FROM program_enrollments WHERE id = ?1",
            ENROLLMENT_COLS
        ),
        &[&id],
    )?
    .ok_or_else(|| crate::error::AppError::Internal("enrollment insert lost".into()))
}

pub fn get_enrollment(
    conn: &Connection,
    program_id: &str,
    partner_id: &str,
) -> Result<Option<ProgramEnrollment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM program_enrollments WHERE program_id = ?1 AND partner_id = ?2",
            ENROLLMENT_COLS
        ),
        &[&program_id, &partner_id],
    )
}

// ============ Commissions ============

/// Atomically create a commission, returning None if one already exists for
/// this event_id.
///
/// Uses INSERT OR IGNORE on the unique event_id - the event id is the natural
/// dedupe key within the relational store, backing up the idempotency guard.
pub fn try_create_commission(
    conn: &Connection,
    input: &CreateCommission,
) -> Result<Option<Commission>> {
    let id = EntityType::Commission.gen_id();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO commissions (id, event_type, program_id, partner_id, link_id, customer_id, event_id, invoice_id, quantity, amount, currency, earnings, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            id,
            input.event_type.as_str(),
            input.program_id,
            input.partner_id,
            input.link_id,
            input.customer_id,
            input.event_id,
            input.invoice_id,
            input.quantity,
            input.amount,
            input.currency,
            input.earnings,
            now()
        ],
    )?;
    if affected == 0 {
        return Ok(None);
    }
    get_commission_by_event_id(conn, &input.event_id)
}

pub fn get_commission_by_event_id(conn: &Connection, event_id: &str) -> Result<Option<Commission>> {
    query_one(
        conn,
        &format!("SELECT {} FROM commissions WHERE event_id = ?1", COMMISSION_COLS),
        &[&event_id],
    )
}

pub fn get_commission_by_invoice_id(
    conn: &Connection,
    invoice_id: &str,
) -> Result<Option<Commission>> {
    query_one(
        conn,
        &format!("SELECT {} FROM commissions WHERE invoice_id = ?1", COMMISSION_COLS),
        &[&invoice_id],
    )
}

// ============ Webhooks ============

pub fn create_webhook(conn: &Connection, input: &CreateWebhook) -> Result<Webhook> {
    let id = EntityType::Webhook.gen_id();
    let ts = now();
    let triggers = serde_json::to_string(&input.triggers)?;
    conn.execute(
        "INSERT INTO webhooks (id, workspace_id, name, url, secret, triggers, disabled_at, consecutive_failures, last_failed_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 0, NULL, ?7, ?7)",
        params![id, input.workspace_id, input.name, input.url, input.secret, triggers, ts],
    )?;
    for link_id in &input.link_ids {
        conn.execute(
            "INSERT OR IGNORE INTO webhook_links (webhook_id, link_id) VALUES (?1, ?2)",
            params![id, link_id],
        )?;
    }
    recompute_webhook_enabled(conn, &input.workspace_id)?;
    get_webhook_by_id(conn, &id)?
        .ok_or_else(|| crate::error::AppError::Internal("webhook insert lost".into()))
}

pub fn get_webhook_by_id(conn: &Connection, id: &str) -> Result<Option<Webhook>> {
    query_one(
        conn,
        &format!("SELECT {} FROM webhooks WHERE id = ?1", WEBHOOK_COLS),
        &[&id],
    )
}

/// Active (non-disabled) webhooks in a workspace subscribed to `trigger`.
///
/// Trigger matching on the JSON triggers array happens in Rust; workspaces
/// have few webhooks so the filter cost is negligible.
pub fn list_active_webhooks_for_trigger(
    conn: &Connection,
    workspace_id: &str,
    trigger: &str,
) -> Result<Vec<Webhook>> {
    let all: Vec<Webhook> = query_all(
        conn,
        &format!(
            "SELECT {} FROM webhooks WHERE workspace_id = ?1 AND disabled_at IS NULL",
            WEBHOOK_COLS
        ),
        &[&workspace_id],
    )?;
    Ok(all.into_iter().filter(|w| w.has_trigger(trigger)).collect())
}

/// Links a webhook is scoped to. Empty = workspace-level.
pub fn get_webhook_link_ids(conn: &Connection, webhook_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT link_id FROM webhook_links WHERE webhook_id = ?1")?;
    let rows = stmt
        .query_map(params![webhook_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_webhook_links(conn: &Connection, webhook_id: &str, link_ids: &[String]) -> Result<()> {
    conn.execute(
        "DELETE FROM webhook_links WHERE webhook_id = ?1",
        params![webhook_id],
    )?;
    for link_id in link_ids {
        conn.execute(
            "INSERT OR IGNORE INTO webhook_links (webhook_id, link_id) VALUES (?1, ?2)",
            params![webhook_id, link_id],
        )?;
    }
    Ok(())
}

pub fn set_webhook_triggers(
    conn: &Connection,
    webhook_id: &str,
    triggers: &[String],
) -> Result<bool> {
    let json = serde_json::to_string(triggers)?;
    let affected = conn.execute(
        "UPDATE webhooks SET triggers = ?1, updated_at = ?2 WHERE id = ?3",
        params![json, now(), webhook_id],
    )?;
    Ok(affected > 0)
}

/// Atomically record a delivery failure, returning the new consecutive
/// failure count.
///
/// Returns None when the webhook is missing or already disabled - the
/// disabled state is terminal, so late failure reports must not keep
/// incrementing the counter.
pub fn record_webhook_failure(conn: &Connection, webhook_id: &str) -> Result<Option<i64>> {
    conn.query_row(
        "UPDATE webhooks
         SET consecutive_failures = consecutive_failures + 1, last_failed_at = ?1, updated_at = ?1
         WHERE id = ?2 AND disabled_at IS NULL
         RETURNING consecutive_failures",
        params![now(), webhook_id],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map_err(Into::into)
}

/// Reset the failure counter after a successful delivery.
pub fn reset_webhook_failures(conn: &Connection, webhook_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE webhooks
         SET consecutive_failures = 0, last_failed_at = NULL, updated_at = ?1
         WHERE id = ?2 AND disabled_at IS NULL AND consecutive_failures > 0",
        params![now(), webhook_id],
    )?;
    Ok(affected > 0)
}

/// Atomically disable a webhook, returning whether this call won the claim.
///
/// Compare-and-swap on disabled_at so concurrent failure reports produce
/// exactly one "disabled" notification.
pub fn try_disable_webhook(conn: &Connection, webhook_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE webhooks SET disabled_at = ?1, updated_at = ?1 WHERE id = ?2 AND disabled_at IS NULL",
        params![now(), webhook_id],
    )?;
    Ok(affected > 0)
}
