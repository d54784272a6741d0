//! Common webhook handling infrastructure for payment providers.
//!
//! A trait seam keeps provider-specific parsing and signature checks out of
//! the pipeline itself, so additional providers slot in without touching
//! attribution, rewards, or the ledger.

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
};

use crate::attribution::{self, SaleAttribution};
use crate::db::{queries, AppState};
use crate::dispatch;
use crate::error::AppError;
use crate::events::{NewLeadEvent, NewSaleEvent};
use crate::idempotency::SALE_EVENT_TTL;
use crate::ledger::{self, PendingCommission};
use crate::models::{
    CreateCustomer, Customer, Link, ProgramEnrollment, RewardEventType, TRIGGER_LEAD_CREATED,
    TRIGGER_SALE_CREATED,
};
use crate::rewards;

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

/// Helper to unwrap DB query results with consistent error handling.
fn db_lookup<T>(
    result: Result<Option<T>, AppError>,
    not_found_msg: &'static str,
) -> Result<T, WebhookResult> {
    match result {
        Ok(Some(v)) => Ok(v),
        Ok(None) => Err((StatusCode::OK, not_found_msg)),
        Err(e) => {
            tracing::error!("DB error: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"))
        }
    }
}

fn db_error(e: impl std::fmt::Display) -> WebhookResult {
    tracing::error!("DB error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

/// Data extracted from a completed checkout.
#[derive(Debug)]
pub struct SaleData {
    /// Provider-unique key for replay suppression (invoice ID when present,
    /// otherwise the checkout session ID).
    pub idempotency_key: String,
    /// Workspace-assigned customer ID, when the tracked site passed one.
    pub external_customer_id: Option<String>,
    /// Provider-side customer ID (cus_xxx).
    pub provider_customer_id: Option<String>,
    /// Connect account namespace for external IDs.
    pub connect_id: Option<String>,
    /// Charged amount in cents.
    pub amount: i64,
    pub currency: String,
    pub invoice_id: Option<String>,
    /// Provider event name recorded on the sale event ("Purchase", "Invoice paid").
    pub event_name: &'static str,
    /// Raw provider object for the sale event's metadata column.
    pub metadata: Option<String>,
}

/// Data extracted from a customer lifecycle event.
#[derive(Debug)]
pub struct CustomerData {
    pub provider_customer_id: String,
    pub external_id: Option<String>,
    pub connect_id: Option<String>,
    pub click_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Parsed webhook event with provider-agnostic data.
#[derive(Debug)]
pub enum WebhookEvent {
    /// A paid checkout or a paid recurring invoice - runs the sale pipeline
    Sale(SaleData),
    /// Customer created or updated - identity linking and lead recording
    CustomerUpserted(CustomerData),
    /// Event type the pipeline does not consume
    Unsupported,
}

/// Trait for payment provider webhook handling.
///
/// Implementors provide provider-specific parsing and signature verification;
/// the shared processing below runs attribution, rewards, and ledger writes.
pub trait WebhookProvider: Send + Sync {
    /// Provider name for logging and event storage (e.g., "stripe")
    fn provider_name(&self) -> &'static str;

    /// Extract signature from request headers.
    fn extract_signature(&self, headers: &HeaderMap) -> Result<String, WebhookResult>;

    /// Verify the payload signature against the configured endpoint secret.
    ///
    /// Fail closed: a missing secret must reject the request, never wave
    /// unverified payloads through.
    fn verify_signature(
        &self,
        secret: Option<&str>,
        body: &Bytes,
        signature: &str,
    ) -> Result<bool, WebhookResult>;

    /// Parse the webhook payload into a provider-agnostic event.
    fn parse_event(&self, body: &Bytes) -> Result<WebhookEvent, WebhookResult>;
}

/// Generic webhook handler that delegates to provider-specific implementations.
pub async fn handle_webhook<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let signature = match provider.extract_signature(&headers) {
        Ok(s) => s,
        Err(e) => return e,
    };

    // Verify before parsing - unauthenticated payloads get no parser time
    match provider.verify_signature(state.stripe_webhook_secret.as_deref(), &body, &signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::BAD_REQUEST, "Invalid signature"),
        Err(e) => return e,
    }

    let event = match provider.parse_event(&body) {
        Ok(e) => e,
        Err(e) => return e,
    };

    match event {
        WebhookEvent::Sale(data) => handle_sale(provider, state, data)
            .await
            .unwrap_or_else(|e| e),
        WebhookEvent::CustomerUpserted(data) => handle_customer(provider, state, data)
            .await
            .unwrap_or_else(|e| e),
        WebhookEvent::Unsupported => (StatusCode::OK, "Unsupported event, skipping..."),
    }
}

/// Look up the customer a sale belongs to, preferring the workspace-assigned
/// external ID. Read-only: when the provider-side ID is seen for the first
/// time the second element is true and the caller links it after the
/// idempotency claim, so the guard precedes every write.
fn resolve_sale_customer(
    conn: &rusqlite::Connection,
    data: &SaleData,
) -> Result<(Customer, bool), WebhookResult> {
    if let Some(external_id) = &data.external_customer_id {
        let found =
            queries::get_customer_by_external_id(conn, external_id, data.connect_id.as_deref())
                .map_err(db_error)?;
        if let Some(customer) = found {
            let learn_identity =
                customer.stripe_customer_id.is_none() && data.provider_customer_id.is_some();
            return Ok((customer, learn_identity));
        }
    }

    let provider_id = data
        .provider_customer_id
        .as_deref()
        .ok_or((StatusCode::OK, "No customer reference in event, skipping..."))?;
    db_lookup(
        queries::get_customer_by_stripe_id(conn, provider_id),
        "Customer not found, skipping...",
    )
    .map(|customer| (customer, false))
}

/// Load the commission terms for a partner-attributed link, if any.
fn resolve_commission(
    conn: &rusqlite::Connection,
    link: &Link,
    event: RewardEventType,
    sale_amount: i64,
) -> Result<Option<(PendingCommission, ProgramEnrollment)>, WebhookResult> {
    let (Some(program_id), Some(partner_id)) = (&link.program_id, &link.partner_id) else {
        return Ok(None);
    };

    let enrollment = match queries::get_enrollment(conn, program_id, partner_id) {
        Ok(Some(e)) => e,
        Ok(None) => {
            tracing::warn!(
                "Link {} names partner {} in program {} but no enrollment exists",
                link.id,
                partner_id,
                program_id
            );
            return Ok(None);
        }
        Err(e) => return Err(db_error(e)),
    };

    let program = queries::get_program_by_id(conn, program_id).map_err(db_error)?;
    let reward = match rewards::determine_reward(program.as_ref(), &enrollment, event) {
        Ok(Some(r)) => r,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::error!("Reward determination failed for link {}: {}", link.id, e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Reward determination failed"));
        }
    };

    let earnings = match event {
        RewardEventType::Sale => rewards::calculate_earnings(&reward, sale_amount),
        RewardEventType::Lead => rewards::calculate_lead_earnings(&reward),
    };

    Ok(Some((
        PendingCommission {
            program_id: program_id.clone(),
            partner_id: partner_id.clone(),
            earnings,
        },
        enrollment,
    )))
}

/// Run the sale pipeline: idempotency, attribution, rewards, ledger, fan-out.
async fn handle_sale<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    data: SaleData,
) -> Result<WebhookResult, WebhookResult> {
    if data.amount <= 0 {
        return Ok((StatusCode::OK, "Amount is zero, skipping..."));
    }

    let conn = state.db.get().map_err(db_error)?;
    let events_conn = state.events.get().map_err(db_error)?;

    // Customer resolution stays read-only here, so the benign skip paths
    // never claim a key a later retry still needs.
    let (customer, learn_identity) = resolve_sale_customer(&conn, &data)?;

    // Replay suppression BEFORE any mutation. A duplicate delivery observes
    // the claimed key and becomes a no-op. Keys are namespaced per provider
    // so two providers reporting the same invoice id cannot collide.
    let namespace = format!("{}:sale:invoice", provider.provider_name());
    match state
        .idempotency
        .acquire(&namespace, &data.idempotency_key, SALE_EVENT_TTL)
    {
        Ok(true) => {}
        Ok(false) => return Ok((StatusCode::OK, "Already processed")),
        Err(e) => return Err(db_error(e)),
    }

    // First processing of this sale: learn the provider-side customer ID
    if learn_identity {
        if let Some(provider_id) = &data.provider_customer_id {
            queries::update_customer_identity(&conn, &customer.id, Some(provider_id), None, None)
                .map_err(db_error)?;
        }
    }

    let lead = match attribution::resolve_sale(&events_conn, &customer.id).map_err(db_error)? {
        SaleAttribution::Attributed(lead) => lead,
        SaleAttribution::NotTracked => {
            return Ok((StatusCode::OK, "Customer has no lead event, skipping..."));
        }
    };

    let link = db_lookup(
        queries::get_link_by_id(&conn, &lead.link_id),
        "Attributed link not found, skipping...",
    )?;

    let commission =
        resolve_commission(&conn, &link, RewardEventType::Sale, data.amount)?;

    let sale = NewSaleEvent {
        event_name: data.event_name.to_string(),
        customer_id: customer.id.clone(),
        link_id: link.id.clone(),
        workspace_id: customer.workspace_id.clone(),
        amount: data.amount,
        currency: data.currency.clone(),
        invoice_id: data.invoice_id.clone(),
        payment_processor: provider.provider_name().to_string(),
        metadata: data.metadata.clone(),
    };

    let outcome = ledger::record_sale(
        &conn,
        &events_conn,
        &sale,
        commission.as_ref().map(|(pending, _)| pending),
    )
    .map_err(|e| {
        tracing::error!("Ledger write failed for sale {}: {}", data.idempotency_key, e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to record sale")
    })?;

    tracing::info!(
        "{} sale recorded: customer={}, link={}, amount={} {}, commission={:?}",
        provider.provider_name(),
        customer.id,
        link.id,
        data.amount,
        data.currency,
        outcome.commission.as_ref().map(|c| c.earnings),
    );

    dispatch::spawn_event_webhooks(
        state.clone(),
        customer.workspace_id.clone(),
        TRIGGER_SALE_CREATED,
        Some(link.id.clone()),
        serde_json::json!({
            "eventId": outcome.event.event_id,
            "customerId": customer.id,
            "linkId": link.id,
            "amount": data.amount,
            "currency": data.currency,
            "invoiceId": data.invoice_id,
            "paymentProcessor": provider.provider_name(),
        }),
    );

    if let (Some(created), Some((_, enrollment))) = (&outcome.commission, &commission) {
        if let Some(partner_email) = &enrollment.partner_email {
            let program_name = queries::get_program_by_id(&conn, &enrollment.program_id)
                .ok()
                .flatten()
                .map(|p| p.name)
                .unwrap_or_else(|| "your program".to_string());
            dispatch::spawn_partner_notification(
                state.clone(),
                partner_email.clone(),
                program_name,
                created.amount,
                created.earnings,
                created.currency.clone(),
            );
        }
    }

    Ok((StatusCode::OK, "OK"))
}

/// Handle a customer lifecycle event: update identity in place for a known
/// customer, or create a new customer from click attribution and record the
/// lead.
async fn handle_customer<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    data: CustomerData,
) -> Result<WebhookResult, WebhookResult> {
    let conn = state.db.get().map_err(db_error)?;
    let events_conn = state.events.get().map_err(db_error)?;

    // Known by workspace-assigned ID? Link provider identity in place. This
    // also absorbs the out-of-order case where checkout arrived first and
    // created the row.
    if let Some(external_id) = &data.external_id {
        let found =
            queries::get_customer_by_external_id(&conn, external_id, data.connect_id.as_deref())
                .map_err(db_error)?;
        if let Some(customer) = found {
            queries::update_customer_identity(
                &conn,
                &customer.id,
                Some(&data.provider_customer_id),
                data.name.as_deref(),
                data.email.as_deref(),
            )
            .map_err(db_error)?;
            return Ok((StatusCode::OK, "Customer updated"));
        }
    }

    // Known by provider ID already? Nothing to attribute.
    if queries::get_customer_by_stripe_id(&conn, &data.provider_customer_id)
        .map_err(db_error)?
        .is_some()
    {
        return Ok((StatusCode::OK, "Customer already linked"));
    }

    // New customer: attribution requires a click ID from the tracking script.
    let Some(click_id) = &data.click_id else {
        return Ok((StatusCode::OK, "No click ID in event, skipping..."));
    };

    let Some(click) = attribution::resolve_click(&events_conn, click_id).map_err(db_error)? else {
        // No partial customer row without a resolvable click
        return Ok((StatusCode::OK, "Click not found, skipping..."));
    };

    let customer = queries::create_customer(
        &conn,
        &CreateCustomer {
            workspace_id: click.workspace_id.clone(),
            external_id: data.external_id.clone(),
            project_connect_id: data.connect_id.clone(),
            stripe_customer_id: Some(data.provider_customer_id.clone()),
            name: data.name.clone(),
            email: data.email.clone(),
            link_id: Some(click.link_id.clone()),
            click_id: Some(click.event_id.clone()),
            country: click.country.clone(),
        },
    )
    .map_err(db_error)?;

    let link = db_lookup(
        queries::get_link_by_id(&conn, &click.link_id),
        "Clicked link not found, skipping...",
    )?;

    let commission = resolve_commission(&conn, &link, RewardEventType::Lead, 0)?;

    let lead = NewLeadEvent {
        event_name: "Sign up".to_string(),
        customer_id: customer.id.clone(),
        link_id: link.id.clone(),
        workspace_id: click.workspace_id.clone(),
        click_id: Some(click.event_id.clone()),
    };

    let outcome = ledger::record_lead(
        &conn,
        &events_conn,
        &lead,
        commission.as_ref().map(|(pending, _)| pending),
    )
    .map_err(|e| {
        tracing::error!("Ledger write failed for lead {}: {}", customer.id, e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to record lead")
    })?;

    tracing::info!(
        "{} lead recorded: customer={}, link={}, click={}",
        provider.provider_name(),
        customer.id,
        link.id,
        click.event_id
    );

    dispatch::spawn_event_webhooks(
        state.clone(),
        click.workspace_id.clone(),
        TRIGGER_LEAD_CREATED,
        Some(link.id.clone()),
        serde_json::json!({
            "eventId": outcome.event.event_id,
            "customerId": customer.id,
            "linkId": link.id,
            "clickId": click.event_id,
        }),
    );

    Ok((StatusCode::OK, "Customer created"))
}
