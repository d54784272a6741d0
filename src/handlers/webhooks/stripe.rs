use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::db::AppState;
use crate::payments::{
    StripeCheckoutSession, StripeCustomer, StripeInvoice, StripeWebhookEvent,
    StripeWebhookVerifier,
};

use super::common::{
    handle_webhook, CustomerData, SaleData, WebhookEvent, WebhookProvider, WebhookResult,
};

/// Stripe webhook provider implementation.
pub struct StripeWebhookProvider;

impl WebhookProvider for StripeWebhookProvider {
    fn provider_name(&self) -> &'static str {
        "stripe"
    }

    fn extract_signature(&self, headers: &HeaderMap) -> Result<String, WebhookResult> {
        headers
            .get("stripe-signature")
            .ok_or((StatusCode::BAD_REQUEST, "Missing stripe-signature header"))?
            .to_str()
            .map(|s| s.to_string())
            .map_err(|e| {
                tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid signature header")
            })
    }

    fn verify_signature(
        &self,
        secret: Option<&str>,
        body: &Bytes,
        signature: &str,
    ) -> Result<bool, WebhookResult> {
        // Fail closed: without a configured secret no payload can be trusted
        let Some(secret) = secret else {
            tracing::error!("Stripe webhook received but no webhook secret is configured");
            return Err((StatusCode::BAD_REQUEST, "Webhook secret not configured"));
        };

        StripeWebhookVerifier::new(secret)
            .verify_webhook_signature(body, signature)
            .map_err(|e| {
                tracing::debug!("Signature verification error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid signature")
            })
    }

    fn parse_event(&self, body: &Bytes) -> Result<WebhookEvent, WebhookResult> {
        let event: StripeWebhookEvent = serde_json::from_slice(body).map_err(|e| {
            tracing::error!("Failed to parse Stripe webhook: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid JSON")
        })?;

        match event.event_type.as_str() {
            "checkout.session.completed" => parse_checkout_completed(&event),
            "invoice.paid" => parse_invoice_paid(&event),
            "customer.created" | "customer.updated" => parse_customer_event(&event),
            _ => Ok(WebhookEvent::Unsupported),
        }
    }
}

fn parse_checkout_completed(event: &StripeWebhookEvent) -> Result<WebhookEvent, WebhookResult> {
    let session: StripeCheckoutSession = serde_json::from_value(event.data.object.clone())
        .map_err(|e| {
            tracing::error!("Failed to parse checkout session: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid checkout session")
        })?;

    if session.payment_status != "paid" {
        return Ok(WebhookEvent::Unsupported);
    }

    let external_customer_id = session.external_customer_id();
    let currency = session
        .currency
        .clone()
        .unwrap_or_else(|| "usd".to_string())
        .to_lowercase();

    // Subscription checkouts have a backing invoice - that ID is the stable
    // replay key. One-off payments fall back to the session ID.
    let idempotency_key = session.invoice.clone().unwrap_or_else(|| session.id.clone());

    Ok(WebhookEvent::Sale(SaleData {
        idempotency_key,
        external_customer_id,
        provider_customer_id: session.customer.clone(),
        connect_id: event.account.clone(),
        amount: session.amount_total.unwrap_or(0),
        currency,
        invoice_id: session.invoice.clone(),
        event_name: "Purchase",
        metadata: Some(event.data.object.to_string()),
    }))
}

fn parse_invoice_paid(event: &StripeWebhookEvent) -> Result<WebhookEvent, WebhookResult> {
    let invoice: StripeInvoice = serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!("Failed to parse invoice: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid invoice")
    })?;

    if invoice.status != "paid" {
        return Ok(WebhookEvent::Unsupported);
    }

    // The initial subscription invoice arrives alongside the checkout event;
    // the checkout path records that sale (keyed by the same invoice ID, so
    // ordering between the two deliveries does not matter).
    if invoice.billing_reason.as_deref() == Some("subscription_create") {
        return Err((StatusCode::OK, "Initial invoice handled by checkout"));
    }

    let currency = invoice
        .currency
        .clone()
        .unwrap_or_else(|| "usd".to_string())
        .to_lowercase();

    Ok(WebhookEvent::Sale(SaleData {
        idempotency_key: invoice.id.clone(),
        external_customer_id: None,
        provider_customer_id: invoice.customer.clone(),
        connect_id: event.account.clone(),
        amount: invoice.amount_paid.unwrap_or(0),
        currency,
        invoice_id: Some(invoice.id.clone()),
        event_name: "Invoice paid",
        metadata: Some(event.data.object.to_string()),
    }))
}

fn parse_customer_event(event: &StripeWebhookEvent) -> Result<WebhookEvent, WebhookResult> {
    let customer: StripeCustomer =
        serde_json::from_value(event.data.object.clone()).map_err(|e| {
            tracing::error!("Failed to parse customer: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid customer")
        })?;

    Ok(WebhookEvent::CustomerUpserted(CustomerData {
        provider_customer_id: customer.id.clone(),
        external_id: customer.metadata.linktally_customer_id.clone(),
        connect_id: event.account.clone(),
        click_id: customer.metadata.linktally_click_id.clone(),
        name: customer.name.clone(),
        email: customer.email.clone(),
    }))
}

/// Axum handler for Stripe webhooks.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    handle_webhook(&StripeWebhookProvider, &state, headers, body).await
}
