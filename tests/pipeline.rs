//! End-to-end pipeline tests: inbound payment event through idempotency,
//! attribution, rewards, and ledger writes.

mod common;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use common::*;
use linktally::handlers::webhooks::common::{WebhookEvent, WebhookProvider, WebhookResult};
use linktally::idempotency::SALE_EVENT_TTL;
use serde_json::json;

fn checkout_payload(
    session_id: &str,
    external_customer_id: &str,
    amount: i64,
    invoice: Option<&str>,
) -> serde_json::Value {
    json!({
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "payment_status": "paid",
            "customer": "cus_stripe_1",
            "currency": "usd",
            "amount_total": amount,
            "invoice": invoice,
            "metadata": { "linktally_customer_id": external_customer_id }
        }}
    })
}

#[tokio::test]
async fn test_attributed_sale_creates_commission_and_counters() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let program = create_test_program(&conn, &ws.id, RewardType::Percentage, 20, RewardEventType::Sale);
    let link = create_test_link(&conn, &ws.id, "promo", Some(&program.id), Some("pn_1"));
    create_test_enrollment(&conn, &program.id, "pn_1", &link.id, None);
    let customer = create_attributed_customer(&state, &ws.id, &link.id, "user_1");

    let payload = checkout_payload("cs_1", "user_1", 5000, Some("inv_1"));
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "OK"));

    // 20% of 5000 = 1000 cents commission
    let commission = queries::get_commission_by_invoice_id(&conn, "inv_1")
        .unwrap()
        .expect("commission should exist");
    assert_eq!(commission.amount, 5000);
    assert_eq!(commission.earnings, 1000);
    assert_eq!(commission.partner_id, "pn_1");
    assert_eq!(commission.customer_id, customer.id);

    // Aggregates moved exactly once
    let link = queries::get_link_by_id(&conn, &link.id).unwrap().unwrap();
    assert_eq!(link.sales, 1);
    assert_eq!(link.sale_amount, 5000);

    let ws = queries::get_workspace_by_id(&conn, &ws.id).unwrap().unwrap();
    assert_eq!(ws.usage, 1);
    assert_eq!(ws.sales_usage, 5000);

    // Provider-side identity learned from the checkout
    let customer = queries::get_customer_by_id(&conn, &customer.id).unwrap().unwrap();
    assert_eq!(customer.stripe_customer_id.as_deref(), Some("cus_stripe_1"));

    // Exactly one sale event persisted
    let events_conn = state.events.get().unwrap();
    assert_eq!(
        events::count_sales_for_customer(&events_conn, &customer.id).unwrap(),
        1
    );
}

#[tokio::test]
async fn test_duplicate_delivery_is_a_noop() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let program = create_test_program(&conn, &ws.id, RewardType::Percentage, 20, RewardEventType::Sale);
    let link = create_test_link(&conn, &ws.id, "promo", Some(&program.id), Some("pn_1"));
    create_test_enrollment(&conn, &program.id, "pn_1", &link.id, None);
    let customer = create_attributed_customer(&state, &ws.id, &link.id, "user_1");

    let payload = checkout_payload("cs_1", "user_1", 5000, Some("inv_1"));

    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "OK"));
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "Already processed"));

    let link = queries::get_link_by_id(&conn, &link.id).unwrap().unwrap();
    assert_eq!(link.sales, 1);
    assert_eq!(link.sale_amount, 5000);

    let events_conn = state.events.get().unwrap();
    assert_eq!(
        events::count_sales_for_customer(&events_conn, &customer.id).unwrap(),
        1
    );
}

#[tokio::test]
async fn test_concurrent_duplicate_deliveries_record_once() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let link = create_test_link(&conn, &ws.id, "promo", None, None);
    let customer = create_attributed_customer(&state, &ws.id, &link.id, "user_1");
    drop(conn);

    // Provider retries can race a still-in-flight delivery; exactly one of
    // the two may proceed past the guard.
    let payload = checkout_payload("cs_race", "user_1", 5000, Some("inv_race"));
    let mut deliveries = Vec::new();
    for _ in 0..2 {
        let state = state.clone();
        let payload = payload.clone();
        deliveries.push(tokio::spawn(
            async move { deliver_stripe_event(&state, &payload).await },
        ));
    }

    let mut outcomes = Vec::new();
    for task in deliveries {
        outcomes.push(task.await.unwrap());
    }

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == (StatusCode::OK, "OK"))
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == (StatusCode::OK, "Already processed"))
            .count(),
        1
    );

    let events_conn = state.events.get().unwrap();
    assert_eq!(
        events::count_sales_for_customer(&events_conn, &customer.id).unwrap(),
        1
    );
}

#[tokio::test]
async fn test_checkout_retry_after_late_customer_creation() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let link = create_test_link(&conn, &ws.id, "promo", None, None);
    drop(conn);

    // Checkout arrives before the customer exists: a benign skip that must
    // not claim the idempotency key, or the eventual retry is lost
    let payload = checkout_payload("cs_early", "user_late", 5000, Some("inv_late"));
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "Customer not found, skipping..."));

    let customer = create_attributed_customer(&state, &ws.id, &link.id, "user_late");

    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "OK"));

    let events_conn = state.events.get().unwrap();
    assert_eq!(
        events::count_sales_for_customer(&events_conn, &customer.id).unwrap(),
        1
    );
}

#[tokio::test]
async fn test_claimed_key_short_circuits_before_identity_link() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let link = create_test_link(&conn, &ws.id, "promo", None, None);
    let customer = create_attributed_customer(&state, &ws.id, &link.id, "user_1");
    assert!(customer.stripe_customer_id.is_none());

    // Key already held (an earlier delivery claimed it)
    assert!(state
        .idempotency
        .acquire("stripe:sale:invoice", "inv_held", SALE_EVENT_TTL)
        .unwrap());

    let payload = checkout_payload("cs_dup", "user_1", 5000, Some("inv_held"));
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "Already processed"));

    // The duplicate stopped at the guard, before the identity-link write
    let customer = queries::get_customer_by_id(&conn, &customer.id).unwrap().unwrap();
    assert!(customer.stripe_customer_id.is_none());
}

#[tokio::test]
async fn test_zero_amount_checkout_skipped() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let link = create_test_link(&conn, &ws.id, "promo", None, None);
    let customer = create_attributed_customer(&state, &ws.id, &link.id, "user_1");

    let payload = checkout_payload("cs_free", "user_1", 0, None);
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "Amount is zero, skipping..."));

    let link = queries::get_link_by_id(&conn, &link.id).unwrap().unwrap();
    assert_eq!(link.sales, 0);

    let events_conn = state.events.get().unwrap();
    assert_eq!(
        events::count_sales_for_customer(&events_conn, &customer.id).unwrap(),
        0
    );

    // Nothing was claimed - a later non-zero retry of the same session would
    // still process
    let payload = checkout_payload("cs_free", "user_1", 2500, None);
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "OK"));
}

#[tokio::test]
async fn test_flat_reward_capped_at_sale_amount() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let program = create_test_program(&conn, &ws.id, RewardType::Flat, 800, RewardEventType::Sale);
    let link = create_test_link(&conn, &ws.id, "promo", Some(&program.id), Some("pn_1"));
    create_test_enrollment(&conn, &program.id, "pn_1", &link.id, None);
    create_attributed_customer(&state, &ws.id, &link.id, "user_1");

    // Sale smaller than the flat reward: earnings are capped
    let payload = checkout_payload("cs_small", "user_1", 500, Some("inv_small"));
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "OK"));

    let commission = queries::get_commission_by_invoice_id(&conn, "inv_small")
        .unwrap()
        .unwrap();
    assert_eq!(commission.earnings, 500);
}

#[tokio::test]
async fn test_sale_without_lead_not_attributed() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let link = create_test_link(&conn, &ws.id, "promo", None, None);

    // Customer exists but has no lead event in the time-series store
    let customer = queries::create_customer(
        &conn,
        &CreateCustomer {
            workspace_id: ws.id.clone(),
            external_id: Some("user_untracked".to_string()),
            project_connect_id: None,
            stripe_customer_id: None,
            name: None,
            email: None,
            link_id: Some(link.id.clone()),
            click_id: None,
            country: None,
        },
    )
    .unwrap();

    let payload = checkout_payload("cs_x", "user_untracked", 5000, None);
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!(
        (status, msg),
        (StatusCode::OK, "Customer has no lead event, skipping...")
    );

    let events_conn = state.events.get().unwrap();
    assert_eq!(
        events::count_sales_for_customer(&events_conn, &customer.id).unwrap(),
        0
    );
}

#[tokio::test]
async fn test_sale_on_unattributed_link_records_without_commission() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    // No program, no partner on the link
    let link = create_test_link(&conn, &ws.id, "plain", None, None);
    create_attributed_customer(&state, &ws.id, &link.id, "user_1");

    let payload = checkout_payload("cs_1", "user_1", 4200, Some("inv_plain"));
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "OK"));

    let link = queries::get_link_by_id(&conn, &link.id).unwrap().unwrap();
    assert_eq!(link.sales, 1);
    assert_eq!(link.sale_amount, 4200);

    assert!(queries::get_commission_by_invoice_id(&conn, "inv_plain")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unknown_customer_skipped() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();
    create_test_workspace(&conn, "Acme");

    let payload = checkout_payload("cs_1", "nobody", 5000, None);
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "Customer not found, skipping..."));
}

// ============ Customer lifecycle (lead recording) ============

fn customer_payload(
    event_type: &str,
    stripe_id: &str,
    external_id: Option<&str>,
    click_id: Option<&str>,
) -> serde_json::Value {
    json!({
        "type": event_type,
        "data": { "object": {
            "id": stripe_id,
            "name": "Jo Tester",
            "email": "jo@example.com",
            "metadata": {
                "linktally_customer_id": external_id,
                "linktally_click_id": click_id
            }
        }}
    })
}

#[tokio::test]
async fn test_customer_created_from_click_records_lead() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();
    let events_conn = state.events.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let program = create_test_program(&conn, &ws.id, RewardType::Flat, 200, RewardEventType::Lead);
    let link = create_test_link(&conn, &ws.id, "promo", Some(&program.id), Some("pn_1"));
    create_test_enrollment(&conn, &program.id, "pn_1", &link.id, None);

    let click = events::record_click(&events_conn, &link.id, &ws.id, None, Some("DE")).unwrap();

    let payload = customer_payload(
        "customer.created",
        "cus_new",
        Some("user_9"),
        Some(&click.event_id),
    );
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "Customer created"));

    let customer = queries::get_customer_by_stripe_id(&conn, "cus_new")
        .unwrap()
        .expect("customer should exist");
    assert_eq!(customer.link_id.as_deref(), Some(link.id.as_str()));
    assert_eq!(customer.click_id.as_deref(), Some(click.event_id.as_str()));
    assert_eq!(customer.country.as_deref(), Some("DE"));

    let link = queries::get_link_by_id(&conn, &link.id).unwrap().unwrap();
    assert_eq!(link.leads, 1);

    // Lead-rewarding flat program earns in full
    let lead = events::get_lead_by_customer(&events_conn, &customer.id)
        .unwrap()
        .expect("lead event should exist");
    let commission = queries::get_commission_by_event_id(&conn, &lead.event_id)
        .unwrap()
        .expect("lead commission should exist");
    assert_eq!(commission.earnings, 200);
}

#[tokio::test]
async fn test_customer_created_with_unknown_click_skipped() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();
    create_test_workspace(&conn, "Acme");

    let payload = customer_payload(
        "customer.created",
        "cus_new",
        Some("user_9"),
        Some("lt_evt_does_not_exist"),
    );
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "Click not found, skipping..."));

    // No partial customer row
    assert!(queries::get_customer_by_stripe_id(&conn, "cus_new")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_customer_created_without_click_skipped() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();
    create_test_workspace(&conn, "Acme");

    let payload = customer_payload("customer.created", "cus_new", Some("user_9"), None);
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "No click ID in event, skipping..."));
}

#[tokio::test]
async fn test_customer_updated_links_identity_in_place() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let link = create_test_link(&conn, &ws.id, "promo", None, None);
    let customer = create_attributed_customer(&state, &ws.id, &link.id, "user_1");
    assert!(customer.stripe_customer_id.is_none());

    let payload = customer_payload("customer.updated", "cus_late", Some("user_1"), None);
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "Customer updated"));

    let customer = queries::get_customer_by_id(&conn, &customer.id).unwrap().unwrap();
    assert_eq!(customer.stripe_customer_id.as_deref(), Some("cus_late"));
    assert_eq!(customer.name.as_deref(), Some("Jo Tester"));
    assert_eq!(customer.email.as_deref(), Some("jo@example.com"));
    // Attribution fields untouched
    assert_eq!(customer.link_id.as_deref(), Some(link.id.as_str()));
}

// ============ invoice.paid (recurring revenue) ============

fn invoice_payload(invoice_id: &str, billing_reason: &str, amount: i64) -> serde_json::Value {
    json!({
        "type": "invoice.paid",
        "data": { "object": {
            "id": invoice_id,
            "customer": "cus_stripe_1",
            "status": "paid",
            "billing_reason": billing_reason,
            "currency": "usd",
            "amount_paid": amount
        }}
    })
}

#[tokio::test]
async fn test_recurring_invoice_records_sale() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let program = create_test_program(&conn, &ws.id, RewardType::Percentage, 10, RewardEventType::Sale);
    let link = create_test_link(&conn, &ws.id, "promo", Some(&program.id), Some("pn_1"));
    create_test_enrollment(&conn, &program.id, "pn_1", &link.id, None);
    let customer = create_attributed_customer(&state, &ws.id, &link.id, "user_1");
    queries::update_customer_identity(&conn, &customer.id, Some("cus_stripe_1"), None, None)
        .unwrap();

    let payload = invoice_payload("inv_cycle_1", "subscription_cycle", 3000);
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "OK"));

    let commission = queries::get_commission_by_invoice_id(&conn, "inv_cycle_1")
        .unwrap()
        .unwrap();
    assert_eq!(commission.amount, 3000);
    assert_eq!(commission.earnings, 300);

    // Replay of the same invoice is suppressed
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "Already processed"));
}

#[tokio::test]
async fn test_initial_invoice_deferred_to_checkout() {
    let state = create_test_app_state();
    let payload = invoice_payload("inv_first", "subscription_create", 3000);

    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!(
        (status, msg),
        (StatusCode::OK, "Initial invoice handled by checkout")
    );
}

/// A second provider that reuses the Stripe wire format but reports under its
/// own name, exercising the provider seam without a second parser.
struct AltPayProvider;

impl WebhookProvider for AltPayProvider {
    fn provider_name(&self) -> &'static str {
        "altpay"
    }

    fn extract_signature(&self, headers: &HeaderMap) -> Result<String, WebhookResult> {
        StripeWebhookProvider.extract_signature(headers)
    }

    fn verify_signature(
        &self,
        secret: Option<&str>,
        body: &Bytes,
        signature: &str,
    ) -> Result<bool, WebhookResult> {
        StripeWebhookProvider.verify_signature(secret, body, signature)
    }

    fn parse_event(&self, body: &Bytes) -> Result<WebhookEvent, WebhookResult> {
        StripeWebhookProvider.parse_event(body)
    }
}

#[tokio::test]
async fn test_sale_keys_namespaced_per_provider() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let link = create_test_link(&conn, &ws.id, "promo", None, None);
    let customer = create_attributed_customer(&state, &ws.id, &link.id, "user_1");
    queries::update_customer_identity(&conn, &customer.id, Some("cus_stripe_1"), None, None)
        .unwrap();
    drop(conn);

    let payload = invoice_payload("inv_multi", "subscription_cycle", 3000);
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "OK"));

    // The same invoice id from a different provider is a different sale, not
    // a replay - the key namespace carries the provider name
    let body = serde_json::to_vec(&payload).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(
        "stripe-signature",
        stripe_signature(&body, TEST_WEBHOOK_SECRET).parse().unwrap(),
    );
    let (status, msg) =
        handle_webhook(&AltPayProvider, &state, headers, Bytes::from(body)).await;
    assert_eq!((status, msg), (StatusCode::OK, "OK"));

    let events_conn = state.events.get().unwrap();
    assert_eq!(
        events::count_sales_for_customer(&events_conn, &customer.id).unwrap(),
        2
    );
}

#[tokio::test]
async fn test_checkout_and_invoice_share_idempotency_key() {
    let state = create_test_app_state();
    let conn = state.db.get().unwrap();

    let ws = create_test_workspace(&conn, "Acme");
    let program = create_test_program(&conn, &ws.id, RewardType::Percentage, 20, RewardEventType::Sale);
    let link = create_test_link(&conn, &ws.id, "promo", Some(&program.id), Some("pn_1"));
    create_test_enrollment(&conn, &program.id, "pn_1", &link.id, None);
    let customer = create_attributed_customer(&state, &ws.id, &link.id, "user_1");
    queries::update_customer_identity(&conn, &customer.id, Some("cus_stripe_1"), None, None)
        .unwrap();

    // Checkout for a subscription carries the backing invoice id
    let payload = checkout_payload("cs_sub", "user_1", 5000, Some("inv_shared"));
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "OK"));

    // A (mislabeled) cycle delivery of the same invoice cannot double-record
    let payload = invoice_payload("inv_shared", "subscription_cycle", 5000);
    let (status, msg) = deliver_stripe_event(&state, &payload).await;
    assert_eq!((status, msg), (StatusCode::OK, "Already processed"));

    let events_conn = state.events.get().unwrap();
    assert_eq!(
        events::count_sales_for_customer(&events_conn, &customer.id).unwrap(),
        1
    );
}
