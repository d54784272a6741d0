//! Test utilities and fixtures for linktally integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::HeaderMap;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub use linktally::cache::WebhookCache;
pub use linktally::db::{init_db, init_events_db, queries, AppState, DbPool};
pub use linktally::email::EmailService;
pub use linktally::events;
pub use linktally::handlers::webhooks::common::handle_webhook;
pub use linktally::handlers::webhooks::stripe::StripeWebhookProvider;
pub use linktally::idempotency::IdempotencyGuard;
pub use linktally::models::*;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Create an in-memory events database with schema initialized
pub fn setup_test_events_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory events database");
    init_events_db(&conn).expect("Failed to initialize events schema");
    conn
}

/// Pool over a unique temp file. Pooled in-memory connections would each see
/// their own empty database, so file-backed pools are required whenever state
/// must be visible across `pool.get()` calls.
fn temp_file_pool(tag: &str) -> DbPool {
    let path = std::env::temp_dir().join(format!(
        "lt_test_{}_{}.db",
        tag,
        uuid::Uuid::new_v4().simple()
    ));
    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.busy_timeout(std::time::Duration::from_secs(5)));
    Pool::builder().max_size(4).build(manager).unwrap()
}

/// Create an AppState for testing with temp-file databases and a log-only
/// email service.
pub fn create_test_app_state() -> AppState {
    let db_pool = temp_file_pool("main");
    {
        let conn = db_pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    let events_pool = temp_file_pool("events");
    {
        let conn = events_pool.get().unwrap();
        init_events_db(&conn).unwrap();
    }

    let http_client = reqwest::Client::new();

    AppState {
        db: db_pool.clone(),
        events: events_pool,
        webhook_cache: Arc::new(WebhookCache::new()),
        http_client: http_client.clone(),
        idempotency: IdempotencyGuard::new(db_pool),
        email: EmailService::new(
            http_client,
            None,
            "test@linktally.local",
            "http://localhost:3000",
        ),
        stripe_webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
    }
}

pub fn create_test_workspace(conn: &Connection, name: &str) -> Workspace {
    queries::create_workspace(
        conn,
        &CreateWorkspace {
            name: name.to_string(),
            plan: "pro".to_string(),
            notify_email: None,
        },
    )
    .expect("Failed to create test workspace")
}

pub fn create_test_program(
    conn: &Connection,
    workspace_id: &str,
    reward_type: RewardType,
    reward_amount: i64,
    reward_event: RewardEventType,
) -> Program {
    queries::create_program(
        conn,
        workspace_id,
        "Test Program",
        reward_type,
        reward_amount,
        reward_event,
    )
    .expect("Failed to create test program")
}

pub fn create_test_link(
    conn: &Connection,
    workspace_id: &str,
    key: &str,
    program_id: Option<&str>,
    partner_id: Option<&str>,
) -> Link {
    queries::create_link(
        conn,
        &CreateLink {
            workspace_id: workspace_id.to_string(),
            domain: "lt.test".to_string(),
            key: key.to_string(),
            url: "https://example.com".to_string(),
            program_id: program_id.map(String::from),
            partner_id: partner_id.map(String::from),
        },
    )
    .expect("Failed to create test link")
}

pub fn create_test_enrollment(
    conn: &Connection,
    program_id: &str,
    partner_id: &str,
    link_id: &str,
    commission_amount: Option<i64>,
) -> ProgramEnrollment {
    queries::create_enrollment(
        conn,
        &CreateEnrollment {
            program_id: program_id.to_string(),
            partner_id: partner_id.to_string(),
            link_id: link_id.to_string(),
            partner_email: None,
            commission_amount,
        },
    )
    .expect("Failed to create test enrollment")
}

pub fn create_test_webhook(
    conn: &Connection,
    workspace_id: &str,
    triggers: &[&str],
    link_ids: &[&str],
) -> Webhook {
    queries::create_webhook(
        conn,
        &CreateWebhook {
            workspace_id: workspace_id.to_string(),
            name: "Test Receiver".to_string(),
            url: "http://127.0.0.1:1/receive".to_string(),
            secret: "whsec_outbound".to_string(),
            triggers: triggers.iter().map(|s| s.to_string()).collect(),
            link_ids: link_ids.iter().map(|s| s.to_string()).collect(),
        },
    )
    .expect("Failed to create test webhook")
}

/// A customer with an already-recorded lead event, ready for sale attribution.
pub fn create_attributed_customer(
    state: &AppState,
    workspace_id: &str,
    link_id: &str,
    external_id: &str,
) -> Customer {
    let conn = state.db.get().unwrap();
    let customer = queries::create_customer(
        &conn,
        &CreateCustomer {
            workspace_id: workspace_id.to_string(),
            external_id: Some(external_id.to_string()),
            project_connect_id: None,
            stripe_customer_id: None,
            name: None,
            email: None,
            link_id: Some(link_id.to_string()),
            click_id: None,
            country: None,
        },
    )
    .expect("Failed to create test customer");

    let events_conn = state.events.get().unwrap();
    events::append_lead(
        &events_conn,
        &events::NewLeadEvent {
            event_name: "Sign up".to_string(),
            customer_id: customer.id.clone(),
            link_id: link_id.to_string(),
            workspace_id: workspace_id.to_string(),
            click_id: None,
        },
    )
    .expect("Failed to record test lead");

    customer
}

/// Compute a valid Stripe signature header for `payload`.
pub fn stripe_signature(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("t={},v1={}", timestamp, signature)
}

/// Deliver a signed Stripe payload straight into the webhook handler.
pub async fn deliver_stripe_event(
    state: &AppState,
    payload: &serde_json::Value,
) -> (axum::http::StatusCode, &'static str) {
    let body = serde_json::to_vec(payload).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(
        "stripe-signature",
        stripe_signature(&body, TEST_WEBHOOK_SECRET).parse().unwrap(),
    );
    handle_webhook(&StripeWebhookProvider, state, headers, Bytes::from(body)).await
}
