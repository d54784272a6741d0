mod schema;
pub mod from_row;
pub mod queries;

pub use schema::{init_db, init_events_db};

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::cache::WebhookCache;
use crate::email::EmailService;
use crate::idempotency::IdempotencyGuard;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state holding database pools and shared collaborators.
#[derive(Clone)]
pub struct AppState {
    /// Main database pool (workspaces, links, customers, commissions, webhooks)
    pub db: DbPool,
    /// Time-series events pool (click/lead/sale events; separate file to
    /// isolate append-only growth)
    pub events: DbPool,
    /// Write-through cache of webhook rows (performance only; the relational
    /// store stays the source of truth)
    pub webhook_cache: Arc<WebhookCache>,
    /// Shared HTTP client for outbound webhook delivery
    pub http_client: reqwest::Client,
    /// Idempotency guard over the main pool (replay suppression for
    /// payment events)
    pub idempotency: IdempotencyGuard,
    /// Operator and partner notification emails
    pub email: EmailService,
    /// Shared secret for verifying inbound Stripe webhook signatures
    pub stripe_webhook_secret: Option<String>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    // Concurrent writers wait out the lock instead of surfacing SQLITE_BUSY
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| conn.busy_timeout(std::time::Duration::from_secs(5)));
    Pool::builder().max_size(10).build(manager)
}
