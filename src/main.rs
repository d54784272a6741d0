use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linktally::cache::WebhookCache;
use linktally::config::Config;
use linktally::db::{create_pool, init_db, init_events_db, queries, AppState};
use linktally::email::EmailService;
use linktally::events;
use linktally::handlers;
use linktally::idempotency::IdempotencyGuard;
use linktally::models::{
    CreateEnrollment, CreateLink, CreateWebhook, CreateWorkspace, RewardEventType, RewardType,
    TRIGGER_LEAD_CREATED, TRIGGER_SALE_CREATED,
};

#[derive(Parser, Debug)]
#[command(name = "linktally")]
#[command(about = "Link attribution and commission pipeline for payment events")]
struct Cli {
    /// Seed the database with dev data (workspace, link, program, enrollment, webhook)
    #[arg(long)]
    seed: bool,

    /// Delete databases on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data for testing webhook flows end to end.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");
    let events_conn = state
        .events
        .get()
        .expect("Failed to get events db connection for seeding");

    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM workspaces", [], |row| row.get(0))
        .expect("Failed to count workspaces");
    if existing > 0 {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let workspace = queries::create_workspace(
        &conn,
        &CreateWorkspace {
            name: "Dev Workspace".to_string(),
            plan: "pro".to_string(),
            notify_email: Some("dev@linktally.local".to_string()),
        },
    )
    .expect("Failed to create dev workspace");
    tracing::info!("Workspace: {} (id: {})", workspace.name, workspace.id);

    let program = queries::create_program(
        &conn,
        &workspace.id,
        "Dev Affiliates",
        RewardType::Percentage,
        20,
        RewardEventType::Sale,
    )
    .expect("Failed to create dev program");
    tracing::info!("Program: {} (20% of sales, id: {})", program.name, program.id);

    let link = queries::create_link(
        &conn,
        &CreateLink {
            workspace_id: workspace.id.clone(),
            domain: "lt.local".to_string(),
            key: "dev".to_string(),
            url: "https://example.com".to_string(),
            program_id: Some(program.id.clone()),
            partner_id: Some("pn_dev".to_string()),
        },
    )
    .expect("Failed to create dev link");
    tracing::info!("Link: {}/{} (id: {})", link.domain, link.key, link.id);

    queries::create_enrollment(
        &conn,
        &CreateEnrollment {
            program_id: program.id.clone(),
            partner_id: "pn_dev".to_string(),
            link_id: link.id.clone(),
            partner_email: Some("partner@linktally.local".to_string()),
            commission_amount: None,
        },
    )
    .expect("Failed to create dev enrollment");

    let webhook = queries::create_webhook(
        &conn,
        &CreateWebhook {
            workspace_id: workspace.id.clone(),
            name: "Dev Receiver".to_string(),
            url: "http://localhost:4000/receive".to_string(),
            secret: "whsec_dev".to_string(),
            triggers: vec![
                TRIGGER_LEAD_CREATED.to_string(),
                TRIGGER_SALE_CREATED.to_string(),
            ],
            link_ids: vec![],
        },
    )
    .expect("Failed to create dev webhook");
    tracing::info!("Webhook: {} -> {} (id: {})", webhook.name, webhook.url, webhook.id);

    let click = events::record_click(
        &events_conn,
        &link.id,
        &workspace.id,
        Some("https://example.com/?ref=dev"),
        Some("US"),
    )
    .expect("Failed to record dev click");

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");

    // Copy-paste friendly output for webhook payload construction
    println!();
    println!("--- COPY FROM HERE ---");
    println!("  workspace_id: {}", workspace.id);
    println!("  link_id: {}", link.id);
    println!("  program_id: {}", program.id);
    println!("  webhook_id: {}", webhook.id);
    println!("  click_id: {}", click.event_id);
    println!("--- END COPY ---");
    println!();
}

/// Spawns a background task that periodically purges expired idempotency keys.
fn spawn_cleanup_task(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(60 * 60); // hourly

        loop {
            tokio::time::sleep(interval).await;

            match state.idempotency.purge_expired() {
                Ok(count) => {
                    if count > 0 {
                        tracing::debug!("Purged {} expired idempotency keys", count);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to purge idempotency keys: {}", e);
                }
            }
        }
    });

    tracing::info!("Background cleanup task started (runs hourly)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linktally=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }
    if config.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set - inbound webhooks will be rejected");
    }

    // Create database connection pools
    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    let events_pool =
        create_pool(&config.events_database_path).expect("Failed to create events database pool");

    // Initialize database schemas
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }
    {
        let conn = events_pool.get().expect("Failed to get events connection");
        init_events_db(&conn).expect("Failed to initialize events database");
    }

    let http_client = reqwest::Client::new();

    let state = AppState {
        db: db_pool.clone(),
        events: events_pool,
        webhook_cache: Arc::new(WebhookCache::new()),
        http_client: http_client.clone(),
        idempotency: IdempotencyGuard::new(db_pool),
        email: EmailService::new(
            http_client,
            config.resend_api_key.clone(),
            &config.notify_email_from,
            &config.base_url,
        ),
        stripe_webhook_secret: config.stripe_webhook_secret.clone(),
    };

    // Purge already-expired idempotency keys on startup
    match state.idempotency.purge_expired() {
        Ok(count) if count > 0 => {
            tracing::info!("Purged {} expired idempotency keys", count);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Failed to purge idempotency keys: {}", e);
        }
    }

    // Seed dev data if --seed flag is passed (only in dev mode)
    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set LINKTALLY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    // Warm the webhook cache from the relational store (after seeding, so
    // seeded webhooks are visible without a restart)
    {
        let conn = state.db.get().expect("Failed to get connection for cache warmup");
        match state.webhook_cache.rebuild(&conn) {
            Ok(count) => tracing::info!("Webhook cache warmed with {} entries", count),
            Err(e) => tracing::warn!("Failed to warm webhook cache: {}", e),
        }
    }

    spawn_cleanup_task(state.clone());

    let app = Router::new()
        .merge(handlers::webhooks::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();
    let events_path = config.events_database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: databases will be deleted on exit");
    }

    tracing::info!("Linktally server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral databases...");
        for path in [&db_path, &events_path] {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("Failed to remove {}: {}", path, e);
            } else {
                tracing::info!("Removed {}", path);
            }
            let _ = std::fs::remove_file(format!("{}-wal", path));
            let _ = std::fs::remove_file(format!("{}-shm", path));
        }
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
