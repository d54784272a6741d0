//! Async fan-out of pipeline events to subscriber webhooks.
//!
//! Dispatch runs in detached tasks so a slow or dead subscriber endpoint can
//! never delay the inbound payment-provider response. Each task is wrapped in
//! catch_unwind with panic logging; a lost dispatch is an observability gap,
//! not a correctness one, since the ledger write has already committed.

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;

use crate::db::{queries, AppState};
use crate::delivery::{self, DeliveryOutcome};
use crate::error::Result;
use crate::health;
use crate::id::EntityType;
use crate::models::Webhook;

/// Envelope posted to subscriber endpoints.
#[derive(Debug, Serialize)]
pub struct OutboundEvent<'a> {
    pub id: String,
    pub event: &'a str,
    pub created_at: i64,
    pub data: &'a Value,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Fan an event out to every eligible webhook in the workspace.
///
/// Fire-and-forget: the caller has already committed the ledger write and
/// must return 200 to the payment provider regardless of what happens here.
pub fn spawn_event_webhooks(
    state: AppState,
    workspace_id: String,
    trigger: &'static str,
    link_id: Option<String>,
    data: Value,
) {
    tokio::spawn(async move {
        let result = std::panic::AssertUnwindSafe(dispatch_event(
            &state,
            &workspace_id,
            trigger,
            link_id.as_deref(),
            &data,
        ))
        .catch_unwind()
        .await;

        match result {
            Ok(Ok(delivered)) => {
                if delivered > 0 {
                    tracing::debug!(
                        "Dispatched {} to {} webhook(s) for workspace {}",
                        trigger,
                        delivered,
                        workspace_id
                    );
                }
            }
            Ok(Err(e)) => {
                tracing::error!(
                    "Webhook dispatch failed for {} in workspace {}: {}",
                    trigger,
                    workspace_id,
                    e
                );
            }
            Err(_) => {
                tracing::error!(
                    "Webhook dispatch panicked for {} in workspace {}",
                    trigger,
                    workspace_id
                );
            }
        }
    });
}

async fn dispatch_event(
    state: &AppState,
    workspace_id: &str,
    trigger: &'static str,
    link_id: Option<&str>,
    data: &Value,
) -> Result<usize> {
    let targets = eligible_webhooks(state, workspace_id, trigger, link_id)?;
    if targets.is_empty() {
        return Ok(0);
    }

    let envelope = OutboundEvent {
        id: EntityType::Event.gen_id(),
        event: trigger,
        created_at: now(),
        data,
    };
    let body = serde_json::to_string(&envelope)?;

    let mut delivered = 0;
    for webhook in &targets {
        let outcome =
            delivery::deliver(&state.http_client, &webhook.url, &webhook.secret, &body).await;
        match outcome {
            DeliveryOutcome::Success => {
                delivered += 1;
                if let Err(e) = health::record_success(state, &webhook.id) {
                    tracing::error!("Failed to record delivery success for {}: {}", webhook.id, e);
                }
            }
            DeliveryOutcome::Failure(reason) => {
                tracing::warn!("Delivery to webhook {} failed: {}", webhook.id, reason);
                if let Err(e) = health::record_failure(state, webhook).await {
                    tracing::error!("Failed to record delivery failure for {}: {}", webhook.id, e);
                }
            }
        }
    }
    Ok(delivered)
}

/// Active webhooks subscribed to `trigger`, honoring the workspace gate and
/// link scoping: free-plan workspaces get no fan-out at all, and a webhook
/// scoped to specific links only receives events carrying one of its links.
pub fn eligible_webhooks(
    state: &AppState,
    workspace_id: &str,
    trigger: &str,
    link_id: Option<&str>,
) -> Result<Vec<Webhook>> {
    let conn = state.db.get()?;

    let Some(workspace) = queries::get_workspace_by_id(&conn, workspace_id)? else {
        return Ok(Vec::new());
    };
    if !workspace.plan_allows_webhooks() || !workspace.webhook_enabled {
        tracing::debug!(
            "Webhooks gated off for workspace {} (plan {})",
            workspace_id,
            workspace.plan
        );
        return Ok(Vec::new());
    }

    let candidates = queries::list_active_webhooks_for_trigger(&conn, workspace_id, trigger)?;

    let mut targets = Vec::with_capacity(candidates.len());
    for webhook in candidates {
        let scope = queries::get_webhook_link_ids(&conn, &webhook.id)?;
        let in_scope = match (scope.is_empty(), link_id) {
            (true, _) => true,
            (false, Some(link_id)) => scope.iter().any(|l| l == link_id),
            (false, None) => false,
        };
        if in_scope {
            targets.push(webhook);
        }
    }
    Ok(targets)
}

/// Notify a partner of an attributed sale, off the request path.
pub fn spawn_partner_notification(
    state: AppState,
    partner_email: String,
    program_name: String,
    amount: i64,
    earnings: i64,
    currency: String,
) {
    tokio::spawn(async move {
        let result = std::panic::AssertUnwindSafe(state.email.send_partner_sale(
            &partner_email,
            &program_name,
            amount,
            earnings,
            &currency,
        ))
        .catch_unwind()
        .await;

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!("Failed to send partner sale email: {}", e),
            Err(_) => tracing::error!("Partner sale email task panicked"),
        }
    });
}
