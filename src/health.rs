//! Webhook health state machine.
//!
//! Failure counts live on the webhook row and are only ever moved by the
//! guarded updates in `db::queries` (increment while enabled, reset while
//! enabled, disable once). This module layers the escalation policy on
//! top: operator warnings at fixed failure counts and a terminal disable,
//! with the cache kept in step after every transition.

use rusqlite::Connection;

use crate::cache::WebhookCache;
use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::{Webhook, TRIGGER_CLICK_CREATED};

/// Consecutive-failure counts at which the workspace operator is warned.
pub const NOTIFY_THRESHOLDS: &[i64] = &[5, 10];

/// Consecutive-failure count at which the webhook is disabled.
pub const DISABLE_THRESHOLD: i64 = 20;

/// What a recorded delivery failure escalated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureEscalation {
    /// Counter moved but no threshold was crossed
    Counted(i64),
    /// A warning threshold was crossed
    Warned(i64),
    /// The disable threshold was crossed and this call won the disable
    Disabled,
    /// The webhook was already disabled (or deleted); nothing recorded
    AlreadyTerminal,
}

/// Record a successful delivery: clear the failure streak.
pub fn record_success(state: &AppState, webhook_id: &str) -> Result<()> {
    let conn = state.db.get()?;
    if queries::reset_webhook_failures(&conn, webhook_id)? {
        // Counter changed, refresh the cached row
        if let Some(webhook) = queries::get_webhook_by_id(&conn, webhook_id)? {
            state.webhook_cache.set(webhook);
        }
    }
    Ok(())
}

/// Record a failed delivery and apply the escalation policy.
///
/// Disable is a compare-and-swap on `disabled_at`, so concurrent failures
/// produce exactly one `Disabled` outcome and one operator email.
pub async fn record_failure(state: &AppState, webhook: &Webhook) -> Result<FailureEscalation> {
    let failures = {
        let conn = state.db.get()?;
        queries::record_webhook_failure(&conn, &webhook.id)?
    };

    let Some(failures) = failures else {
        return Ok(FailureEscalation::AlreadyTerminal);
    };

    if failures >= DISABLE_THRESHOLD {
        let disabled = {
            let conn = state.db.get()?;
            queries::try_disable_webhook(&conn, &webhook.id)?
        };
        if !disabled {
            return Ok(FailureEscalation::AlreadyTerminal);
        }

        state.webhook_cache.delete(&webhook.id);
        {
            let conn = state.db.get()?;
            queries::recompute_webhook_enabled(&conn, &webhook.workspace_id)?;
        }
        tracing::warn!(
            "Webhook {} disabled after {} consecutive failures",
            webhook.id,
            failures
        );
        notify_operator(state, webhook, None).await;
        return Ok(FailureEscalation::Disabled);
    }

    // Still enabled, keep the cached copy accurate
    {
        let conn = state.db.get()?;
        if let Some(updated) = queries::get_webhook_by_id(&conn, &webhook.id)? {
            state.webhook_cache.set(updated);
        }
    }

    if NOTIFY_THRESHOLDS.contains(&failures) {
        tracing::warn!("Webhook {} failing ({} consecutive)", webhook.id, failures);
        notify_operator(state, webhook, Some(failures)).await;
        return Ok(FailureEscalation::Warned(failures));
    }

    Ok(FailureEscalation::Counted(failures))
}

/// Email the workspace operator about a failing (`Some(count)`) or
/// disabled (`None`) webhook. Email failures are logged, never propagated;
/// the state transition has already been committed.
async fn notify_operator(state: &AppState, webhook: &Webhook, failures: Option<i64>) {
    let notify_email = {
        let conn = match state.db.get() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("Failed to load workspace for webhook notice: {}", e);
                return;
            }
        };
        match queries::get_workspace_by_id(&conn, &webhook.workspace_id) {
            Ok(Some(workspace)) => workspace.notify_email,
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Failed to load workspace for webhook notice: {}", e);
                return;
            }
        }
    };

    let Some(to) = notify_email else {
        tracing::debug!(
            "Workspace {} has no notify email, skipping webhook notice",
            webhook.workspace_id
        );
        return;
    };

    let result = match failures {
        Some(count) => {
            state
                .email
                .send_webhook_failing(&to, &webhook.name, &webhook.url, count)
                .await
        }
        None => {
            state
                .email
                .send_webhook_disabled(&to, &webhook.name, &webhook.url)
                .await
        }
    };

    if let Err(e) = result {
        tracing::error!("Failed to send webhook notice for {}: {}", webhook.id, e);
    }
}

/// Keep a webhook's click subscription consistent with its link scope.
///
/// A webhook receives click events iff it is scoped to at least one link:
/// linking the first link adds `click.created` to its triggers, unlinking
/// the last one removes it. Trigger and scope changes are written through
/// to the cache.
pub fn reconcile_webhook_scope(
    conn: &Connection,
    cache: &WebhookCache,
    webhook_id: &str,
) -> Result<()> {
    let Some(webhook) = queries::get_webhook_by_id(conn, webhook_id)? else {
        cache.delete(webhook_id);
        return Ok(());
    };

    let link_ids = queries::get_webhook_link_ids(conn, webhook_id)?;
    let has_links = !link_ids.is_empty();
    let has_click = webhook.has_trigger(TRIGGER_CLICK_CREATED);

    let triggers = if has_links && !has_click {
        let mut triggers = webhook.triggers.clone();
        triggers.push(TRIGGER_CLICK_CREATED.to_string());
        Some(triggers)
    } else if !has_links && has_click {
        Some(
            webhook
                .triggers
                .iter()
                .filter(|t| t.as_str() != TRIGGER_CLICK_CREATED)
                .cloned()
                .collect(),
        )
    } else {
        None
    };

    let webhook = match triggers {
        Some(triggers) => {
            queries::set_webhook_triggers(conn, webhook_id, &triggers)?;
            Webhook { triggers, ..webhook }
        }
        None => webhook,
    };

    if webhook.is_disabled() {
        cache.delete(webhook_id);
    } else {
        cache.set(webhook);
        cache.set_link_scope(webhook_id, &link_ids);
    }
    Ok(())
}
