use serde::{Deserialize, Serialize};

/// Event names a webhook can subscribe to.
pub const TRIGGER_CLICK_CREATED: &str = "click.created";
pub const TRIGGER_LEAD_CREATED: &str = "lead.created";
pub const TRIGGER_SALE_CREATED: &str = "sale.created";

/// A per-workspace HTTP subscriber.
///
/// A webhook is "link-level" iff it is scoped to specific links (rows in
/// `webhook_links`) and subscribes to the click trigger; otherwise it is
/// workspace-level. That invariant is maintained by scope reconciliation
/// (see `health::reconcile_webhook_scope`), not set directly by users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub url: String,
    /// Shared secret used to HMAC-sign outbound payloads.
    pub secret: String,
    /// Subscribed event names.
    pub triggers: Vec<String>,
    /// Set when the health state machine disables this webhook. Terminal
    /// from the pipeline's perspective; re-enabling is an external action.
    pub disabled_at: Option<i64>,
    pub consecutive_failures: i64,
    pub last_failed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Webhook {
    pub fn is_disabled(&self) -> bool {
        self.disabled_at.is_some()
    }

    pub fn has_trigger(&self, trigger: &str) -> bool {
        self.triggers.iter().any(|t| t == trigger)
    }
}

/// Data required to create a new webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWebhook {
    pub workspace_id: String,
    pub name: String,
    pub url: String,
    pub secret: String,
    pub triggers: Vec<String>,
    /// Links this webhook is scoped to (empty = workspace-level).
    pub link_ids: Vec<String>,
}
