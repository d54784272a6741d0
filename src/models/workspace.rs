use serde::{Deserialize, Serialize};

/// A tenant. Holds aggregate usage counters and the webhook-enabled flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    /// Plan tier ("free", "pro", "business"). Webhooks require a paid plan.
    pub plan: String,
    /// Where operator notifications (webhook degradation warnings) go.
    pub notify_email: Option<String>,
    /// Total tracked events (clicks + leads) this billing period.
    pub usage: i64,
    /// Total sale amount (cents) tracked this billing period.
    pub sales_usage: i64,
    /// True iff at least one non-disabled webhook exists for this workspace.
    /// Recomputed whenever a webhook is created, deleted, or disabled.
    pub webhook_enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Workspace {
    /// Whether the plan tier permits outbound webhooks at all.
    pub fn plan_allows_webhooks(&self) -> bool {
        self.plan != "free"
    }
}

/// Data required to create a new workspace.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkspace {
    pub name: String,
    pub plan: String,
    pub notify_email: Option<String>,
}
