use serde::{Deserialize, Serialize};

/// An end-user of a workspace's product.
///
/// Identity is two-sided: `(project_connect_id, external_id)` names the
/// customer on the workspace side, `stripe_customer_id` names them on the
/// payment provider side once linked. Either side may arrive first - customer
/// lifecycle events and checkout events are not ordered (see webhook handlers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub workspace_id: String,
    /// Workspace-assigned ID for this customer (from provider metadata).
    pub external_id: Option<String>,
    /// Provider-connect identity namespace for the workspace.
    pub project_connect_id: Option<String>,
    /// Payment provider's customer ID (cus_xxx), once known.
    pub stripe_customer_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    /// The link that brought this customer in (set at lead creation).
    pub link_id: Option<String>,
    /// The originating click event (set at lead creation).
    pub click_id: Option<String>,
    pub country: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Data required to create a new customer from click attribution.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCustomer {
    pub workspace_id: String,
    pub external_id: Option<String>,
    pub project_connect_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub link_id: Option<String>,
    pub click_id: Option<String>,
    pub country: Option<String>,
}
