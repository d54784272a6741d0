use serde::{Deserialize, Serialize};

/// A short link. Carries conversion counters and optional affiliate
/// attribution (program + partner) for commission fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub workspace_id: String,
    pub domain: String,
    pub key: String,
    pub url: String,
    pub clicks: i64,
    pub leads: i64,
    pub sales: i64,
    /// Cumulative sale amount in cents.
    pub sale_amount: i64,
    pub program_id: Option<String>,
    pub partner_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Link {
    /// Whether sales through this link are partner-attributed.
    pub fn is_partner_attributed(&self) -> bool {
        self.program_id.is_some() && self.partner_id.is_some()
    }
}

/// Data required to create a new link.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLink {
    pub workspace_id: String,
    pub domain: String,
    pub key: String,
    pub url: String,
    pub program_id: Option<String>,
    pub partner_id: Option<String>,
}
