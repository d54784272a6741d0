use serde::{Deserialize, Serialize};

use super::RewardEventType;

/// One row per qualifying lead or sale event credited to a partner.
///
/// `event_id` references the conversion event in the events store and is
/// unique - it is the natural dedupe key within the relational store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commission {
    pub id: String,
    pub event_type: RewardEventType,
    pub program_id: String,
    pub partner_id: String,
    pub link_id: String,
    pub customer_id: String,
    /// Conversion event ID in the events store (unique).
    pub event_id: String,
    /// Provider invoice ID for sale commissions.
    pub invoice_id: Option<String>,
    pub quantity: i64,
    /// Sale amount in cents (0 for lead commissions).
    pub amount: i64,
    pub currency: String,
    /// Partner earnings in cents.
    pub earnings: i64,
    pub created_at: i64,
}

/// Data required to create a new commission.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCommission {
    pub event_type: RewardEventType,
    pub program_id: String,
    pub partner_id: String,
    pub link_id: String,
    pub customer_id: String,
    pub event_id: String,
    pub invoice_id: Option<String>,
    pub quantity: i64,
    pub amount: i64,
    pub currency: String,
    pub earnings: i64,
}
