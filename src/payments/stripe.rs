use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Verifies Stripe webhook signatures against the shared endpoint secret.
#[derive(Debug, Clone)]
pub struct StripeWebhookVerifier {
    webhook_secret: String,
}

impl StripeWebhookVerifier {
    pub fn new(webhook_secret: &str) -> Self {
        Self {
            webhook_secret: webhook_secret.to_string(),
        }
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        // Stripe signature format: t=timestamp,v1=signature
        let parts: Vec<&str> = signature.split(',').collect();

        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in parts {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest("Invalid signature format".into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest("Invalid signature format".into()))?;

        // Parse and validate timestamp to prevent replay attacks.
        // Reject webhooks older than WEBHOOK_TIMESTAMP_TOLERANCE_SECS.
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest("Invalid timestamp in signature".into()))?;

        let now = chrono::Utc::now().timestamp();
        let age = now - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        // Also reject timestamps from the future (clock skew tolerance: 60 seconds)
        if age < -60 {
            tracing::warn!(
                "Stripe webhook rejected: timestamp in the future (age={}s)",
                age
            );
            return Ok(false);
        }

        // Construct signed payload
        let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

        // Compute expected signature
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison to prevent timing attacks. The length
        // check is not constant-time, but signature length is not secret
        // (always 64 hex chars for SHA-256).
        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();

        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }

        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// Connect account the event originated from. Namespaces customer
    /// external IDs per workspace.
    pub account: Option<String>,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// Metadata keys the tracked site attaches at checkout / customer creation.
#[derive(Debug, Default, Deserialize)]
pub struct LinktallyMetadata {
    /// Workspace-assigned ID for the customer.
    pub linktally_customer_id: Option<String>,
    /// Click ID captured by the tracking script.
    pub linktally_click_id: Option<String>,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub mode: Option<String>, // "payment" or "subscription"
    pub payment_status: String,
    pub customer: Option<String>,
    pub currency: Option<String>,
    pub amount_total: Option<i64>,
    /// Invoice backing this checkout (subscription mode). Used as the
    /// idempotency key when present; the session id is the fallback.
    pub invoice: Option<String>,
    /// Alternative carrier for the customer external ID
    /// (format: "linktally_id_{external_id}").
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: LinktallyMetadata,
    pub customer_details: Option<StripeCustomerDetails>,
}

impl StripeCheckoutSession {
    /// The workspace-assigned customer ID, from metadata or the
    /// client_reference_id fallback.
    pub fn external_customer_id(&self) -> Option<String> {
        if let Some(id) = &self.metadata.linktally_customer_id {
            return Some(id.clone());
        }
        self.client_reference_id
            .as_deref()
            .and_then(|r| r.strip_prefix("linktally_id_"))
            .map(String::from)
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
    pub address: Option<StripeAddress>,
}

#[derive(Debug, Deserialize)]
pub struct StripeAddress {
    pub country: Option<String>,
}

// ============ invoice.paid ============

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: Option<String>,
    pub status: String, // "paid", "open", etc.
    pub billing_reason: Option<String>, // "subscription_create", "subscription_cycle", etc.
    pub currency: Option<String>,
    pub amount_paid: Option<i64>,
}

// ============ customer.created / customer.updated ============

#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: LinktallyMetadata,
}
