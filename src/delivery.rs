//! Outbound webhook delivery.
//!
//! Payloads are HMAC-SHA256 signed with the subscriber's secret so receivers
//! can authenticate us the same way we authenticate the payment provider.
//! Delivery uses quick bounded retries; the final outcome is reported to the
//! health state machine by the dispatcher, never to the inbound caller.

use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded HMAC of the request body.
pub const SIGNATURE_HEADER: &str = "x-linktally-signature";

/// Retry delays in milliseconds. Quick retries only - persistent failures are
/// the health state machine's concern, not the delivery loop's.
const DELIVERY_RETRY_DELAYS: &[u64] = &[100, 200];

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one delivery attempt chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    /// All attempts failed; carries a short diagnostic for logging.
    Failure(String),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success)
    }
}

/// Hex-encoded HMAC-SHA256 signature of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// POST `body` to `url`, signed with `secret`, retrying on failure.
pub async fn deliver(client: &Client, url: &str, secret: &str, body: &str) -> DeliveryOutcome {
    let signature = sign_payload(secret, body.as_bytes());
    let mut last_error = String::new();

    for (attempt, delay_ms) in std::iter::once(&0u64)
        .chain(DELIVERY_RETRY_DELAYS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }

        match client
            .post(url)
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, &signature)
            .body(body.to_string())
            .timeout(DELIVERY_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if attempt > 0 {
                    tracing::debug!("Webhook delivery to {} succeeded after {} retries", url, attempt);
                }
                return DeliveryOutcome::Success;
            }
            Ok(resp) => {
                last_error = format!("HTTP {}", resp.status());
                tracing::debug!("Webhook delivery to {} returned {}", url, resp.status());
            }
            Err(e) => {
                last_error = e.to_string();
                tracing::debug!("Webhook delivery to {} failed: {}", url, e);
            }
        }
    }

    DeliveryOutcome::Failure(last_error)
}
