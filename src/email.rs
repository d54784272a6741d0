//! Email notifications for webhook degradation and partner sales.
//!
//! Two modes:
//! 1. Send via Resend API (when an API key is configured)
//! 2. Disabled (no email sent, log only)

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::error::{AppError, Result};

/// Retry delays in seconds (exponential backoff: 1s, 4s, 16s)
const RETRY_DELAYS: &[u64] = &[1, 4, 16];

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Result of attempting to send a notification email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSendResult {
    /// Email was sent successfully via Resend
    Sent,
    /// Email delivery is not configured - content was logged only
    Disabled,
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
}

#[derive(Clone)]
pub struct EmailService {
    client: Client,
    api_key: Option<String>,
    from: String,
    /// Base URL of the dashboard, used for links in notification bodies.
    base_url: String,
}

impl EmailService {
    pub fn new(client: Client, api_key: Option<String>, from: &str, base_url: &str) -> Self {
        Self {
            client,
            api_key,
            from: from.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Warn the workspace operator that a webhook keeps failing.
    pub async fn send_webhook_failing(
        &self,
        to: &str,
        webhook_name: &str,
        webhook_url: &str,
        consecutive_failures: i64,
    ) -> Result<EmailSendResult> {
        let subject = format!("Your webhook {} is failing", webhook_name);
        let html = format!(
            "<p>Your webhook <strong>{}</strong> ({}) has failed {} times in a row. \
             It will be disabled automatically if it keeps failing.</p>\
             <p><a href=\"{}/settings/webhooks\">Review webhook settings</a></p>",
            webhook_name, webhook_url, consecutive_failures, self.base_url
        );
        self.send(to, &subject, &html).await
    }

    /// Tell the workspace operator a webhook has been disabled.
    pub async fn send_webhook_disabled(
        &self,
        to: &str,
        webhook_name: &str,
        webhook_url: &str,
    ) -> Result<EmailSendResult> {
        let subject = format!("Your webhook {} has been disabled", webhook_name);
        let html = format!(
            "<p>Your webhook <strong>{}</strong> ({}) has been disabled after repeated \
             delivery failures. Fix the endpoint, then re-enable it at \
             <a href=\"{}/settings/webhooks\">{}/settings/webhooks</a>.</p>",
            webhook_name, webhook_url, self.base_url, self.base_url
        );
        self.send(to, &subject, &html).await
    }

    /// Notify a partner of a new attributed sale.
    pub async fn send_partner_sale(
        &self,
        to: &str,
        program_name: &str,
        amount_cents: i64,
        earnings_cents: i64,
        currency: &str,
    ) -> Result<EmailSendResult> {
        let subject = format!("You made a new sale via {}", program_name);
        let html = format!(
            "<p>A customer you referred just made a purchase of {:.2} {}. \
             You earned {:.2} {} in commission.</p>",
            amount_cents as f64 / 100.0,
            currency.to_uppercase(),
            earnings_cents as f64 / 100.0,
            currency.to_uppercase(),
        );
        self.send(to, &subject, &html).await
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<EmailSendResult> {
        let Some(api_key) = &self.api_key else {
            tracing::info!("Email disabled - would send to {}: {}", to, subject);
            return Ok(EmailSendResult::Disabled);
        };

        let request = ResendRequest {
            from: &self.from,
            to: vec![to],
            subject,
            html,
        };

        let mut last_error = String::new();
        for (attempt, delay_secs) in std::iter::once(&0u64)
            .chain(RETRY_DELAYS.iter())
            .enumerate()
        {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
            }

            match self
                .client
                .post(RESEND_API_URL)
                .bearer_auth(api_key)
                .json(&request)
                .timeout(Duration::from_secs(10))
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(EmailSendResult::Sent);
                }
                Ok(resp) => {
                    last_error = format!("HTTP {}", resp.status());
                    tracing::warn!("Resend API returned {} (attempt {})", resp.status(), attempt + 1);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!("Resend API error: {} (attempt {})", e, attempt + 1);
                }
            }
        }

        Err(AppError::Internal(format!(
            "Failed to send email after {} attempts: {}",
            RETRY_DELAYS.len() + 1,
            last_error
        )))
    }
}
