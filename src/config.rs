use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub events_database_path: String,
    pub base_url: String,
    /// Shared secret for verifying inbound Stripe webhook signatures.
    /// Signature verification fails closed when this is unset.
    pub stripe_webhook_secret: Option<String>,
    /// Resend API key for operator notification emails. None = log only.
    pub resend_api_key: Option<String>,
    pub notify_email_from: String,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("LINKTALLY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "linktally.db".to_string()),
            events_database_path: env::var("EVENTS_DATABASE_PATH")
                .unwrap_or_else(|_| "linktally_events.db".to_string()),
            base_url,
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok(),
            resend_api_key: env::var("RESEND_API_KEY").ok(),
            notify_email_from: env::var("NOTIFY_EMAIL_FROM")
                .unwrap_or_else(|_| "system@linktally.local".to_string()),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
