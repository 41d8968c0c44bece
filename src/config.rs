use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    /// Shared secret the gateway signs webhook bodies with.
    pub webhook_secret: String,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub razorpay_base_url: String,
    /// Timeout applied to outbound gateway calls.
    pub gateway_timeout: Duration,

    /// Frontend base URL; password-reset links point here.
    pub client_url: String,

    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
    pub from_name: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);

        let webhook_secret = env::var("RAZORPAY_WEBHOOK_SECRET")?;
        let razorpay_key_id = env::var("RAZORPAY_KEY_ID")?;
        let razorpay_key_secret = env::var("RAZORPAY_KEY_SECRET")?;
        let razorpay_base_url = env::var("RAZORPAY_BASE_URL")
            .unwrap_or_else(|_| "https://api.razorpay.com".to_string());
        let gateway_timeout = env::var("GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10));

        let client_url =
            env::var("CLIENT_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());

        let smtp_server = env::var("SMTP_SERVER").unwrap_or_else(|_| "localhost".to_string());
        let smtp_port = env::var("SMTP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(587);
        let smtp_username = env::var("SMTP_USERNAME").unwrap_or_default();
        let smtp_password = env::var("SMTP_PASSWORD").unwrap_or_default();
        let from_email =
            env::var("FROM_EMAIL").unwrap_or_else(|_| "noreply@example.com".to_string());
        let from_name = env::var("FROM_NAME").unwrap_or_else(|_| "Course Shop".to_string());

        Ok(Self {
            database_url,
            host,
            port,
            webhook_secret,
            razorpay_key_id,
            razorpay_key_secret,
            razorpay_base_url,
            gateway_timeout,
            client_url,
            smtp_server,
            smtp_port,
            smtp_username,
            smtp_password,
            from_email,
            from_name,
        })
    }
}
