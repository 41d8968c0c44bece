use crate::{db::DbPool, email::SmtpEntitlementNotifier, payments::gateway::RazorpayClient};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    /// Explicitly constructed gateway client, injected at startup.
    pub gateway: RazorpayClient,
    pub notifier: SmtpEntitlementNotifier,
    pub webhook_secret: String,
    /// Frontend base URL, used when building password-reset links.
    pub client_url: String,
}
