//! Razorpay order (payment intent) creation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Gateway client holding its own HTTP client and credentials. Constructed
/// once at startup and injected through [`crate::state::AppState`].
#[derive(Clone)]
pub struct RazorpayClient {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    /// Amount in minor units (paise).
    amount: i64,
    currency: &'a str,
    receipt: String,
    notes: OrderNotes,
}

#[derive(Debug, Serialize)]
struct OrderNotes {
    #[serde(rename = "orderId")]
    order_id: String,
}

/// Gateway-side order as returned by `POST /v1/orders`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

impl RazorpayClient {
    pub fn new(
        base_url: String,
        key_id: String,
        key_secret: String,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            key_id,
            key_secret,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Create a gateway order for `amount_minor` paise. The internal order id
    /// rides along in `notes.orderId` so the webhook can resolve it directly.
    pub async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        internal_order_id: Uuid,
    ) -> AppResult<GatewayOrder> {
        let body = CreateOrderBody {
            amount: amount_minor,
            currency,
            receipt: internal_order_id.to_string(),
            notes: OrderNotes {
                order_id: internal_order_id.to_string(),
            },
        };

        let response = self
            .http
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Gateway(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "order creation failed: {status}: {text}"
            )));
        }

        let order = response
            .json::<GatewayOrder>()
            .await
            .map_err(|e| AppError::Gateway(e.to_string()))?;
        Ok(order)
    }
}
