use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateIntentRequest {
    /// Internal order id to create a gateway intent for.
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateIntentResponse {
    /// Gateway-side order id.
    #[serde(rename = "orderId")]
    pub order_id: String,
    /// Public key the frontend hands to the gateway widget.
    pub key: String,
    /// Amount in minor units.
    pub amount: i64,
}

/// Inbound webhook body:
/// `{ payload: { payment: { entity: { id, order_id, notes?: { orderId } } } } }`.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub payment: WebhookPayment,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayment {
    pub entity: PaymentEntity,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    /// Processor's payment id, recorded on the order at settlement.
    pub id: String,
    /// Gateway-side order id.
    pub order_id: Option<String>,
    pub notes: Option<PaymentNotes>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentNotes {
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
}

/// How the webhook identifies the order it settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    /// Our own order id, carried in `notes.orderId`.
    Internal(Uuid),
    /// The gateway's order id, matched against `orders.gateway_reference`.
    Gateway(String),
}

impl PaymentEntity {
    /// Resolve the order reference with explicit precedence:
    /// 1. `notes.orderId` when present and a valid UUID;
    /// 2. otherwise the raw gateway `order_id`.
    pub fn order_reference(&self) -> Option<OrderRef> {
        if let Some(id) = self
            .notes
            .as_ref()
            .and_then(|n| n.order_id.as_deref())
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            return Some(OrderRef::Internal(id));
        }
        self.order_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| OrderRef::Gateway(s.to_string()))
    }
}
