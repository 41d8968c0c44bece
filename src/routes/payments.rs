use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};

use crate::{
    audit::log_audit,
    dto::payments::{CreateIntentRequest, CreateIntentResponse},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderStatus},
    response::ApiResponse,
    services::settlement::{PgSettlementStore, SettlementCoordinator, SettlementError},
    state::AppState,
};

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/razorpay", post(create_intent))
        .route("/webhook", post(webhook))
}

#[utoipa::path(
    post,
    path = "/api/payments/razorpay",
    request_body = CreateIntentRequest,
    responses(
        (status = 200, description = "Gateway order created", body = ApiResponse<CreateIntentResponse>),
        (status = 404, description = "Order not found"),
        (status = 502, description = "Gateway error"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_intent(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateIntentRequest>,
) -> AppResult<Json<ApiResponse<CreateIntentResponse>>> {
    let order: Option<Order> =
        sqlx::query_as("SELECT * FROM orders WHERE id = $1 AND user_id = $2")
            .bind(payload.order_id)
            .bind(user.user_id)
            .fetch_optional(&state.pool)
            .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };
    if OrderStatus::parse(&order.status) != Some(OrderStatus::Pending) {
        return Err(AppError::BadRequest(format!(
            "Order is {}, not payable",
            order.status
        )));
    }

    // Gateway amounts are minor units (paise).
    let amount_minor = order.total_amount * 100;
    let gateway_order = state
        .gateway
        .create_order(amount_minor, "INR", order.id)
        .await?;

    sqlx::query("UPDATE orders SET gateway_reference = $2, updated_at = now() WHERE id = $1")
        .bind(order.id)
        .bind(&gateway_order.id)
        .execute(&state.pool)
        .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "payment_intent_created",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": order.id,
            "gateway_reference": gateway_order.id,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let data = CreateIntentResponse {
        order_id: gateway_order.id,
        key: state.gateway.key_id().to_string(),
        amount: gateway_order.amount,
    };
    Ok(Json(ApiResponse::success("Intent created", data, None)))
}

/// Public webhook endpoint. Speaks the gateway's exact contract rather than
/// the API envelope: 200 `{"status":"ok"}` on success (including idempotent
/// redeliveries), 400/404/500 with `{"message": ...}` otherwise.
///
/// The body is taken as raw [`Bytes`]; the signature covers those exact bytes
/// and must be checked before any parsing.
///
/// A correctly signed body that then fails to parse is also a 400
/// (`MalformedPayload`): the signature proves origin, but there is no
/// settlement that can safely be performed from it.
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    request_body(content = Vec<u8>, content_type = "application/json"),
    responses(
        (status = 200, description = "Settled or already settled"),
        (status = 400, description = "Invalid signature"),
        (status = 404, description = "Order not found"),
        (status = 500, description = "Store failure; delivery is safe to retry"),
    ),
    tag = "Payments"
)]
pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let coordinator = SettlementCoordinator::new(
        PgSettlementStore::new(state.pool.clone()),
        state.notifier.clone(),
        state.webhook_secret.as_bytes().to_vec(),
    );

    match coordinator.settle(&body, signature).await {
        Ok(outcome) => {
            if !outcome.failures.is_empty() {
                tracing::warn!(
                    order_id = %outcome.order_id,
                    failed = outcome.failures.len(),
                    "settlement succeeded with notification failures"
                );
            }
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "ok" })),
            )
                .into_response()
        }
        Err(SettlementError::InvalidSignature) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "message": "Invalid signature" })),
        )
            .into_response(),
        Err(SettlementError::MalformedPayload(err)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "message": err })),
        )
            .into_response(),
        Err(SettlementError::OrderNotFound) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "message": "Order not found" })),
        )
            .into_response(),
        Err(SettlementError::Store(err)) => {
            tracing::error!(error = %err, "webhook settlement failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": err.to_string() })),
            )
                .into_response()
        }
    }
}
