use chrono::Utc;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{OrderList, OrderWithItems, PlaceOrderRequest, UpdateOrderStatusRequest},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Course, ItemType, Order, OrderItem, OrderStatus, Product},
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Place a new order in `pending` state. Titles and prices are snapshotted
/// from the catalog at this moment and the total is computed from the
/// snapshots; the client never supplies amounts.
pub async fn place_order(
    state: &AppState,
    user: &AuthUser,
    payload: PlaceOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.items.is_empty() {
        return Err(AppError::BadRequest("No items in order".into()));
    }

    let mut txn = state.pool.begin().await?;

    let mut snapshots: Vec<(Uuid, ItemType, String, i64, i32)> = Vec::new();
    let mut total_amount: i64 = 0;

    for input in &payload.items {
        if input.quantity < 1 {
            return Err(AppError::BadRequest("Quantity must be at least 1".into()));
        }
        let (title, price) = match input.item_type {
            ItemType::Product => {
                let product: Option<Product> =
                    sqlx::query_as("SELECT * FROM products WHERE id = $1")
                        .bind(input.item_id)
                        .fetch_optional(&mut *txn)
                        .await?;
                let product = product.ok_or_else(|| {
                    AppError::BadRequest(format!("Unknown product {}", input.item_id))
                })?;
                (product.name, product.price)
            }
            ItemType::Course => {
                let course: Option<Course> = sqlx::query_as("SELECT * FROM courses WHERE id = $1")
                    .bind(input.item_id)
                    .fetch_optional(&mut *txn)
                    .await?;
                let course = course.ok_or_else(|| {
                    AppError::BadRequest(format!("Unknown course {}", input.item_id))
                })?;
                (course.title, course.price)
            }
        };
        total_amount += price * i64::from(input.quantity);
        snapshots.push((input.item_id, input.item_type, title, price, input.quantity));
    }

    let order_id = Uuid::new_v4();
    let payment_method = payload
        .payment_method
        .unwrap_or_else(|| "razorpay".to_string());

    let order: Order = sqlx::query_as(
        r#"
        INSERT INTO orders (id, user_id, total_amount, status, payment_method)
        VALUES ($1, $2, $3, 'pending', $4)
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(user.user_id)
    .bind(total_amount)
    .bind(payment_method)
    .fetch_one(&mut *txn)
    .await?;

    let mut items: Vec<OrderItem> = Vec::new();
    for (item_id, item_type, title, price, quantity) in snapshots {
        let item: OrderItem = sqlx::query_as(
            r#"
            INSERT INTO order_items (id, order_id, item_id, item_type, title, price, quantity)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order.id)
        .bind(item_id)
        .bind(item_type.as_str())
        .bind(title)
        .bind(price)
        .bind(quantity)
        .fetch_one(&mut *txn)
        .await?;
        items.push(item);
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_placed",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "total_amount": order.total_amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order placed",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn list_my_orders(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<OrderList>> {
    let orders: Vec<Order> = sqlx::query_as(
        "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    let total = orders.len() as i64;
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(Meta::unpaged(total)),
    ))
}

/// Buyer sees their own orders; admins see any.
pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order: Option<Order> = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if user.role != "admin" && order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let items: Vec<OrderItem> = sqlx::query_as("SELECT * FROM order_items WHERE order_id = $1")
        .bind(order.id)
        .fetch_all(&state.pool)
        .await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn list_all_orders(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;

    let orders: Vec<Order> = sqlx::query_as("SELECT * FROM orders ORDER BY created_at DESC")
        .fetch_all(&state.pool)
        .await?;

    let total = orders.len() as i64;
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(Meta::unpaged(total)),
    ))
}

/// Admin-operated lifecycle transitions (shipped/delivered/cancelled).
/// `paid` is owned by the settlement coordinator and rejected here.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let status = OrderStatus::parse(&payload.status)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown status {}", payload.status)))?;
    if matches!(status, OrderStatus::Paid | OrderStatus::Pending) {
        return Err(AppError::BadRequest(
            "Status can only be set to shipped, delivered or cancelled".into(),
        ));
    }

    let order: Option<Order> = sqlx::query_as(
        "UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(Utc::now())
    .fetch_optional(&state.pool)
    .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_status_updated",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "status": order.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Status updated",
        order,
        Some(Meta::empty()),
    ))
}
