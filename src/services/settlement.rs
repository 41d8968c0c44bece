//! Webhook settlement: verify, transition the order, fan out entitlements.
//!
//! The gateway delivers webhooks at least once, and its retry-on-non-2xx is
//! the only retry path in the system. The pending→paid transition is a single
//! conditional update, so two concurrent deliveries of the same event can
//! never both observe "not yet paid" and double-send course access.

use thiserror::Error;
use uuid::Uuid;

use crate::{
    db::DbPool,
    dto::payments::{OrderRef, WebhookEvent},
    email::EntitlementNotifier,
    error::{AppError, AppResult},
    models::{Course, Order, OrderItem, OrderStatus, User},
    payments::signature::verify_signature,
};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Order not found")]
    OrderNotFound,

    #[error(transparent)]
    Store(#[from] AppError),
}

/// Persistence the coordinator settles against.
pub trait SettlementStore: Send + Sync {
    fn order_by_reference(
        &self,
        reference: &OrderRef,
    ) -> impl Future<Output = AppResult<Option<Order>>> + Send;

    /// Atomic conditional update: move the order to `paid` and record the
    /// payment id only while its status is still `pending`. Returns whether
    /// the update applied. This is the critical section; the check and the
    /// write must be one store operation.
    fn mark_paid_if_pending(
        &self,
        order_id: Uuid,
        payment_id: &str,
    ) -> impl Future<Output = AppResult<bool>> + Send;

    fn items_for_order(
        &self,
        order_id: Uuid,
    ) -> impl Future<Output = AppResult<Vec<OrderItem>>> + Send;

    fn user_by_id(&self, id: Uuid) -> impl Future<Output = AppResult<Option<User>>> + Send;

    fn course_by_id(&self, id: Uuid) -> impl Future<Output = AppResult<Option<Course>>> + Send;
}

#[derive(Debug)]
pub struct SettlementOutcome {
    pub order_id: Uuid,
    /// True when the order had already left `pending`; nothing was sent.
    pub already_settled: bool,
    pub notified: usize,
    /// Per-item notification failures. Never fail the settlement: payment is
    /// the durable fact, notification is best-effort.
    pub failures: Vec<String>,
}

pub struct SettlementCoordinator<S, N> {
    store: S,
    notifier: N,
    webhook_secret: Vec<u8>,
}

impl<S: SettlementStore, N: EntitlementNotifier> SettlementCoordinator<S, N> {
    pub fn new(store: S, notifier: N, webhook_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            store,
            notifier,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Settle one webhook delivery. `raw_body` must be the exact inbound
    /// bytes; verification happens before any parsing or state access.
    pub async fn settle(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<SettlementOutcome, SettlementError> {
        if !verify_signature(raw_body, signature, &self.webhook_secret) {
            return Err(SettlementError::InvalidSignature);
        }

        let event: WebhookEvent = serde_json::from_slice(raw_body)
            .map_err(|e| SettlementError::MalformedPayload(e.to_string()))?;
        let entity = &event.payload.payment.entity;

        let reference = entity
            .order_reference()
            .ok_or(SettlementError::OrderNotFound)?;
        let order = self
            .store
            .order_by_reference(&reference)
            .await?
            .ok_or(SettlementError::OrderNotFound)?;

        let applied = self.store.mark_paid_if_pending(order.id, &entity.id).await?;
        if !applied {
            // Lost the race or a redelivery: the order already left `pending`.
            // Success without notifications, payment_id untouched.
            let current = self
                .store
                .order_by_reference(&OrderRef::Internal(order.id))
                .await?
                .ok_or(SettlementError::OrderNotFound)?;
            if OrderStatus::parse(&current.status) != Some(OrderStatus::Paid) {
                tracing::warn!(
                    order_id = %order.id,
                    status = %current.status,
                    "webhook for order not in pending or paid state; skipping"
                );
            }
            tracing::info!(order_id = %order.id, payment_id = %entity.id, "already settled");
            return Ok(SettlementOutcome {
                order_id: order.id,
                already_settled: true,
                notified: 0,
                failures: Vec::new(),
            });
        }

        tracing::info!(order_id = %order.id, payment_id = %entity.id, "order settled");

        // From here on the payment transition is durable. Resolution or
        // notification failures are reported but never revert it.
        let buyer = self
            .store
            .user_by_id(order.user_id)
            .await?
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!("buyer {} missing", order.user_id))
            })?;

        let items = self.store.items_for_order(order.id).await?;
        let mut notified = 0;
        let mut failures = Vec::new();

        for item in items.iter().filter(|i| i.item_type == "course") {
            match self.store.course_by_id(item.item_id).await {
                Ok(Some(course)) => {
                    match self
                        .notifier
                        .send_course_access(
                            &buyer.email,
                            &buyer.name,
                            &course.title,
                            &course.group_link,
                        )
                        .await
                    {
                        Ok(()) => notified += 1,
                        Err(err) => {
                            tracing::warn!(
                                order_id = %order.id,
                                course_id = %item.item_id,
                                error = %err,
                                "entitlement notification failed"
                            );
                            failures.push(format!("course {}: {err}", item.item_id));
                        }
                    }
                }
                Ok(None) => {
                    tracing::warn!(
                        order_id = %order.id,
                        course_id = %item.item_id,
                        "paid line item references missing course"
                    );
                    failures.push(format!("course {} missing", item.item_id));
                }
                Err(err) => {
                    tracing::warn!(
                        order_id = %order.id,
                        course_id = %item.item_id,
                        error = %err,
                        "course lookup failed"
                    );
                    failures.push(format!("course {}: {err}", item.item_id));
                }
            }
        }

        Ok(SettlementOutcome {
            order_id: order.id,
            already_settled: false,
            notified,
            failures,
        })
    }
}

/// Postgres-backed store used by the webhook route.
#[derive(Clone)]
pub struct PgSettlementStore {
    pool: DbPool,
}

impl PgSettlementStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl SettlementStore for PgSettlementStore {
    async fn order_by_reference(&self, reference: &OrderRef) -> AppResult<Option<Order>> {
        let order = match reference {
            OrderRef::Internal(id) => {
                sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            OrderRef::Gateway(gateway_id) => {
                sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE gateway_reference = $1")
                    .bind(gateway_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        Ok(order)
    }

    async fn mark_paid_if_pending(&self, order_id: Uuid, payment_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'paid', payment_id = $2, updated_at = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(order_id)
        .bind(payment_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn items_for_order(&self, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn course_by_id(&self, id: Uuid) -> AppResult<Option<Course>> {
        let course = sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(course)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use chrono::Utc;

    use super::*;
    use crate::payments::signature::sign;

    const SECRET: &[u8] = b"whsec_test";

    #[derive(Default)]
    struct MemStore {
        orders: Mutex<HashMap<Uuid, Order>>,
        items: Mutex<Vec<OrderItem>>,
        users: Mutex<HashMap<Uuid, User>>,
        courses: Mutex<HashMap<Uuid, Course>>,
    }

    impl SettlementStore for Arc<MemStore> {
        async fn order_by_reference(&self, reference: &OrderRef) -> AppResult<Option<Order>> {
            let orders = self.orders.lock().unwrap();
            let found = match reference {
                OrderRef::Internal(id) => orders.get(id).cloned(),
                OrderRef::Gateway(gw) => orders
                    .values()
                    .find(|o| o.gateway_reference.as_deref() == Some(gw.as_str()))
                    .cloned(),
            };
            Ok(found)
        }

        async fn mark_paid_if_pending(&self, order_id: Uuid, payment_id: &str) -> AppResult<bool> {
            let mut orders = self.orders.lock().unwrap();
            match orders.get_mut(&order_id) {
                Some(order) if order.status == "pending" => {
                    order.status = "paid".into();
                    order.payment_id = Some(payment_id.to_string());
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => Ok(false),
            }
        }

        async fn items_for_order(&self, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
            let items = self.items.lock().unwrap();
            Ok(items
                .iter()
                .filter(|i| i.order_id == order_id)
                .cloned()
                .collect())
        }

        async fn user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
            Ok(self.users.lock().unwrap().get(&id).cloned())
        }

        async fn course_by_id(&self, id: Uuid) -> AppResult<Option<Course>> {
            Ok(self.courses.lock().unwrap().get(&id).cloned())
        }
    }

    /// Records every send; fails any send whose course title is listed.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String, String)>>,
        fail_titles: Vec<String>,
    }

    impl EntitlementNotifier for Arc<RecordingNotifier> {
        async fn send_course_access(
            &self,
            email: &str,
            _buyer_name: &str,
            course_title: &str,
            group_link: &str,
        ) -> anyhow::Result<()> {
            if self.fail_titles.iter().any(|t| t == course_title) {
                anyhow::bail!("smtp unavailable");
            }
            self.sent.lock().unwrap().push((
                email.to_string(),
                course_title.to_string(),
                group_link.to_string(),
            ));
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemStore>,
        notifier: Arc<RecordingNotifier>,
        coordinator: SettlementCoordinator<Arc<MemStore>, Arc<RecordingNotifier>>,
        order_id: Uuid,
    }

    fn fixture(course_titles: &[&str], fail_titles: &[&str]) -> Fixture {
        let store = Arc::new(MemStore::default());
        let buyer_id = Uuid::new_v4();
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        store.users.lock().unwrap().insert(
            buyer_id,
            User {
                id: buyer_id,
                name: "Asha".into(),
                email: "asha@example.com".into(),
                phone: None,
                password_hash: "x".into(),
                role: "customer".into(),
                reset_token_hash: None,
                reset_token_expires: None,
                created_at: now,
            },
        );

        let mut total = 0;
        for title in course_titles {
            let course_id = Uuid::new_v4();
            store.courses.lock().unwrap().insert(
                course_id,
                Course {
                    id: course_id,
                    title: (*title).into(),
                    level: None,
                    description: None,
                    price: 499,
                    group_link: format!("https://chat.example.com/join/{title}"),
                    created_at: now,
                },
            );
            store.items.lock().unwrap().push(OrderItem {
                id: Uuid::new_v4(),
                order_id,
                item_id: course_id,
                item_type: "course".into(),
                title: (*title).into(),
                price: 499,
                quantity: 1,
                created_at: now,
            });
            total += 499;
        }

        store.orders.lock().unwrap().insert(
            order_id,
            Order {
                id: order_id,
                user_id: buyer_id,
                total_amount: total,
                status: "pending".into(),
                payment_id: None,
                payment_method: "razorpay".into(),
                gateway_reference: Some("order_gw1".into()),
                created_at: now,
                updated_at: now,
            },
        );

        let notifier = Arc::new(RecordingNotifier {
            sent: Mutex::new(Vec::new()),
            fail_titles: fail_titles.iter().map(|s| s.to_string()).collect(),
        });

        let coordinator =
            SettlementCoordinator::new(store.clone(), notifier.clone(), SECRET.to_vec());

        Fixture {
            store,
            notifier,
            coordinator,
            order_id,
        }
    }

    fn event_body(order_id: Uuid, payment_id: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "payload": { "payment": { "entity": {
                "id": payment_id,
                "order_id": "order_gw1",
                "notes": { "orderId": order_id.to_string() }
            } } }
        }))
        .unwrap()
    }

    fn order_status(store: &MemStore, order_id: Uuid) -> (String, Option<String>) {
        let orders = store.orders.lock().unwrap();
        let order = orders.get(&order_id).unwrap();
        (order.status.clone(), order.payment_id.clone())
    }

    #[tokio::test]
    async fn settles_order_and_sends_group_link() {
        let fix = fixture(&["Masterclass"], &[]);
        let body = event_body(fix.order_id, "pay_1");
        let sig = sign(&body, SECRET);

        let outcome = fix.coordinator.settle(&body, Some(&sig)).await.unwrap();
        assert!(!outcome.already_settled);
        assert_eq!(outcome.notified, 1);
        assert!(outcome.failures.is_empty());

        let (status, payment_id) = order_status(&fix.store, fix.order_id);
        assert_eq!(status, "paid");
        assert_eq!(payment_id.as_deref(), Some("pay_1"));

        let sent = fix.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "asha@example.com");
        assert!(sent[0].2.contains("Masterclass"));
    }

    #[tokio::test]
    async fn invalid_signature_touches_nothing() {
        let fix = fixture(&["Masterclass"], &[]);
        let body = event_body(fix.order_id, "pay_1");

        let err = fix.coordinator.settle(&body, Some("deadbeef")).await;
        assert!(matches!(err, Err(SettlementError::InvalidSignature)));
        let err = fix.coordinator.settle(&body, None).await;
        assert!(matches!(err, Err(SettlementError::InvalidSignature)));

        let (status, payment_id) = order_status(&fix.store, fix.order_id);
        assert_eq!(status, "pending");
        assert_eq!(payment_id, None);
        assert!(fix.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let fix = fixture(&["Masterclass"], &[]);
        let body = event_body(fix.order_id, "pay_1");
        let sig = sign(&body, SECRET);

        let first = fix.coordinator.settle(&body, Some(&sig)).await.unwrap();
        let second = fix.coordinator.settle(&body, Some(&sig)).await.unwrap();

        assert!(!first.already_settled);
        assert!(second.already_settled);
        assert_eq!(second.notified, 0);
        assert_eq!(fix.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn already_paid_order_keeps_original_payment_id() {
        let fix = fixture(&["Masterclass"], &[]);
        let body = event_body(fix.order_id, "pay_1");
        let sig = sign(&body, SECRET);
        fix.coordinator.settle(&body, Some(&sig)).await.unwrap();

        // Redelivery carrying a different payment id.
        let body2 = event_body(fix.order_id, "pay_2");
        let sig2 = sign(&body2, SECRET);
        let outcome = fix.coordinator.settle(&body2, Some(&sig2)).await.unwrap();

        assert!(outcome.already_settled);
        let (_, payment_id) = order_status(&fix.store, fix.order_id);
        assert_eq!(payment_id.as_deref(), Some("pay_1"));
        assert_eq!(fix.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_failed_notification_does_not_abort_the_rest() {
        let fix = fixture(&["Alpha", "Beta"], &["Alpha"]);
        let body = event_body(fix.order_id, "pay_1");
        let sig = sign(&body, SECRET);

        let outcome = fix.coordinator.settle(&body, Some(&sig)).await.unwrap();
        assert!(!outcome.already_settled);
        assert_eq!(outcome.notified, 1);
        assert_eq!(outcome.failures.len(), 1);

        let (status, _) = order_status(&fix.store, fix.order_id);
        assert_eq!(status, "paid");
        let sent = fix.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Beta");
    }

    #[tokio::test]
    async fn unknown_order_is_not_found_with_zero_notifications() {
        let fix = fixture(&["Masterclass"], &[]);
        let body = event_body(Uuid::new_v4(), "pay_1");
        // Unknown internal id and no matching gateway reference either.
        let body = String::from_utf8(body)
            .unwrap()
            .replace("order_gw1", "order_other");
        let sig = sign(body.as_bytes(), SECRET);

        let err = fix.coordinator.settle(body.as_bytes(), Some(&sig)).await;
        assert!(matches!(err, Err(SettlementError::OrderNotFound)));
        assert!(fix.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolves_by_gateway_reference_when_note_is_absent() {
        let fix = fixture(&["Masterclass"], &[]);
        let body = serde_json::to_vec(&serde_json::json!({
            "payload": { "payment": { "entity": {
                "id": "pay_1",
                "order_id": "order_gw1"
            } } }
        }))
        .unwrap();
        let sig = sign(&body, SECRET);

        let outcome = fix.coordinator.settle(&body, Some(&sig)).await.unwrap();
        assert_eq!(outcome.order_id, fix.order_id);
        assert_eq!(outcome.notified, 1);
    }

    #[tokio::test]
    async fn concurrent_identical_deliveries_settle_once() {
        let fix = fixture(&["Masterclass"], &[]);
        let coordinator = Arc::new(fix.coordinator);
        let body = event_body(fix.order_id, "pay_1");
        let sig = sign(&body, SECRET);

        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let coordinator = coordinator.clone();
            let body = body.clone();
            let sig = sig.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                coordinator.settle(&body, Some(&sig)).await
            }));
        }

        let mut applied = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            if !outcome.already_settled {
                applied += 1;
            }
        }

        assert_eq!(applied, 1, "exactly one delivery applies the transition");
        assert_eq!(fix.notifier.sent.lock().unwrap().len(), 1);
        let (status, payment_id) = order_status(&fix.store, fix.order_id);
        assert_eq!(status, "paid");
        assert_eq!(payment_id.as_deref(), Some("pay_1"));
    }
}
