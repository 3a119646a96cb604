//! Order service orchestrating the checkout flow.

use chrono::{Duration, Utc};
use common::{Money, OrderId};
use domain::{LineItem, Order, OrderStatus, price_order};
use serde_json::json;
use store::{Store, StoreError};

use crate::commands::{CancelOrder, ChangeStatus, ConfirmPayment, CreateOrder};
use crate::error::{CheckoutError, Result};
use crate::notify::Notifier;
use crate::tasks::{TaskQueue, task_types};

/// Idempotency scopes for the guarded operations.
pub mod scopes {
    /// Scope for order creation keys.
    pub const CREATE_ORDER: &str = "create_order";

    /// Scope for payment confirmation keys.
    pub const CONFIRM_PAYMENT: &str = "confirm_payment";
}

/// Orchestrates order creation, payment confirmation, status changes,
/// and cancellation over a storage backend.
///
/// Each operation either completes fully or leaves the stores as they
/// were: stock reservation is atomic in the storage layer, and the
/// order write that follows it is compensated by releasing the
/// reserved stock if it fails. Idempotency keys guard creation and
/// payment confirmation; a key claimed by an operation that later
/// fails is released so the retry is not blocked.
///
/// Notifications and task handoffs are fire-and-forget: their failures
/// are logged and never fail the triggering operation.
#[derive(Clone)]
pub struct OrderService<S, N, Q>
where
    S: Store,
    N: Notifier,
    Q: TaskQueue,
{
    store: S,
    notifier: N,
    tasks: Q,
    idempotency_ttl: Duration,
}

impl<S, N, Q> OrderService<S, N, Q>
where
    S: Store,
    N: Notifier,
    Q: TaskQueue,
{
    /// Creates a new order service with a 24 hour idempotency TTL.
    pub fn new(store: S, notifier: N, tasks: Q) -> Self {
        Self {
            store,
            notifier,
            tasks,
            idempotency_ttl: Duration::hours(24),
        }
    }

    /// Overrides how long idempotency claims block reuse of their key.
    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    /// Creates an order: validates the request, prices it, reserves
    /// stock, and persists the aggregate in `PendingPayment` status.
    ///
    /// Requests for unknown or inactive products and zero quantities
    /// are dropped rather than failing the order; a stock shortfall on
    /// any surviving item fails the whole order with nothing reserved.
    #[tracing::instrument(skip(self, cmd), fields(user_id = %cmd.user_id))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<Order> {
        metrics::counter!("order_create_attempts_total").increment(1);
        let started = std::time::Instant::now();

        let claimed_key = match cmd.idempotency_key.as_deref() {
            Some(key) => {
                if !self
                    .store
                    .try_claim(scopes::CREATE_ORDER, key, self.idempotency_ttl)
                    .await?
                {
                    metrics::counter!("idempotency_duplicate_hits_total").increment(1);
                    tracing::info!(key, "duplicate order creation rejected");
                    return Err(CheckoutError::DuplicateOperation {
                        scope: scopes::CREATE_ORDER.to_string(),
                        key: key.to_string(),
                    });
                }
                Some(key)
            }
            None => None,
        };

        let result = self.create_order_inner(&cmd).await;

        if result.is_err()
            && let Some(key) = claimed_key
        {
            self.release_claim(scopes::CREATE_ORDER, key).await;
        }

        metrics::histogram!("order_creation_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn create_order_inner(&self, cmd: &CreateOrder) -> Result<Order> {
        let user = self
            .store
            .get_user(cmd.user_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("user", cmd.user_id))?;

        let address = self
            .store
            .get_address(cmd.address_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("address", cmd.address_id))?;
        if !address.belongs_to(user.id) {
            return Err(CheckoutError::InvalidInput(format!(
                "address {} does not belong to user {}",
                address.id, user.id
            )));
        }

        if cmd.items.is_empty() {
            return Err(CheckoutError::InvalidInput("order has no items".to_string()));
        }

        // Tolerant filter: bad item requests are dropped, not fatal.
        let mut items = Vec::with_capacity(cmd.items.len());
        for request in &cmd.items {
            if request.quantity == 0 {
                tracing::warn!(product_id = %request.product_id, "dropping zero-quantity item");
                continue;
            }
            match self.store.get_product(request.product_id).await? {
                Some(product) if product.is_orderable() => {
                    items.push(LineItem::new(
                        product.id,
                        product.name,
                        product.unit_price,
                        request.quantity,
                    ));
                }
                Some(_) => {
                    tracing::warn!(product_id = %request.product_id, "dropping inactive product");
                }
                None => {
                    tracing::warn!(product_id = %request.product_id, "dropping unknown product");
                }
            }
        }
        if items.is_empty() {
            return Err(CheckoutError::InvalidInput("no valid items".to_string()));
        }

        // An unknown coupon id is ignored, like an invalid item.
        let coupon = match cmd.coupon_id {
            Some(id) => {
                let coupon = self.store.get_coupon(id).await?;
                if coupon.is_none() {
                    tracing::warn!(coupon_id = %id, "coupon not found, ordering without discount");
                }
                coupon
            }
            None => None,
        };

        let now = Utc::now();
        let totals = price_order(&items, coupon.as_ref(), Money::zero(), now);
        let order = Order::create(
            cmd.user_id,
            cmd.address_id,
            coupon.map(|c| c.id),
            items,
            totals,
            now,
        )?;

        let demand = order.stock_demand();
        match self.store.reserve_stock(&demand).await {
            Ok(()) => {}
            Err(StoreError::InsufficientStock {
                product_name,
                available,
                ..
            }) => {
                return Err(CheckoutError::InsufficientStock {
                    product_name,
                    available,
                });
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.store.save_order(&order).await {
            // The stock is reserved but the order write failed; put the
            // stock back before surfacing the error.
            if let Err(release_err) = self.store.release_stock(&demand).await {
                tracing::error!(
                    order_id = %order.id,
                    error = %release_err,
                    "failed to release stock after order write failure"
                );
            }
            return Err(e.into());
        }

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            items = order.items.len(),
            total = %order.total,
            "order created"
        );

        self.send_notice(
            &user.email,
            order.id,
            format!("Order {} placed, total {}", order.id, order.total),
        )
        .await;
        self.enqueue_task(
            task_types::ORDER_CREATED,
            json!({
                "order_id": order.id,
                "user_id": order.user_id,
                "total_cents": order.total.cents(),
            }),
        )
        .await;

        Ok(order)
    }

    /// Confirms payment of an order, moving it from `PendingPayment`
    /// to `Paid`.
    ///
    /// When the command carries an idempotency key that was already
    /// used, the order is returned as stored without reprocessing: the
    /// first confirmation's effect is the stored aggregate itself.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn confirm_payment(&self, cmd: ConfirmPayment) -> Result<Order> {
        let order = self
            .store
            .get_order(cmd.order_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("order", cmd.order_id))?;

        let claimed_key = match cmd.idempotency_key.as_deref() {
            Some(key) => {
                if !self
                    .store
                    .try_claim(scopes::CONFIRM_PAYMENT, key, self.idempotency_ttl)
                    .await?
                {
                    metrics::counter!("idempotency_duplicate_hits_total").increment(1);
                    tracing::info!(key, "duplicate payment confirmation replayed");
                    return Ok(order);
                }
                Some(key)
            }
            None => None,
        };

        let result = self.confirm_payment_inner(order, &cmd).await;

        if result.is_err()
            && let Some(key) = claimed_key
        {
            self.release_claim(scopes::CONFIRM_PAYMENT, key).await;
        }

        result
    }

    async fn confirm_payment_inner(&self, mut order: Order, cmd: &ConfirmPayment) -> Result<Order> {
        order.confirm_payment(cmd.method, cmd.amount, Utc::now())?;
        self.store.save_order(&order).await?;

        metrics::counter!("payments_confirmed_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            method = %cmd.method,
            amount = %cmd.amount,
            "payment confirmed"
        );

        self.notify_owner(&order, format!("Payment received for order {}", order.id))
            .await;
        self.enqueue_task(
            task_types::PAYMENT_CONFIRMED,
            json!({
                "order_id": order.id,
                "method": cmd.method.as_str(),
                "amount_cents": cmd.amount.cents(),
            }),
        )
        .await;

        Ok(order)
    }

    /// Moves an order to a new status along the transition graph.
    ///
    /// `Cancelled` is not reachable here; cancellation goes through
    /// [`cancel_order`](Self::cancel_order) so stock restoration
    /// cannot be skipped.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, status = %cmd.status))]
    pub async fn change_status(&self, cmd: ChangeStatus) -> Result<Order> {
        let mut order = self
            .store
            .get_order(cmd.order_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("order", cmd.order_id))?;

        if cmd.status == OrderStatus::Cancelled {
            return Err(CheckoutError::InvalidInput(
                "cancellation must go through cancel_order".to_string(),
            ));
        }

        order.change_status(cmd.status, Utc::now())?;
        self.store.save_order(&order).await?;

        metrics::counter!("order_status_changes_total").increment(1);
        tracing::info!(order_id = %order.id, status = %order.status, "order status changed");

        Ok(order)
    }

    /// Cancels an order and restores the stock its line items reserved.
    ///
    /// Legal from any non-terminal status. The aggregate's terminal
    /// gate makes a second cancellation fail before any restoration
    /// runs, so stock is restored exactly once.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn cancel_order(&self, cmd: CancelOrder) -> Result<()> {
        let mut order = self
            .store
            .get_order(cmd.order_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("order", cmd.order_id))?;

        order.cancel(Utc::now())?;
        self.store.save_order(&order).await?;
        self.store.release_stock(&order.stock_demand()).await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(order_id = %order.id, "order cancelled");

        self.notify_owner(&order, format!("Order {} was cancelled", order.id))
            .await;
        self.enqueue_task(
            task_types::ORDER_CANCELLED,
            json!({ "order_id": order.id }),
        )
        .await;

        Ok(())
    }

    /// Retrieves an order by id.
    pub async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.store.get_order(id).await?)
    }

    /// Lists all orders, oldest first.
    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        Ok(self.store.list_orders().await?)
    }

    /// Releases a claim taken by an operation that failed, so a retry
    /// can use the same key.
    async fn release_claim(&self, scope: &str, key: &str) {
        if let Err(e) = self.store.release(scope, key).await {
            tracing::warn!(scope, key, error = %e, "failed to release idempotency claim");
        }
    }

    async fn send_notice(&self, email: &str, order_id: OrderId, message: String) {
        if let Err(e) = self.notifier.notify(email, &message).await {
            tracing::warn!(order_id = %order_id, error = %e, "notification failed");
        }
    }

    /// Notifies the order's owner, swallowing lookup and delivery
    /// failures.
    async fn notify_owner(&self, order: &Order, message: String) {
        match self.store.get_user(order.user_id).await {
            Ok(Some(user)) => self.send_notice(&user.email, order.id, message).await,
            Ok(None) => {
                tracing::warn!(order_id = %order.id, "order owner missing, notice skipped");
            }
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "owner lookup failed, notice skipped");
            }
        }
    }

    async fn enqueue_task(&self, task_type: &str, payload: serde_json::Value) {
        if let Err(e) = self.tasks.enqueue(task_type, payload).await {
            tracing::warn!(task_type, error = %e, "task enqueue failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use common::{AddressId, CouponId, ProductId, UserId};
    use domain::{Address, Coupon, CouponCode, OrderError, PaymentMethod, Product, User};
    use rust_decimal::Decimal;
    use store::{
        AddressStore, CatalogStore, CouponStore, IdempotencyStore, MemoryStore, OrderStore,
        Result as StoreResult, UserStore,
    };

    use crate::commands::ItemRequest;
    use crate::notify::InMemoryNotifier;
    use crate::tasks::InMemoryTaskQueue;

    type TestService = OrderService<MemoryStore, InMemoryNotifier, InMemoryTaskQueue>;

    fn setup() -> (TestService, MemoryStore, InMemoryNotifier, InMemoryTaskQueue) {
        let store = MemoryStore::new();
        let notifier = InMemoryNotifier::new();
        let tasks = InMemoryTaskQueue::new();
        let service = OrderService::new(store.clone(), notifier.clone(), tasks.clone());
        (service, store, notifier, tasks)
    }

    async fn seed_user(store: &MemoryStore) -> (User, Address) {
        let user = User::new("Ada", "ada@example.com");
        store.save_user(&user).await.unwrap();
        let address = Address::new(user.id, "1 Main St", "Springfield", "12345", "US");
        store.save_address(&address).await.unwrap();
        (user, address)
    }

    async fn seed_product(store: &MemoryStore, name: &str, cents: i64, stock: u32) -> Product {
        let product = Product::new(name, Money::from_cents(cents), stock);
        store.save_product(&product).await.unwrap();
        product
    }

    async fn place_order(service: &TestService, store: &MemoryStore, stock: u32) -> Order {
        let (user, address) = seed_user(store).await;
        let product = seed_product(store, "Widget", 1_000, stock).await;
        service
            .create_order(CreateOrder::new(
                user.id,
                address.id,
                vec![ItemRequest::new(product.id, 1)],
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_order_happy_path() {
        let (service, store, notifier, tasks) = setup();
        let (user, address) = seed_user(&store).await;
        let widget = seed_product(&store, "Widget", 1_000, 5).await;
        let gadget = seed_product(&store, "Gadget", 2_500, 3).await;

        let order = service
            .create_order(CreateOrder::new(
                user.id,
                address.id,
                vec![ItemRequest::new(widget.id, 2), ItemRequest::new(gadget.id, 1)],
            ))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert_eq!(order.subtotal, Money::from_cents(4_500));
        assert_eq!(order.discount, Money::zero());
        assert_eq!(order.total, Money::from_cents(4_500));
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].product_id, widget.id);
        assert_eq!(order.items[1].product_id, gadget.id);

        assert_eq!(store.stock_of(widget.id).await, Some(3));
        assert_eq!(store.stock_of(gadget.id).await, Some(2));
        assert!(store.get_order(order.id).await.unwrap().is_some());

        assert_eq!(notifier.sent_count(), 1);
        assert_eq!(notifier.last_recipient().as_deref(), Some("ada@example.com"));
        assert_eq!(tasks.tasks_of_type(task_types::ORDER_CREATED).len(), 1);
    }

    #[tokio::test]
    async fn test_create_order_unknown_user() {
        let (service, store, _, _) = setup();
        let widget = seed_product(&store, "Widget", 1_000, 5).await;

        let result = service
            .create_order(CreateOrder::new(
                UserId::new(),
                AddressId::new(),
                vec![ItemRequest::new(widget.id, 1)],
            ))
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::NotFound { entity: "user", .. })
        ));
    }

    #[tokio::test]
    async fn test_create_order_unknown_address() {
        let (service, store, _, _) = setup();
        let (user, _) = seed_user(&store).await;
        let widget = seed_product(&store, "Widget", 1_000, 5).await;

        let result = service
            .create_order(CreateOrder::new(
                user.id,
                AddressId::new(),
                vec![ItemRequest::new(widget.id, 1)],
            ))
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::NotFound {
                entity: "address",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_create_order_foreign_address_rejected() {
        let (service, store, _, _) = setup();
        let (user, _) = seed_user(&store).await;
        let stranger = User::new("Eve", "eve@example.com");
        store.save_user(&stranger).await.unwrap();
        let foreign = Address::new(stranger.id, "9 Side St", "Shelbyville", "54321", "US");
        store.save_address(&foreign).await.unwrap();
        let widget = seed_product(&store, "Widget", 1_000, 5).await;

        let result = service
            .create_order(CreateOrder::new(
                user.id,
                foreign.id,
                vec![ItemRequest::new(widget.id, 1)],
            ))
            .await;

        assert!(matches!(result, Err(CheckoutError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_create_order_empty_items() {
        let (service, store, _, _) = setup();
        let (user, address) = seed_user(&store).await;

        let result = service
            .create_order(CreateOrder::new(user.id, address.id, vec![]))
            .await;

        assert!(matches!(result, Err(CheckoutError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_create_order_drops_invalid_items() {
        let (service, store, _, _) = setup();
        let (user, address) = seed_user(&store).await;
        let widget = seed_product(&store, "Widget", 1_000, 5).await;
        let mut retired = Product::new("Retired", Money::from_cents(9_900), 5);
        retired.active = false;
        store.save_product(&retired).await.unwrap();

        let order = service
            .create_order(CreateOrder::new(
                user.id,
                address.id,
                vec![
                    ItemRequest::new(ProductId::new(), 1), // unknown
                    ItemRequest::new(retired.id, 1),       // inactive
                    ItemRequest::new(widget.id, 0),        // zero quantity
                    ItemRequest::new(widget.id, 2),
                ],
            ))
            .await
            .unwrap();

        // Only the last request survived the filter.
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].product_id, widget.id);
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(order.subtotal, Money::from_cents(2_000));
        assert_eq!(store.stock_of(retired.id).await, Some(5));
    }

    #[tokio::test]
    async fn test_create_order_all_items_dropped() {
        let (service, store, _, _) = setup();
        let (user, address) = seed_user(&store).await;
        let widget = seed_product(&store, "Widget", 1_000, 5).await;

        let result = service
            .create_order(CreateOrder::new(
                user.id,
                address.id,
                vec![
                    ItemRequest::new(ProductId::new(), 3),
                    ItemRequest::new(widget.id, 0),
                ],
            ))
            .await;

        assert!(matches!(result, Err(CheckoutError::InvalidInput(_))));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_order_insufficient_stock() {
        let (service, store, notifier, _) = setup();
        let (user, address) = seed_user(&store).await;
        let plenty = seed_product(&store, "Widget", 1_000, 10).await;
        let scarce = seed_product(&store, "Gadget", 2_500, 1).await;

        let result = service
            .create_order(CreateOrder::new(
                user.id,
                address.id,
                vec![ItemRequest::new(plenty.id, 2), ItemRequest::new(scarce.id, 3)],
            ))
            .await;

        match result {
            Err(CheckoutError::InsufficientStock {
                product_name,
                available,
            }) => {
                assert_eq!(product_name, "Gadget");
                assert_eq!(available, 1);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        // Nothing was decremented, persisted, or announced.
        assert_eq!(store.stock_of(plenty.id).await, Some(10));
        assert_eq!(store.stock_of(scarce.id).await, Some(1));
        assert_eq!(store.order_count().await, 0);
        assert_eq!(notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_create_order_applies_coupon() {
        let (service, store, _, _) = setup();
        let (user, address) = seed_user(&store).await;
        let widget = seed_product(&store, "Widget", 1_000, 5).await;
        let coupon = Coupon::percentage("SAVE10", Decimal::from(10), None).unwrap();
        store.save_coupon(&coupon).await.unwrap();

        let order = service
            .create_order(
                CreateOrder::new(user.id, address.id, vec![ItemRequest::new(widget.id, 2)])
                    .with_coupon(coupon.id),
            )
            .await
            .unwrap();

        assert_eq!(order.subtotal, Money::from_cents(2_000));
        assert_eq!(order.discount, Money::from_cents(200));
        assert_eq!(order.total, Money::from_cents(1_800));
        assert_eq!(order.coupon_id, Some(coupon.id));
    }

    #[tokio::test]
    async fn test_create_order_ignores_unknown_coupon() {
        let (service, store, _, _) = setup();
        let (user, address) = seed_user(&store).await;
        let widget = seed_product(&store, "Widget", 1_000, 5).await;

        let order = service
            .create_order(
                CreateOrder::new(user.id, address.id, vec![ItemRequest::new(widget.id, 1)])
                    .with_coupon(CouponId::new()),
            )
            .await
            .unwrap();

        assert_eq!(order.discount, Money::zero());
        assert_eq!(order.coupon_id, None);
        assert_eq!(order.total, Money::from_cents(1_000));
    }

    #[tokio::test]
    async fn test_create_order_duplicate_key_rejected() {
        let (service, store, _, _) = setup();
        let (user, address) = seed_user(&store).await;
        let widget = seed_product(&store, "Widget", 1_000, 10).await;

        let cmd = CreateOrder::new(user.id, address.id, vec![ItemRequest::new(widget.id, 1)])
            .with_idempotency_key("req-1");
        service.create_order(cmd.clone()).await.unwrap();

        let result = service.create_order(cmd).await;
        assert!(matches!(
            result,
            Err(CheckoutError::DuplicateOperation { .. })
        ));

        // Only the first request took effect.
        assert_eq!(store.order_count().await, 1);
        assert_eq!(store.stock_of(widget.id).await, Some(9));
    }

    #[tokio::test]
    async fn test_create_order_failure_releases_claim() {
        let (service, store, _, _) = setup();
        let (user, address) = seed_user(&store).await;
        let widget = seed_product(&store, "Widget", 1_000, 1).await;

        let result = service
            .create_order(
                CreateOrder::new(user.id, address.id, vec![ItemRequest::new(widget.id, 5)])
                    .with_idempotency_key("req-1"),
            )
            .await;
        assert!(matches!(result, Err(CheckoutError::InsufficientStock { .. })));

        // The failed attempt must not poison the key for the retry.
        let order = service
            .create_order(
                CreateOrder::new(user.id, address.id, vec![ItemRequest::new(widget.id, 1)])
                    .with_idempotency_key("req-1"),
            )
            .await
            .unwrap();
        assert_eq!(store.stock_of(widget.id).await, Some(0));
        assert!(store.get_order(order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_order_write_failure_releases_stock() {
        let memory = MemoryStore::new();
        let flaky = FlakyStore::new(memory.clone());
        let service = OrderService::new(
            flaky.clone(),
            InMemoryNotifier::new(),
            InMemoryTaskQueue::new(),
        );
        let (user, address) = seed_user(&memory).await;
        let widget = seed_product(&memory, "Widget", 1_000, 5).await;

        flaky.set_fail_on_save_order(true);
        let result = service
            .create_order(CreateOrder::new(
                user.id,
                address.id,
                vec![ItemRequest::new(widget.id, 2)],
            ))
            .await;

        assert!(matches!(result, Err(CheckoutError::Store(_))));
        // The reservation was compensated.
        assert_eq!(memory.stock_of(widget.id).await, Some(5));
        assert_eq!(memory.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_collaborator_failures_do_not_fail_order() {
        let (service, store, notifier, tasks) = setup();
        let (user, address) = seed_user(&store).await;
        let widget = seed_product(&store, "Widget", 1_000, 5).await;
        notifier.set_fail_on_notify(true);
        tasks.set_fail_on_enqueue(true);

        let order = service
            .create_order(CreateOrder::new(
                user.id,
                address.id,
                vec![ItemRequest::new(widget.id, 1)],
            ))
            .await
            .unwrap();

        assert!(store.get_order(order.id).await.unwrap().is_some());
        assert_eq!(store.stock_of(widget.id).await, Some(4));
        assert_eq!(notifier.sent_count(), 0);
        assert_eq!(tasks.task_count(), 0);
    }

    #[tokio::test]
    async fn test_confirm_payment_happy_path() {
        let (service, store, notifier, tasks) = setup();
        let order = place_order(&service, &store, 5).await;

        let confirmed = service
            .confirm_payment(ConfirmPayment::new(
                order.id,
                PaymentMethod::CreditCard,
                order.total,
            ))
            .await
            .unwrap();

        assert_eq!(confirmed.status, OrderStatus::Paid);
        assert_eq!(confirmed.payment_method, Some(PaymentMethod::CreditCard));

        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(tasks.tasks_of_type(task_types::PAYMENT_CONFIRMED).len(), 1);
        // One notice for creation, one for payment.
        assert_eq!(notifier.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_confirm_payment_unknown_order() {
        let (service, _, _, _) = setup();

        let result = service
            .confirm_payment(ConfirmPayment::new(
                OrderId::new(),
                PaymentMethod::Wallet,
                Money::from_cents(100),
            ))
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::NotFound { entity: "order", .. })
        ));
    }

    #[tokio::test]
    async fn test_confirm_payment_wrong_amount() {
        let (service, store, _, tasks) = setup();
        let order = place_order(&service, &store, 5).await;

        let result = service
            .confirm_payment(ConfirmPayment::new(
                order.id,
                PaymentMethod::Wallet,
                order.total - Money::from_cents(1),
            ))
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::Order(OrderError::AmountMismatch { .. }))
        ));
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::PendingPayment);
        assert_eq!(tasks.tasks_of_type(task_types::PAYMENT_CONFIRMED).len(), 0);
    }

    #[tokio::test]
    async fn test_confirm_payment_twice_without_key_fails() {
        let (service, store, _, _) = setup();
        let order = place_order(&service, &store, 5).await;

        let cmd = ConfirmPayment::new(order.id, PaymentMethod::Wallet, order.total);
        service.confirm_payment(cmd.clone()).await.unwrap();

        let result = service.confirm_payment(cmd).await;
        assert!(matches!(
            result,
            Err(CheckoutError::Order(OrderError::InvalidStateTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_confirm_payment_duplicate_key_replays_result() {
        let (service, store, _, tasks) = setup();
        let order = place_order(&service, &store, 5).await;

        let cmd = ConfirmPayment::new(order.id, PaymentMethod::Wallet, order.total)
            .with_idempotency_key("pay-1");
        let first = service.confirm_payment(cmd.clone()).await.unwrap();
        let second = service.confirm_payment(cmd).await.unwrap();

        assert_eq!(first.status, OrderStatus::Paid);
        assert_eq!(second.status, OrderStatus::Paid);
        assert_eq!(second.updated_at, first.updated_at);
        // The duplicate was replayed, not reprocessed.
        assert_eq!(tasks.tasks_of_type(task_types::PAYMENT_CONFIRMED).len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_payment_failure_releases_claim() {
        let (service, store, _, _) = setup();
        let order = place_order(&service, &store, 5).await;

        let result = service
            .confirm_payment(
                ConfirmPayment::new(
                    order.id,
                    PaymentMethod::Wallet,
                    order.total - Money::from_cents(1),
                )
                .with_idempotency_key("pay-1"),
            )
            .await;
        assert!(matches!(result, Err(CheckoutError::Order(_))));

        // The key is free again for the corrected retry.
        let confirmed = service
            .confirm_payment(
                ConfirmPayment::new(order.id, PaymentMethod::Wallet, order.total)
                    .with_idempotency_key("pay-1"),
            )
            .await
            .unwrap();
        assert_eq!(confirmed.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_change_status_moves_paid_to_completed() {
        let (service, store, _, _) = setup();
        let order = place_order(&service, &store, 5).await;
        service
            .confirm_payment(ConfirmPayment::new(
                order.id,
                PaymentMethod::Wallet,
                order.total,
            ))
            .await
            .unwrap();

        let completed = service
            .change_status(ChangeStatus::new(order.id, OrderStatus::Completed))
            .await
            .unwrap();

        assert_eq!(completed.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_change_status_rejects_illegal_transition() {
        let (service, store, _, _) = setup();
        let order = place_order(&service, &store, 5).await;

        // Pending orders cannot jump straight to completed.
        let result = service
            .change_status(ChangeStatus::new(order.id, OrderStatus::Completed))
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::Order(OrderError::InvalidStateTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_change_status_rejects_cancelled_target() {
        let (service, store, _, _) = setup();
        let order = place_order(&service, &store, 5).await;

        let result = service
            .change_status(ChangeStatus::new(order.id, OrderStatus::Cancelled))
            .await;

        assert!(matches!(result, Err(CheckoutError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_cancel_order_restores_stock() {
        let (service, store, _, tasks) = setup();
        let (user, address) = seed_user(&store).await;
        let widget = seed_product(&store, "Widget", 1_000, 5).await;
        let gadget = seed_product(&store, "Gadget", 2_500, 4).await;

        let order = service
            .create_order(CreateOrder::new(
                user.id,
                address.id,
                vec![ItemRequest::new(widget.id, 3), ItemRequest::new(gadget.id, 2)],
            ))
            .await
            .unwrap();
        assert_eq!(store.stock_of(widget.id).await, Some(2));
        assert_eq!(store.stock_of(gadget.id).await, Some(2));

        service.cancel_order(CancelOrder::new(order.id)).await.unwrap();

        assert_eq!(store.stock_of(widget.id).await, Some(5));
        assert_eq!(store.stock_of(gadget.id).await, Some(4));
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(tasks.tasks_of_type(task_types::ORDER_CANCELLED).len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_order_twice_does_not_double_restore() {
        let (service, store, _, _) = setup();
        let (user, address) = seed_user(&store).await;
        let widget = seed_product(&store, "Widget", 1_000, 5).await;

        let order = service
            .create_order(CreateOrder::new(
                user.id,
                address.id,
                vec![ItemRequest::new(widget.id, 2)],
            ))
            .await
            .unwrap();

        service.cancel_order(CancelOrder::new(order.id)).await.unwrap();
        assert_eq!(store.stock_of(widget.id).await, Some(5));

        let result = service.cancel_order(CancelOrder::new(order.id)).await;
        assert!(matches!(
            result,
            Err(CheckoutError::Order(OrderError::InvalidStateTransition { .. }))
        ));
        assert_eq!(store.stock_of(widget.id).await, Some(5));
    }

    #[tokio::test]
    async fn test_get_and_list_orders() {
        let (service, store, _, _) = setup();
        let order = place_order(&service, &store, 5).await;

        let fetched = service.get_order(order.id).await.unwrap();
        assert_eq!(fetched.map(|o| o.id), Some(order.id));
        assert!(service.get_order(OrderId::new()).await.unwrap().is_none());

        let all = service.list_orders().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    /// Store wrapper whose order writes can be made to fail, for
    /// exercising the compensation path.
    #[derive(Clone)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_on_save_order: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                fail_on_save_order: Arc::new(AtomicBool::new(false)),
            }
        }

        fn set_fail_on_save_order(&self, fail: bool) {
            self.fail_on_save_order.store(fail, Ordering::SeqCst);
        }

        fn write_error() -> StoreError {
            let err = serde_json::from_str::<serde_json::Value>("").unwrap_err();
            StoreError::Serialization(err)
        }
    }

    #[async_trait]
    impl CatalogStore for FlakyStore {
        async fn get_product(&self, id: ProductId) -> StoreResult<Option<Product>> {
            self.inner.get_product(id).await
        }

        async fn save_product(&self, product: &Product) -> StoreResult<()> {
            self.inner.save_product(product).await
        }

        async fn reserve_stock(&self, demand: &[(ProductId, u32)]) -> StoreResult<()> {
            self.inner.reserve_stock(demand).await
        }

        async fn release_stock(&self, demand: &[(ProductId, u32)]) -> StoreResult<()> {
            self.inner.release_stock(demand).await
        }
    }

    #[async_trait]
    impl UserStore for FlakyStore {
        async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
            self.inner.get_user(id).await
        }

        async fn save_user(&self, user: &User) -> StoreResult<()> {
            self.inner.save_user(user).await
        }
    }

    #[async_trait]
    impl AddressStore for FlakyStore {
        async fn get_address(&self, id: AddressId) -> StoreResult<Option<Address>> {
            self.inner.get_address(id).await
        }

        async fn save_address(&self, address: &Address) -> StoreResult<()> {
            self.inner.save_address(address).await
        }
    }

    #[async_trait]
    impl CouponStore for FlakyStore {
        async fn get_coupon(&self, id: CouponId) -> StoreResult<Option<Coupon>> {
            self.inner.get_coupon(id).await
        }

        async fn get_coupon_by_code(&self, code: &CouponCode) -> StoreResult<Option<Coupon>> {
            self.inner.get_coupon_by_code(code).await
        }

        async fn save_coupon(&self, coupon: &Coupon) -> StoreResult<()> {
            self.inner.save_coupon(coupon).await
        }
    }

    #[async_trait]
    impl OrderStore for FlakyStore {
        async fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
            self.inner.get_order(id).await
        }

        async fn save_order(&self, order: &Order) -> StoreResult<()> {
            if self.fail_on_save_order.load(Ordering::SeqCst) {
                return Err(Self::write_error());
            }
            self.inner.save_order(order).await
        }

        async fn list_orders(&self) -> StoreResult<Vec<Order>> {
            self.inner.list_orders().await
        }
    }

    #[async_trait]
    impl IdempotencyStore for FlakyStore {
        async fn try_claim(&self, scope: &str, key: &str, ttl: Duration) -> StoreResult<bool> {
            self.inner.try_claim(scope, key, ttl).await
        }

        async fn release(&self, scope: &str, key: &str) -> StoreResult<()> {
            self.inner.release(scope, key).await
        }

        async fn purge_expired(&self) -> StoreResult<u64> {
            self.inner.purge_expired().await
        }
    }
}
