//! Order service commands.

use common::{AddressId, CouponId, Money, OrderId, ProductId, UserId};
use domain::{OrderStatus, PaymentMethod};
use serde::{Deserialize, Serialize};

/// One requested product and quantity on a new order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    /// The product to order.
    pub product_id: ProductId,

    /// How many units to order.
    pub quantity: u32,
}

impl ItemRequest {
    /// Creates a new item request.
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Command to create a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrder {
    /// The user placing the order.
    pub user_id: UserId,

    /// The shipping address for the order.
    pub address_id: AddressId,

    /// The requested products and quantities.
    pub items: Vec<ItemRequest>,

    /// Coupon to apply, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<CouponId>,

    /// Caller-supplied token guarding against duplicate submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl CreateOrder {
    /// Creates a new CreateOrder command without a coupon.
    pub fn new(user_id: UserId, address_id: AddressId, items: Vec<ItemRequest>) -> Self {
        Self {
            user_id,
            address_id,
            items,
            coupon_id: None,
            idempotency_key: None,
        }
    }

    /// Applies a coupon to the order.
    pub fn with_coupon(mut self, coupon_id: CouponId) -> Self {
        self.coupon_id = Some(coupon_id);
        self
    }

    /// Guards the command with an idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Command to confirm payment of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmPayment {
    /// The order being paid.
    pub order_id: OrderId,

    /// How the order was paid.
    pub method: PaymentMethod,

    /// The amount paid; must equal the order total.
    pub amount: Money,

    /// Caller-supplied token guarding against duplicate confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl ConfirmPayment {
    /// Creates a new ConfirmPayment command.
    pub fn new(order_id: OrderId, method: PaymentMethod, amount: Money) -> Self {
        Self {
            order_id,
            method,
            amount,
            idempotency_key: None,
        }
    }

    /// Guards the command with an idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Command to move an order to a new status.
///
/// Cancellation is not reachable through this command; it goes through
/// `CancelOrder` so stock restoration cannot be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    /// The order to move.
    pub order_id: OrderId,

    /// The target status.
    pub status: OrderStatus,
}

impl ChangeStatus {
    /// Creates a new ChangeStatus command.
    pub fn new(order_id: OrderId, status: OrderStatus) -> Self {
        Self { order_id, status }
    }
}

/// Command to cancel an order and restore its stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    /// The order to cancel.
    pub order_id: OrderId,
}

impl CancelOrder {
    /// Creates a new CancelOrder command.
    pub fn new(order_id: OrderId) -> Self {
        Self { order_id }
    }
}
