//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AddressId, CouponId, Money, OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{LineItem, OrderError, OrderStatus, OrderTotals, PaymentMethod};

/// Order aggregate root.
///
/// Line items and prices are fixed at creation; only the status, the
/// payment method, and the updated-at timestamp change afterwards, and
/// only through the transition methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    pub id: OrderId,

    /// User who placed the order.
    pub user_id: UserId,

    /// Shipping address chosen for the order.
    pub address_id: AddressId,

    /// Coupon applied at creation, if any.
    pub coupon_id: Option<CouponId>,

    /// Current status of the order.
    pub status: OrderStatus,

    /// Payment method, recorded when payment is confirmed.
    pub payment_method: Option<PaymentMethod>,

    /// Items in the order, in the order they were requested.
    pub items: Vec<LineItem>,

    /// Sum of all line totals.
    pub subtotal: Money,

    /// Discount applied at creation.
    pub discount: Money,

    /// Shipping charge.
    pub shipping: Money,

    /// Amount the user pays.
    pub total: Money,

    /// When the order was created.
    pub created_at: DateTime<Utc>,

    /// When the order was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new order in `PendingPayment` status.
    ///
    /// Items must be non-empty, with positive quantities and
    /// non-negative prices; the totals come from `price_order`.
    pub fn create(
        user_id: UserId,
        address_id: AddressId,
        coupon_id: Option<CouponId>,
        items: Vec<LineItem>,
        totals: OrderTotals,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    price: item.unit_price.cents(),
                });
            }
        }

        Ok(Self {
            id: OrderId::new(),
            user_id,
            address_id,
            coupon_id,
            status: OrderStatus::PendingPayment,
            payment_method: None,
            items,
            subtotal: totals.subtotal,
            discount: totals.discount,
            shipping: totals.shipping,
            total: totals.total,
            created_at: now,
            updated_at: now,
        })
    }

    /// Confirms payment of the full order total.
    ///
    /// Legal only from `PendingPayment`; records the payment method
    /// and moves the order to `Paid`. The paid amount must match the
    /// order total exactly.
    pub fn confirm_payment(
        &mut self,
        method: PaymentMethod,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if !self.status.can_confirm_payment() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "confirm payment",
            });
        }
        if amount != self.total {
            return Err(OrderError::AmountMismatch {
                expected: self.total,
                actual: amount,
            });
        }

        self.payment_method = Some(method);
        self.status = OrderStatus::Paid;
        self.updated_at = now;
        Ok(())
    }

    /// Completes the order.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_complete() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "complete",
            });
        }

        self.status = OrderStatus::Completed;
        self.updated_at = now;
        Ok(())
    }

    /// Cancels the order.
    ///
    /// Legal from any non-terminal status. The caller is responsible
    /// for restoring reserved stock; the status gate here is what
    /// ensures that happens at most once.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "cancel",
            });
        }

        self.status = OrderStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// Moves the order to `target` if the state machine permits it.
    pub fn change_status(
        &mut self,
        target: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if !self.status.can_transition_to(target) {
            let action = match target {
                OrderStatus::PendingPayment => "reopen",
                OrderStatus::Paid => "mark paid",
                OrderStatus::Completed => "complete",
                OrderStatus::Cancelled => "cancel",
            };
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action,
            });
        }

        self.status = target;
        self.updated_at = now;
        Ok(())
    }

    /// Returns the quantities to reserve or restore, one entry per line.
    pub fn stock_demand(&self) -> Vec<(common::ProductId, u32)> {
        self.items
            .iter()
            .map(|item| (item.product_id, item.quantity))
            .collect()
    }

    /// Returns the total quantity of all items.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Returns true if the order is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
