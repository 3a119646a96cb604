//! Order aggregate and related types.

mod aggregate;
mod pricing;
mod status;
mod value_objects;

pub use aggregate::Order;
pub use pricing::{OrderTotals, price_order};
pub use status::OrderStatus;
pub use value_objects::{LineItem, PaymentMethod};

use common::Money;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in the expected status.
    #[error("invalid status transition: cannot {action} from {current_status} status")]
    InvalidStateTransition {
        current_status: OrderStatus,
        action: &'static str,
    },

    /// Status string did not name a known status.
    #[error("unknown order status: {status}")]
    UnknownStatus { status: String },

    /// Payment method string did not name a known method.
    #[error("unknown payment method: {method}")]
    UnknownPaymentMethod { method: String },

    /// Order has no items.
    #[error("order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Invalid price.
    #[error("invalid price: {price} cents (must not be negative)")]
    InvalidPrice { price: i64 },

    /// Payment amount does not match the order total.
    #[error("payment amount {actual} does not match order total {expected}")]
    AmountMismatch { expected: Money, actual: Money },
}
