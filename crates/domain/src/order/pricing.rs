//! Order pricing.

use chrono::{DateTime, Utc};
use common::Money;
use serde::{Deserialize, Serialize};

use crate::coupon::{Coupon, compute_discount};

use super::LineItem;

/// The priced breakdown of an order.
///
/// Always satisfies `total = subtotal - discount + shipping` and
/// `0 <= discount <= subtotal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    /// Sum of all line totals.
    pub subtotal: Money,

    /// Discount granted by the coupon, if any.
    pub discount: Money,

    /// Shipping charge.
    pub shipping: Money,

    /// Amount the user pays.
    pub total: Money,
}

/// Prices a set of line items.
///
/// The subtotal is the sum of the line totals, the discount comes from
/// the coupon (zero when absent or not applicable), and the total adds
/// the shipping charge on top.
pub fn price_order(
    items: &[LineItem],
    coupon: Option<&Coupon>,
    shipping: Money,
    now: DateTime<Utc>,
) -> OrderTotals {
    let subtotal: Money = items.iter().map(LineItem::total_price).sum();
    let discount = compute_discount(subtotal, coupon, now);
    let total = subtotal - discount + shipping;

    OrderTotals {
        subtotal,
        discount,
        shipping,
        total,
    }
}
