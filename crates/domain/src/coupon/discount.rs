//! Discount computation.
//!
//! `compute_discount` is the single entry point the pricing code uses.
//! It is pure: the evaluation instant comes in as a parameter so the
//! validity window is testable without a clock.

use chrono::{DateTime, Utc};
use common::Money;
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};

use super::{Coupon, DiscountKind};

/// Computes the discount a coupon grants on a subtotal.
///
/// Returns zero when there is no coupon, the coupon is inactive, `now`
/// falls outside its validity window, or the subtotal is below its
/// minimum purchase. The result is always within `[0, subtotal]`.
pub fn compute_discount(subtotal: Money, coupon: Option<&Coupon>, now: DateTime<Utc>) -> Money {
    let Some(coupon) = coupon else {
        return Money::zero();
    };

    if !coupon.is_valid_at(now) || !coupon.meets_minimum(subtotal) {
        return Money::zero();
    }

    let raw = match &coupon.kind {
        DiscountKind::Percentage { rate, cap } => {
            let amount = percent_of(subtotal, *rate);
            match cap {
                Some(cap) => amount.min(*cap),
                None => amount,
            }
        }
        DiscountKind::FixedAmount { amount } => (*amount).min(subtotal),
    };

    raw.clamp(Money::zero(), subtotal)
}

/// Calculates `rate` percent of an amount in cents, rounding half-up.
///
/// Overflow yields zero rather than a bogus amount.
fn percent_of(amount: Money, rate: Decimal) -> Money {
    let cents = Decimal::from(amount.cents());
    let fraction = rate / Decimal::from(100);
    let Some(applied) = fraction.checked_mul(cents) else {
        return Money::zero();
    };

    let rounded = applied.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    match rounded.to_i64() {
        Some(cents) => Money::from_cents(cents),
        None => Money::zero(),
    }
}
