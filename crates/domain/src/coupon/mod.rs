//! Coupons and the discount engine.

mod discount;

pub use discount::compute_discount;

use chrono::{DateTime, Utc};
use common::{CouponId, Money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when constructing a coupon with invalid parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CouponError {
    /// Percentage rate below zero.
    #[error("discount rate must not be negative: {rate}")]
    NegativeRate { rate: Decimal },

    /// Discount cap below zero.
    #[error("discount cap must not be negative: {cap}")]
    NegativeCap { cap: Money },

    /// Fixed discount amount below zero.
    #[error("discount amount must not be negative: {amount}")]
    NegativeAmount { amount: Money },

    /// Minimum purchase below zero.
    #[error("minimum purchase must not be negative: {min_purchase}")]
    NegativeMinPurchase { min_purchase: Money },

    /// Validity window ends before it starts.
    #[error("validity window ends before it starts")]
    InvalidWindow,
}

/// Coupon code, stored uppercase so lookups are case-insensitive.
///
/// Serialized as a plain string; deserialization normalizes, so codes
/// read back from storage are always uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CouponCode(String);

impl CouponCode {
    /// Creates a coupon code, trimming whitespace and uppercasing.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Returns the normalized code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CouponCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CouponCode {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for CouponCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<CouponCode> for String {
    fn from(code: CouponCode) -> Self {
        code.0
    }
}

/// How a coupon reduces the order subtotal.
///
/// The cap exists only on the percentage variant; a fixed-amount
/// discount is its own cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    /// Percentage of the subtotal, optionally capped at a fixed amount.
    Percentage {
        /// Rate in percent, e.g. `12.5` for 12.5 %.
        rate: Decimal,
        /// Upper bound on the computed discount.
        cap: Option<Money>,
    },

    /// Flat amount off the subtotal.
    FixedAmount {
        /// Amount to subtract, limited to the subtotal itself.
        amount: Money,
    },
}

/// A discount coupon.
///
/// Validation happens at construction; a coupon that exists is
/// well-formed. Whether it currently applies (active flag, validity
/// window, minimum purchase) is evaluated against a point in time and
/// a subtotal by the discount engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    /// Unique coupon identifier.
    pub id: CouponId,

    /// Normalized redemption code.
    pub code: CouponCode,

    /// Inactive coupons never grant a discount.
    pub active: bool,

    /// Start of the validity window, if bounded below.
    pub valid_from: Option<DateTime<Utc>>,

    /// End of the validity window, if bounded above.
    pub valid_until: Option<DateTime<Utc>>,

    /// The discount this coupon grants.
    pub kind: DiscountKind,

    /// Subtotal the order must reach before the coupon applies.
    pub min_purchase: Option<Money>,
}

impl Coupon {
    /// Creates an active percentage coupon, optionally capped.
    pub fn percentage(
        code: impl Into<CouponCode>,
        rate: Decimal,
        cap: Option<Money>,
    ) -> Result<Self, CouponError> {
        if rate < Decimal::ZERO {
            return Err(CouponError::NegativeRate { rate });
        }
        if let Some(cap) = cap
            && cap.is_negative()
        {
            return Err(CouponError::NegativeCap { cap });
        }

        Ok(Self {
            id: CouponId::new(),
            code: code.into(),
            active: true,
            valid_from: None,
            valid_until: None,
            kind: DiscountKind::Percentage { rate, cap },
            min_purchase: None,
        })
    }

    /// Creates an active fixed-amount coupon.
    pub fn fixed_amount(
        code: impl Into<CouponCode>,
        amount: Money,
    ) -> Result<Self, CouponError> {
        if amount.is_negative() {
            return Err(CouponError::NegativeAmount { amount });
        }

        Ok(Self {
            id: CouponId::new(),
            code: code.into(),
            active: true,
            valid_from: None,
            valid_until: None,
            kind: DiscountKind::FixedAmount { amount },
            min_purchase: None,
        })
    }

    /// Restricts the coupon to a validity window.
    ///
    /// Either bound may be open. A window that ends before it starts
    /// is rejected.
    pub fn with_window(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<Self, CouponError> {
        if let (Some(from), Some(until)) = (valid_from, valid_until)
            && until < from
        {
            return Err(CouponError::InvalidWindow);
        }
        self.valid_from = valid_from;
        self.valid_until = valid_until;
        Ok(self)
    }

    /// Requires a minimum subtotal before the coupon applies.
    pub fn with_min_purchase(mut self, min_purchase: Money) -> Result<Self, CouponError> {
        if min_purchase.is_negative() {
            return Err(CouponError::NegativeMinPurchase { min_purchase });
        }
        self.min_purchase = Some(min_purchase);
        Ok(self)
    }

    /// Returns true if the coupon is active and `now` falls inside its
    /// validity window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        if let Some(from) = self.valid_from
            && now < from
        {
            return false;
        }
        if let Some(until) = self.valid_until
            && now > until
        {
            return false;
        }
        true
    }

    /// Returns true if the subtotal reaches the coupon's minimum
    /// purchase requirement, if any.
    pub fn meets_minimum(&self, subtotal: Money) -> bool {
        match self.min_purchase {
            Some(min) => subtotal >= min,
            None => true,
        }
    }
}
