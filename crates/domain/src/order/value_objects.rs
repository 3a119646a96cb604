//! Value objects for the order domain.

use std::str::FromStr;

use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

use super::OrderError;

/// A line on an order.
///
/// The name and unit price are snapshots taken from the catalog when
/// the order was created; later catalog changes do not affect them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// The product this line refers to.
    pub product_id: ProductId,

    /// Product name at order time.
    pub product_name: String,

    /// Price per unit at order time.
    pub unit_price: Money,

    /// Quantity ordered, always at least 1.
    pub quantity: u32,
}

impl LineItem {
    /// Creates a new line item.
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            unit_price,
            quantity,
        }
    }

    /// Returns the total price for this line (unit price times quantity).
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// How an order is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Credit card.
    CreditCard,

    /// Debit card.
    DebitCard,

    /// Direct bank transfer.
    BankTransfer,

    /// Digital wallet.
    Wallet,
}

impl PaymentMethod {
    /// Returns the method name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "CREDIT_CARD",
            PaymentMethod::DebitCard => "DEBIT_CARD",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::Wallet => "WALLET",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREDIT_CARD" => Ok(PaymentMethod::CreditCard),
            "DEBIT_CARD" => Ok(PaymentMethod::DebitCard),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            "WALLET" => Ok(PaymentMethod::Wallet),
            other => Err(OrderError::UnknownPaymentMethod {
                method: other.to_string(),
            }),
        }
    }
}
