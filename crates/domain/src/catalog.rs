//! Catalog product record.

use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

/// A sellable product.
///
/// Stock is mutated only through the catalog store's reserve/release
/// operations; this record is otherwise read-only for the order engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Unique product identifier.
    pub id: ProductId,

    /// Human-readable product name.
    pub name: String,

    /// Current price per unit.
    pub unit_price: Money,

    /// Units currently available for sale.
    pub stock: u32,

    /// Inactive products are hidden from ordering.
    pub active: bool,
}

impl Product {
    /// Creates a new active product.
    pub fn new(name: impl Into<String>, unit_price: Money, stock: u32) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            unit_price,
            stock,
            active: true,
        }
    }

    /// Returns true if the product may appear on a new order.
    pub fn is_orderable(&self) -> bool {
        self.active
    }

    /// Returns true if at least `quantity` units are in stock.
    pub fn has_stock(&self, quantity: u32) -> bool {
        self.stock >= quantity
    }
}
