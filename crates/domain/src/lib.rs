//! Domain layer for the order engine.
//!
//! This crate provides the core domain model:
//! - The order aggregate with its status state machine
//! - Pure pricing and discount computation
//! - Catalog, user, address, and coupon records

pub mod catalog;
pub mod coupon;
pub mod order;
pub mod user;

pub use catalog::Product;
pub use coupon::{Coupon, CouponCode, CouponError, DiscountKind, compute_discount};
pub use order::{
    LineItem, Order, OrderError, OrderStatus, OrderTotals, PaymentMethod, price_order,
};
pub use user::{Address, User};
