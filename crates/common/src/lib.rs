//! Shared types for the order engine.
//!
//! This crate provides the typed identifiers used across the workspace
//! and the `Money` value object (integer cents) that all pricing code
//! is built on.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{AddressId, CouponId, OrderId, ProductId, UserId};
