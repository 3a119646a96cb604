//! Persistence layer for the order engine.
//!
//! One trait per collaborator (catalog, users, addresses, coupons,
//! orders, idempotency keys), with an in-memory implementation for
//! tests and a PostgreSQL implementation for production. The stock
//! and idempotency operations are atomic in both.

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use config::DatabaseConfig;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use store::{
    AddressStore, CatalogStore, CouponStore, IdempotencyStore, OrderStore, Store, UserStore,
};
