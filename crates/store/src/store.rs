use async_trait::async_trait;
use chrono::Duration;
use common::{AddressId, CouponId, OrderId, ProductId, UserId};
use domain::{Address, Coupon, CouponCode, Order, Product, User};

use crate::Result;

/// Catalog products and their stock counts.
///
/// All implementations must be thread-safe (Send + Sync). The stock
/// operations are the only way stock changes; both are atomic across
/// their whole batch.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Retrieves a product by ID.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Inserts or updates a product.
    async fn save_product(&self, product: &Product) -> Result<()>;

    /// Atomically checks and decrements stock for every entry.
    ///
    /// All-or-nothing: if any product is missing or short, nothing is
    /// decremented and the error names the first shortfall. Two
    /// concurrent reservations can never both take the last unit.
    async fn reserve_stock(&self, demand: &[(ProductId, u32)]) -> Result<()>;

    /// Restores previously reserved stock.
    async fn release_stock(&self, demand: &[(ProductId, u32)]) -> Result<()>;
}

/// Registered users.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Retrieves a user by ID.
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    /// Inserts or updates a user.
    async fn save_user(&self, user: &User) -> Result<()>;
}

/// Shipping addresses.
#[async_trait]
pub trait AddressStore: Send + Sync {
    /// Retrieves an address by ID.
    async fn get_address(&self, id: AddressId) -> Result<Option<Address>>;

    /// Inserts or updates an address.
    async fn save_address(&self, address: &Address) -> Result<()>;
}

/// Discount coupons.
#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Retrieves a coupon by ID.
    async fn get_coupon(&self, id: CouponId) -> Result<Option<Coupon>>;

    /// Retrieves a coupon by its normalized code.
    async fn get_coupon_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>>;

    /// Inserts or updates a coupon.
    async fn save_coupon(&self, coupon: &Coupon) -> Result<()>;
}

/// Persisted orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Retrieves an order by ID.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Inserts or updates an order.
    async fn save_order(&self, order: &Order) -> Result<()>;

    /// Lists all orders, oldest first.
    async fn list_orders(&self) -> Result<Vec<Order>>;
}

/// Idempotency keys guarding mutating operations.
///
/// A claim is an atomic insert-if-absent: of N concurrent callers with
/// the same scope and key, exactly one wins. Records expire lazily;
/// nothing depends on `purge_expired` running.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Claims `(scope, key)` for `ttl`.
    ///
    /// Returns true on first use, or when a previous claim has
    /// expired; false while a live claim exists.
    async fn try_claim(&self, scope: &str, key: &str, ttl: Duration) -> Result<bool>;

    /// Releases a claim so the key can be used again immediately.
    async fn release(&self, scope: &str, key: &str) -> Result<()>;

    /// Removes expired records, returning how many were dropped.
    async fn purge_expired(&self) -> Result<u64>;
}

/// Convenience supertrait for backends that implement every store.
///
/// The order service is generic over this; both `MemoryStore` and
/// `PostgresStore` qualify via the blanket implementation.
pub trait Store:
    CatalogStore + UserStore + AddressStore + CouponStore + OrderStore + IdempotencyStore
{
}

impl<T> Store for T where
    T: CatalogStore + UserStore + AddressStore + CouponStore + OrderStore + IdempotencyStore
{
}
