use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{AddressId, CouponId, OrderId, ProductId, UserId};
use domain::{Address, Coupon, CouponCode, Order, Product, User};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{AddressStore, CatalogStore, CouponStore, IdempotencyStore, OrderStore, UserStore},
};

/// In-memory store implementation for testing.
///
/// Provides the same interface and atomicity guarantees as the
/// PostgreSQL implementation: stock reservation holds one write lock
/// across its whole batch, and claims are insert-if-absent under a
/// write lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
    users: Arc<RwLock<HashMap<UserId, User>>>,
    addresses: Arc<RwLock<HashMap<AddressId, Address>>>,
    coupons: Arc<RwLock<HashMap<CouponId, Coupon>>>,
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    claims: Arc<RwLock<HashMap<(String, String), DateTime<Utc>>>>,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current stock of a product, if it exists.
    pub async fn stock_of(&self, id: ProductId) -> Option<u32> {
        self.products.read().await.get(&id).map(|p| p.stock)
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Clears all stored data.
    pub async fn clear(&self) {
        self.products.write().await.clear();
        self.users.write().await.clear();
        self.addresses.write().await.clear();
        self.coupons.write().await.clear();
        self.orders.write().await.clear();
        self.claims.write().await.clear();
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        self.products
            .write()
            .await
            .insert(product.id, product.clone());
        Ok(())
    }

    async fn reserve_stock(&self, demand: &[(ProductId, u32)]) -> Result<()> {
        let mut products = self.products.write().await;

        // Check the whole batch before touching anything. A running
        // tally makes repeated entries for one product count together.
        let mut taken: HashMap<ProductId, u32> = HashMap::new();
        for (id, quantity) in demand {
            let product = products.get(id).ok_or(StoreError::ProductMissing(*id))?;
            let already_taken = taken.get(id).copied().unwrap_or(0);
            let available = product.stock - already_taken;
            if *quantity > available {
                return Err(StoreError::InsufficientStock {
                    product_id: *id,
                    product_name: product.name.clone(),
                    requested: *quantity,
                    available,
                });
            }
            taken.insert(*id, already_taken + quantity);
        }

        for (id, quantity) in taken {
            if let Some(product) = products.get_mut(&id) {
                product.stock -= quantity;
            }
        }

        Ok(())
    }

    async fn release_stock(&self, demand: &[(ProductId, u32)]) -> Result<()> {
        let mut products = self.products.write().await;

        for (id, _) in demand {
            if !products.contains_key(id) {
                return Err(StoreError::ProductMissing(*id));
            }
        }

        for (id, quantity) in demand {
            if let Some(product) = products.get_mut(id) {
                product.stock += quantity;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        self.users.write().await.insert(user.id, user.clone());
        Ok(())
    }
}

#[async_trait]
impl AddressStore for MemoryStore {
    async fn get_address(&self, id: AddressId) -> Result<Option<Address>> {
        Ok(self.addresses.read().await.get(&id).cloned())
    }

    async fn save_address(&self, address: &Address) -> Result<()> {
        self.addresses
            .write()
            .await
            .insert(address.id, address.clone());
        Ok(())
    }
}

#[async_trait]
impl CouponStore for MemoryStore {
    async fn get_coupon(&self, id: CouponId) -> Result<Option<Coupon>> {
        Ok(self.coupons.read().await.get(&id).cloned())
    }

    async fn get_coupon_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>> {
        let coupons = self.coupons.read().await;
        Ok(coupons.values().find(|c| &c.code == code).cloned())
    }

    async fn save_coupon(&self, coupon: &Coupon) -> Result<()> {
        self.coupons.write().await.insert(coupon.id, coupon.clone());
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn save_order(&self, order: &Order) -> Result<()> {
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut all: Vec<_> = orders.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.id.as_uuid().cmp(&b.id.as_uuid()))
        });
        Ok(all)
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn try_claim(&self, scope: &str, key: &str, ttl: Duration) -> Result<bool> {
        let mut claims = self.claims.write().await;
        let now = Utc::now();
        let entry = (scope.to_string(), key.to_string());

        match claims.get(&entry) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                claims.insert(entry, now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, scope: &str, key: &str) -> Result<()> {
        let mut claims = self.claims.write().await;
        claims.remove(&(scope.to_string(), key.to_string()));
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut claims = self.claims.write().await;
        let now = Utc::now();
        let before = claims.len();
        claims.retain(|_, expires_at| *expires_at > now);
        Ok((before - claims.len()) as u64)
    }
}
