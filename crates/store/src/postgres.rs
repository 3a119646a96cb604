use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{AddressId, CouponId, Money, OrderId, ProductId, UserId};
use domain::{Address, Coupon, CouponCode, DiscountKind, Order, Product, User};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{AddressStore, CatalogStore, CouponStore, IdempotencyStore, OrderStore, UserStore},
};

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            stock: row.try_get::<i32, _>("stock")? as u32,
            active: row.try_get("active")?,
        })
    }

    fn row_to_coupon(row: PgRow) -> Result<Coupon> {
        let kind: DiscountKind = serde_json::from_value(row.try_get("kind")?)?;

        Ok(Coupon {
            id: CouponId::from_uuid(row.try_get::<Uuid, _>("id")?),
            code: CouponCode::new(row.try_get::<String, _>("code")?),
            active: row.try_get("active")?,
            valid_from: row.try_get("valid_from")?,
            valid_until: row.try_get("valid_until")?,
            kind,
            min_purchase: row
                .try_get::<Option<i64>, _>("min_purchase_cents")?
                .map(Money::from_cents),
        })
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status =
            serde_json::from_value(serde_json::Value::String(row.try_get("status")?))?;
        let payment_method = row
            .try_get::<Option<String>, _>("payment_method")?
            .map(|s| serde_json::from_value(serde_json::Value::String(s)))
            .transpose()?;
        let items = serde_json::from_value(row.try_get("items")?)?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            address_id: AddressId::from_uuid(row.try_get::<Uuid, _>("address_id")?),
            coupon_id: row
                .try_get::<Option<Uuid>, _>("coupon_id")?
                .map(CouponId::from_uuid),
            status,
            payment_method,
            items,
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            discount: Money::from_cents(row.try_get("discount_cents")?),
            shipping: Money::from_cents(row.try_get("shipping_cents")?),
            total: Money::from_cents(row.try_get("total_cents")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, unit_price_cents, stock, active
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, unit_price_cents, stock, active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                unit_price_cents = EXCLUDED.unit_price_cents,
                stock = EXCLUDED.stock,
                active = EXCLUDED.active
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.unit_price.cents())
        .bind(product.stock as i32)
        .bind(product.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reserve_stock(&self, demand: &[(ProductId, u32)]) -> Result<()> {
        // One conditional decrement per entry inside a transaction.
        // Row locks serialize concurrent reservations per product; a
        // zero-row update means missing or short, and dropping the
        // transaction rolls every earlier decrement back.
        let mut tx = self.pool.begin().await?;

        for (id, quantity) in demand {
            let result = sqlx::query(
                r#"
                UPDATE products
                SET stock = stock - $2
                WHERE id = $1 AND stock >= $2
                "#,
            )
            .bind(id.as_uuid())
            .bind(*quantity as i32)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                let row = sqlx::query("SELECT name, stock FROM products WHERE id = $1")
                    .bind(id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;

                return match row {
                    Some(row) => Err(StoreError::InsufficientStock {
                        product_id: *id,
                        product_name: row.try_get("name")?,
                        requested: *quantity,
                        available: row.try_get::<i32, _>("stock")? as u32,
                    }),
                    None => Err(StoreError::ProductMissing(*id)),
                };
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn release_stock(&self, demand: &[(ProductId, u32)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (id, quantity) in demand {
            let result = sqlx::query("UPDATE products SET stock = stock + $2 WHERE id = $1")
                .bind(id.as_uuid())
                .bind(*quantity as i32)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::ProductMissing(*id));
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, name, email FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(User {
                id: UserId::from_uuid(row.try_get::<Uuid, _>("id")?),
                name: row.try_get("name")?,
                email: row.try_get("email")?,
            })
        })
        .transpose()
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                email = EXCLUDED.email
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.email)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AddressStore for PostgresStore {
    async fn get_address(&self, id: AddressId) -> Result<Option<Address>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, street, city, postal_code, country
            FROM addresses
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Address {
                id: AddressId::from_uuid(row.try_get::<Uuid, _>("id")?),
                user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
                street: row.try_get("street")?,
                city: row.try_get("city")?,
                postal_code: row.try_get("postal_code")?,
                country: row.try_get("country")?,
            })
        })
        .transpose()
    }

    async fn save_address(&self, address: &Address) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO addresses (id, user_id, street, city, postal_code, country)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                street = EXCLUDED.street,
                city = EXCLUDED.city,
                postal_code = EXCLUDED.postal_code,
                country = EXCLUDED.country
            "#,
        )
        .bind(address.id.as_uuid())
        .bind(address.user_id.as_uuid())
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.postal_code)
        .bind(&address.country)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CouponStore for PostgresStore {
    async fn get_coupon(&self, id: CouponId) -> Result<Option<Coupon>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, active, valid_from, valid_until, kind, min_purchase_cents
            FROM coupons
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_coupon).transpose()
    }

    async fn get_coupon_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, active, valid_from, valid_until, kind, min_purchase_cents
            FROM coupons
            WHERE code = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_coupon).transpose()
    }

    async fn save_coupon(&self, coupon: &Coupon) -> Result<()> {
        let kind = serde_json::to_value(&coupon.kind)?;

        sqlx::query(
            r#"
            INSERT INTO coupons (id, code, active, valid_from, valid_until, kind, min_purchase_cents)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                code = EXCLUDED.code,
                active = EXCLUDED.active,
                valid_from = EXCLUDED.valid_from,
                valid_until = EXCLUDED.valid_until,
                kind = EXCLUDED.kind,
                min_purchase_cents = EXCLUDED.min_purchase_cents
            "#,
        )
        .bind(coupon.id.as_uuid())
        .bind(coupon.code.as_str())
        .bind(coupon.active)
        .bind(coupon.valid_from)
        .bind(coupon.valid_until)
        .bind(kind)
        .bind(coupon.min_purchase.map(|m| m.cents()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, address_id, coupon_id, status, payment_method, items,
                   subtotal_cents, discount_cents, shipping_cents, total_cents,
                   created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn save_order(&self, order: &Order) -> Result<()> {
        let items = serde_json::to_value(&order.items)?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, address_id, coupon_id, status, payment_method,
                                items, subtotal_cents, discount_cents, shipping_cents,
                                total_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                payment_method = EXCLUDED.payment_method,
                items = EXCLUDED.items,
                subtotal_cents = EXCLUDED.subtotal_cents,
                discount_cents = EXCLUDED.discount_cents,
                shipping_cents = EXCLUDED.shipping_cents,
                total_cents = EXCLUDED.total_cents,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.address_id.as_uuid())
        .bind(order.coupon_id.map(|c| c.as_uuid()))
        .bind(order.status.as_str())
        .bind(order.payment_method.map(|m| m.as_str()))
        .bind(items)
        .bind(order.subtotal.cents())
        .bind(order.discount.cents())
        .bind(order.shipping.cents())
        .bind(order.total.cents())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, address_id, coupon_id, status, payment_method, items,
                   subtotal_cents, discount_cents, shipping_cents, total_cents,
                   created_at, updated_at
            FROM orders
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }
}

#[async_trait]
impl IdempotencyStore for PostgresStore {
    async fn try_claim(&self, scope: &str, key: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();

        // Single statement, so the insert-if-absent is atomic. The
        // conflict arm only fires when the existing claim has expired.
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (scope, key, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (scope, key) DO UPDATE SET expires_at = EXCLUDED.expires_at
            WHERE idempotency_keys.expires_at <= $4
            "#,
        )
        .bind(scope)
        .bind(key)
        .bind(now + ttl)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, scope: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE scope = $1 AND key = $2")
            .bind(scope)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
