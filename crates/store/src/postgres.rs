use async_trait::async_trait;
use chrono::Utc;
use common::{CouponId, ExternalOrderId, OrderId, ProductId, UserId};
use domain::{
    Cart, CartLine, Coupon, CouponType, DiscountFraction, Money, Order, OrderLine, OrderStatus,
    PaymentType, Product,
};
use sqlx::{
    PgPool, Postgres, Row,
    postgres::{PgArguments, PgRow},
    query::Query,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    OrderFilter, OrderPatch, OrderQuery, Page, Result, StoreError,
    store::{CartStore, CatalogReader, CouponLedger, OrderRepository},
};

const ORDER_COLUMNS: &str = "id, external_id, address, phone, note, lines, coupon_id, discount, \
     total_cents, subtotal_cents, payment_type, status, cancel_reason, paid_at, payment_intent, \
     created_by, updated_by, created_at, updated_at, frozen_at, restored_at, version";

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresShopStore {
    pool: PgPool,
}

impl PostgresShopStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Inserts or replaces a catalog product.
    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, stock)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                stock = EXCLUDED.stock,
                version = products.version + 1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(i64::from(product.stock))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts a coupon together with its existing redemptions.
    pub async fn insert_coupon(&self, coupon: &Coupon) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO coupons (id, name, slug, discount, kind, starts_at, ends_at, duration)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(coupon.id.as_uuid())
        .bind(&coupon.name)
        .bind(&coupon.slug)
        .bind(coupon.discount)
        .bind(coupon.kind.as_str())
        .bind(coupon.starts_at)
        .bind(coupon.ends_at)
        .bind(coupon.duration as i32)
        .execute(&mut *tx)
        .await
        .map_err(|e| duplicate_or(e, "coupon", &coupon.slug))?;

        for user in &coupon.used_by {
            sqlx::query("INSERT INTO coupon_usages (coupon_id, user_id) VALUES ($1, $2)")
                .bind(coupon.id.as_uuid())
                .bind(user.as_uuid())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Soft-freezes an order.
    pub async fn freeze_order(&self, id: OrderId) -> Result<bool> {
        let result = sqlx::query("UPDATE orders SET frozen_at = now() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let lines: Vec<OrderLine> = serde_json::from_value(row.try_get("lines")?)?;

        let rank: i16 = row.try_get("status")?;
        let status = OrderStatus::from_rank(rank).ok_or_else(|| StoreError::Corrupt {
            entity: "order",
            reason: format!("unknown status rank {rank}"),
        })?;

        let payment_type: String = row.try_get("payment_type")?;
        let payment_type =
            PaymentType::parse(&payment_type).ok_or_else(|| StoreError::Corrupt {
                entity: "order",
                reason: format!("unknown payment type {payment_type}"),
            })?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            external_id: ExternalOrderId::new(row.try_get::<String, _>("external_id")?),
            address: row.try_get("address")?,
            phone: row.try_get("phone")?,
            note: row.try_get("note")?,
            lines,
            coupon: row
                .try_get::<Option<Uuid>, _>("coupon_id")?
                .map(CouponId::from_uuid),
            discount: DiscountFraction::new(row.try_get("discount")?),
            total: Money::from_cents(row.try_get("total_cents")?),
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            payment_type,
            status,
            cancel_reason: row.try_get("cancel_reason")?,
            paid_at: row.try_get("paid_at")?,
            payment_intent: row.try_get("payment_intent")?,
            created_by: UserId::from_uuid(row.try_get::<Uuid, _>("created_by")?),
            updated_by: row
                .try_get::<Option<Uuid>, _>("updated_by")?
                .map(UserId::from_uuid),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            frozen_at: row.try_get("frozen_at")?,
            restored_at: row.try_get("restored_at")?,
            version: row.try_get("version")?,
        })
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock: to_quantity("product", row.try_get("stock")?)?,
        })
    }

    async fn load_cart_lines<'e, E>(executor: E, user: UserId) -> Result<Vec<CartLine>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows = sqlx::query(
            "SELECT product_id, quantity FROM cart_lines WHERE owner = $1 ORDER BY seq ASC",
        )
        .bind(user.as_uuid())
        .fetch_all(executor)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CartLine::new(
                    ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
                    to_quantity("cart", row.try_get("quantity")?)?,
                ))
            })
            .collect()
    }
}

fn to_quantity(entity: &'static str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt {
        entity,
        reason: format!("quantity {value} out of range"),
    })
}

fn duplicate_or(e: sqlx::Error, entity: &'static str, key: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::Duplicate {
            entity,
            key: key.to_string(),
        };
    }
    StoreError::Database(e)
}

/// Appends the WHERE conditions of `filter`, numbering parameters from `param_count`.
fn push_filter(sql: &mut String, param_count: &mut usize, filter: &OrderFilter) {
    sql.push_str(" WHERE 1=1");
    if !filter.include_frozen {
        sql.push_str(" AND frozen_at IS NULL");
    }
    if filter.id.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND id = ${param_count}"));
    }
    if filter.external_id.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND external_id = ${param_count}"));
    }
    if filter.created_by.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND created_by = ${param_count}"));
    }
    if filter.payment_type.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND payment_type = ${param_count}"));
    }
    if filter.status.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND status = ${param_count}"));
    }
    if filter.status_below.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND status < ${param_count}"));
    }
}

/// Binds the parameters added by [`push_filter`], in the same order.
fn bind_filter<'q>(mut query: PgQuery<'q>, filter: &OrderFilter) -> PgQuery<'q> {
    if let Some(id) = filter.id {
        query = query.bind(id.as_uuid());
    }
    if let Some(ref external_id) = filter.external_id {
        query = query.bind(external_id.to_string());
    }
    if let Some(user) = filter.created_by {
        query = query.bind(user.as_uuid());
    }
    if let Some(payment_type) = filter.payment_type {
        query = query.bind(payment_type.as_str());
    }
    if let Some(status) = filter.status {
        query = query.bind(status.rank());
    }
    if let Some(bound) = filter.status_below {
        query = query.bind(bound.rank());
    }
    query
}

#[async_trait]
impl CatalogReader for PostgresShopStore {
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price_cents, stock FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn conditional_decrement_stock(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<u32>> {
        let stock: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products SET stock = stock - $2, version = version + 1
            WHERE id = $1 AND stock >= $2
            RETURNING stock
            "#,
        )
        .bind(id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await?;

        if stock.is_none() {
            debug!(product_id = %id, quantity, "stock predicate rejected decrement");
        }
        stock.map(|s| to_quantity("product", s)).transpose()
    }

    async fn conditional_increment_stock(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<u32>> {
        let stock: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products SET stock = stock + $2, version = version + 1
            WHERE id = $1
            RETURNING stock
            "#,
        )
        .bind(id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await?;

        stock.map(|s| to_quantity("product", s)).transpose()
    }
}

#[async_trait]
impl CartStore for PostgresShopStore {
    async fn get_cart(&self, user: UserId) -> Result<Option<Cart>> {
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT owner FROM carts WHERE owner = $1")
            .bind(user.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let lines = Self::load_cart_lines(&self.pool, user).await?;
        Ok(Some(Cart { owner: user, lines }))
    }

    async fn delete_cart(&self, user: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM carts WHERE owner = $1")
            .bind(user.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_cart_line(
        &self,
        user: UserId,
        product: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO carts (owner) VALUES ($1)
            ON CONFLICT (owner) DO UPDATE SET updated_at = now()
            "#,
        )
        .bind(user.as_uuid())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO cart_lines (owner, product_id, quantity) VALUES ($1, $2, $3)
            ON CONFLICT (owner, product_id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(user.as_uuid())
        .bind(product.as_uuid())
        .bind(i64::from(quantity))
        .execute(&mut *tx)
        .await?;

        let lines = Self::load_cart_lines(&mut *tx, user).await?;
        tx.commit().await?;

        Ok(Cart { owner: user, lines })
    }
}

#[async_trait]
impl CouponLedger for PostgresShopStore {
    async fn find_coupon(&self, id: CouponId) -> Result<Option<Coupon>> {
        let Some(row) = sqlx::query(
            r#"
            SELECT id, name, slug, discount, kind, starts_at, ends_at, duration
            FROM coupons
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let used_by: Vec<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM coupon_usages WHERE coupon_id = $1 ORDER BY id ASC",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let kind: String = row.try_get("kind")?;
        let duration: i32 = row.try_get("duration")?;

        Ok(Some(Coupon {
            id,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            discount: row.try_get("discount")?,
            kind: CouponType::parse(&kind).ok_or_else(|| StoreError::Corrupt {
                entity: "coupon",
                reason: format!("unknown coupon type {kind}"),
            })?,
            starts_at: row.try_get("starts_at")?,
            ends_at: row.try_get("ends_at")?,
            duration: to_quantity("coupon", i64::from(duration))?,
            used_by: used_by.into_iter().map(UserId::from_uuid).collect(),
        }))
    }

    async fn record_usage_within_limit(&self, id: CouponId, user: UserId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises concurrent redemptions of the same coupon
        let duration: Option<i32> =
            sqlx::query_scalar("SELECT duration FROM coupons WHERE id = $1 FOR UPDATE")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let Some(duration) = duration else {
            return Ok(false);
        };

        let used: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM coupon_usages WHERE coupon_id = $1 AND user_id = $2",
        )
        .bind(id.as_uuid())
        .bind(user.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        if used >= i64::from(duration) {
            debug!(coupon_id = %id, user_id = %user, used, "coupon usage cap reached");
            return Ok(false);
        }

        sqlx::query("INSERT INTO coupon_usages (coupon_id, user_id, used_at) VALUES ($1, $2, $3)")
            .bind(id.as_uuid())
            .bind(user.as_uuid())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn remove_usage(&self, id: CouponId, user: UserId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM coupon_usages
            WHERE id = (
                SELECT id FROM coupon_usages
                WHERE coupon_id = $1 AND user_id = $2
                ORDER BY id ASC
                LIMIT 1
            )
            "#,
        )
        .bind(id.as_uuid())
        .bind(user.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OrderRepository for PostgresShopStore {
    async fn create(&self, order: Order) -> Result<Order> {
        let lines = serde_json::to_value(&order.lines)?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, external_id, address, phone, note, lines, coupon_id, discount,
                total_cents, subtotal_cents, payment_type, status, cancel_reason, paid_at,
                payment_intent, created_by, updated_by, created_at, updated_at, frozen_at,
                restored_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.external_id.as_str())
        .bind(&order.address)
        .bind(&order.phone)
        .bind(&order.note)
        .bind(lines)
        .bind(order.coupon.map(|c| c.as_uuid()))
        .bind(order.discount.value())
        .bind(order.total.cents())
        .bind(order.subtotal.cents())
        .bind(order.payment_type.as_str())
        .bind(order.status.rank())
        .bind(&order.cancel_reason)
        .bind(order.paid_at)
        .bind(&order.payment_intent)
        .bind(order.created_by.as_uuid())
        .bind(order.updated_by.map(|u| u.as_uuid()))
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.frozen_at)
        .bind(order.restored_at)
        .bind(order.version)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, "order", order.external_id.as_str()))?;

        Ok(order)
    }

    async fn find_one(&self, filter: &OrderFilter) -> Result<Option<Order>> {
        let mut sql = format!("SELECT {ORDER_COLUMNS} FROM orders");
        let mut param_count = 0;
        push_filter(&mut sql, &mut param_count, filter);
        sql.push_str(" LIMIT 1");

        let query = bind_filter(sqlx::query(&sql), filter);
        let row = query.fetch_optional(&self.pool).await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn conditional_update(
        &self,
        filter: &OrderFilter,
        patch: &OrderPatch,
    ) -> Result<Option<Order>> {
        let mut sql = String::from("UPDATE orders SET updated_at = now(), version = version + 1");
        let mut param_count = 0;

        if patch.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(", status = ${param_count}"));
        }
        if patch.paid_at.is_some() {
            param_count += 1;
            sql.push_str(&format!(", paid_at = ${param_count}"));
        }
        if patch.payment_intent.is_some() {
            param_count += 1;
            sql.push_str(&format!(", payment_intent = ${param_count}"));
        }
        if patch.updated_by.is_some() {
            param_count += 1;
            sql.push_str(&format!(", updated_by = ${param_count}"));
        }
        if patch.cancel_reason.is_some() {
            param_count += 1;
            sql.push_str(&format!(", cancel_reason = ${param_count}"));
        }

        push_filter(&mut sql, &mut param_count, filter);
        sql.push_str(&format!(" RETURNING {ORDER_COLUMNS}"));

        let mut query = sqlx::query(&sql);
        if let Some(status) = patch.status {
            query = query.bind(status.rank());
        }
        if let Some(paid_at) = patch.paid_at {
            query = query.bind(paid_at);
        }
        if let Some(ref intent) = patch.payment_intent {
            query = query.bind(intent.clone());
        }
        if let Some(user) = patch.updated_by {
            query = query.bind(user.as_uuid());
        }
        if let Some(ref reason) = patch.cancel_reason {
            query = query.bind(reason.clone());
        }
        let query = bind_filter(query, filter);

        let row = query.fetch_optional(&self.pool).await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn list(&self, query: &OrderQuery) -> Result<Page<Order>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE (frozen_at IS NOT NULL) = $1")
                .bind(query.archived)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE (frozen_at IS NOT NULL) = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(query.archived)
        .bind(i64::from(query.size))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(items, total.max(0) as u64, query))
    }
}
