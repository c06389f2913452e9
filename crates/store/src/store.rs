use async_trait::async_trait;
use common::{CouponId, ProductId, UserId};
use domain::{Cart, Coupon, Order, Product};

use crate::{OrderFilter, OrderPatch, OrderQuery, Page, Result};

/// Read access to the catalog plus the two stock writes the workflow needs.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Returns current price, stock and name of a product.
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Takes `quantity` units from stock only if at least that many remain.
    ///
    /// Returns the new stock level, or None when the product is absent or the
    /// predicate failed at write time.
    async fn conditional_decrement_stock(&self, id: ProductId, quantity: u32)
    -> Result<Option<u32>>;

    /// Puts `quantity` units back into stock.
    ///
    /// Returns the new stock level, or None when the product is absent.
    async fn conditional_increment_stock(&self, id: ProductId, quantity: u32)
    -> Result<Option<u32>>;
}

/// The single active cart of each user.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Loads the user's cart, if one was ever created.
    async fn get_cart(&self, user: UserId) -> Result<Option<Cart>>;

    /// Deletes the user's cart. Returns the number of carts removed.
    async fn delete_cart(&self, user: UserId) -> Result<u64>;

    /// Sets a product's quantity in the user's cart, creating the cart lazily.
    async fn upsert_cart_line(&self, user: UserId, product: ProductId, quantity: u32)
    -> Result<Cart>;
}

/// Coupon definitions and their redemption ledger.
#[async_trait]
pub trait CouponLedger: Send + Sync {
    /// Loads a coupon with its full usage list.
    async fn find_coupon(&self, id: CouponId) -> Result<Option<Coupon>>;

    /// Appends one redemption by `user` only if their count is below the cap.
    ///
    /// The count check and the append happen atomically. Returns false when
    /// the coupon is absent or the user already reached the cap.
    async fn record_usage_within_limit(&self, id: CouponId, user: UserId) -> Result<bool>;

    /// Removes exactly one redemption by `user`. Returns false if none existed.
    async fn remove_usage(&self, id: CouponId, user: UserId) -> Result<bool>;
}

/// Persistence of order documents.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persists a new order.
    async fn create(&self, order: Order) -> Result<Order>;

    /// Returns the first order matching the filter.
    async fn find_one(&self, filter: &OrderFilter) -> Result<Option<Order>>;

    /// Applies `patch` to the order matching `filter`, evaluated at write time.
    ///
    /// Returns the updated order, or None when nothing matched.
    async fn conditional_update(
        &self,
        filter: &OrderFilter,
        patch: &OrderPatch,
    ) -> Result<Option<Order>>;

    /// Lists orders newest first.
    async fn list(&self, query: &OrderQuery) -> Result<Page<Order>>;
}

/// Everything the order workflow reads and writes, behind one handle.
pub trait ShopStore:
    CatalogReader + CartStore + CouponLedger + OrderRepository + Clone + 'static
{
}

impl<T> ShopStore for T where
    T: CatalogReader + CartStore + CouponLedger + OrderRepository + Clone + 'static
{
}
