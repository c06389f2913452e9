use std::collections::HashMap;
#[cfg(any(test, feature = "test-util"))]
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{CouponId, ProductId, UserId};
use domain::{Cart, Coupon, Order, Product};
use tokio::sync::RwLock;

use crate::{
    OrderFilter, OrderPatch, OrderQuery, Page, Result, StoreError,
    store::{CartStore, CatalogReader, CouponLedger, OrderRepository},
};

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    carts: HashMap<UserId, Cart>,
    coupons: HashMap<CouponId, Coupon>,
    orders: Vec<Order>,
    #[cfg(any(test, feature = "test-util"))]
    contended: HashSet<ProductId>,
}

/// In-memory store implementation for testing and local runs.
///
/// Each operation holds the write lock for its whole duration, so every
/// conditional write is atomic with respect to other callers.
#[derive(Clone, Default)]
pub struct InMemoryShopStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryShopStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a catalog product.
    pub async fn insert_product(&self, product: Product) {
        self.state
            .write()
            .await
            .products
            .insert(product.id, product);
    }

    /// Inserts or replaces a coupon.
    pub async fn insert_coupon(&self, coupon: Coupon) {
        self.state.write().await.coupons.insert(coupon.id, coupon);
    }

    /// Replaces a user's cart.
    pub async fn put_cart(&self, cart: Cart) {
        self.state.write().await.carts.insert(cart.owner, cart);
    }

    /// Returns the current stock of a product.
    pub async fn stock_of(&self, id: ProductId) -> Option<u32> {
        self.state.read().await.products.get(&id).map(|p| p.stock)
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Soft-freezes an order.
    pub async fn freeze_order(&self, id: common::OrderId) -> bool {
        let mut state = self.state.write().await;
        match state.orders.iter_mut().find(|o| o.id == id) {
            Some(order) => {
                order.frozen_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Makes the next stock decrement for `id` lose a race against another buyer.
    ///
    /// The competing buyer empties the stock right before the decrement is
    /// evaluated.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn simulate_concurrent_sellout(&self, id: ProductId) {
        self.state.write().await.contended.insert(id);
    }
}

#[async_trait]
impl CatalogReader for InMemoryShopStore {
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn conditional_decrement_stock(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<u32>> {
        let mut state = self.state.write().await;
        #[cfg(any(test, feature = "test-util"))]
        let contended = state.contended.remove(&id);

        let Some(product) = state.products.get_mut(&id) else {
            return Ok(None);
        };
        #[cfg(any(test, feature = "test-util"))]
        if contended {
            product.stock = 0;
        }
        if product.stock < quantity {
            return Ok(None);
        }
        product.stock -= quantity;
        Ok(Some(product.stock))
    }

    async fn conditional_increment_stock(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<u32>> {
        let mut state = self.state.write().await;
        Ok(state.products.get_mut(&id).map(|product| {
            product.stock = product.stock.saturating_add(quantity);
            product.stock
        }))
    }
}

#[async_trait]
impl CartStore for InMemoryShopStore {
    async fn get_cart(&self, user: UserId) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&user).cloned())
    }

    async fn delete_cart(&self, user: UserId) -> Result<u64> {
        let removed = self.state.write().await.carts.remove(&user);
        Ok(u64::from(removed.is_some()))
    }

    async fn upsert_cart_line(
        &self,
        user: UserId,
        product: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        let mut state = self.state.write().await;
        let cart = state.carts.entry(user).or_insert_with(|| Cart::new(user));
        cart.set_quantity(product, quantity);
        Ok(cart.clone())
    }
}

#[async_trait]
impl CouponLedger for InMemoryShopStore {
    async fn find_coupon(&self, id: CouponId) -> Result<Option<Coupon>> {
        Ok(self.state.read().await.coupons.get(&id).cloned())
    }

    async fn record_usage_within_limit(&self, id: CouponId, user: UserId) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(coupon) = state.coupons.get_mut(&id) else {
            return Ok(false);
        };
        if coupon.is_exhausted_for(user) {
            return Ok(false);
        }
        coupon.used_by.push(user);
        Ok(true)
    }

    async fn remove_usage(&self, id: CouponId, user: UserId) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(coupon) = state.coupons.get_mut(&id) else {
            return Ok(false);
        };
        match coupon.used_by.iter().position(|u| *u == user) {
            Some(index) => {
                coupon.used_by.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl OrderRepository for InMemoryShopStore {
    async fn create(&self, order: Order) -> Result<Order> {
        let mut state = self.state.write().await;
        if state
            .orders
            .iter()
            .any(|o| o.id == order.id || o.external_id == order.external_id)
        {
            return Err(StoreError::Duplicate {
                entity: "order",
                key: order.external_id.to_string(),
            });
        }
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn find_one(&self, filter: &OrderFilter) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.iter().find(|o| filter.matches(o)).cloned())
    }

    async fn conditional_update(
        &self,
        filter: &OrderFilter,
        patch: &OrderPatch,
    ) -> Result<Option<Order>> {
        let mut state = self.state.write().await;
        Ok(state
            .orders
            .iter_mut()
            .find(|o| filter.matches(o))
            .map(|order| {
                patch.apply(order);
                order.clone()
            }))
    }

    async fn list(&self, query: &OrderQuery) -> Result<Page<Order>> {
        let state = self.state.read().await;
        let mut matching: Vec<&Order> = state
            .orders
            .iter()
            .filter(|o| o.is_frozen() == query.archived)
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.size as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, total, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use domain::{CouponType, DiscountFraction, Money, NewOrder, OrderLine, OrderStatus, PaymentType};

    fn product(stock: u32) -> Product {
        Product {
            id: ProductId::new(),
            name: "Widget".to_string(),
            price: Money::from_cents(1000),
            stock,
        }
    }

    fn order(user: UserId) -> Order {
        Order::place(NewOrder {
            address: "addr".to_string(),
            phone: "phone".to_string(),
            note: None,
            lines: vec![OrderLine::new(ProductId::new(), "Widget", 1, Money::from_cents(100))],
            coupon: None,
            discount: DiscountFraction::NONE,
            payment_type: PaymentType::Card,
            created_by: user,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn decrement_respects_stock_predicate() {
        let store = InMemoryShopStore::new();
        let p = product(5);
        store.insert_product(p.clone()).await;

        assert_eq!(store.conditional_decrement_stock(p.id, 3).await.unwrap(), Some(2));
        assert_eq!(store.conditional_decrement_stock(p.id, 3).await.unwrap(), None);
        assert_eq!(store.stock_of(p.id).await, Some(2));
        assert_eq!(store.conditional_increment_stock(p.id, 3).await.unwrap(), Some(5));
        assert_eq!(
            store.conditional_increment_stock(ProductId::new(), 1).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn simulated_sellout_fails_next_decrement_once() {
        let store = InMemoryShopStore::new();
        let p = product(5);
        store.insert_product(p.clone()).await;
        store.simulate_concurrent_sellout(p.id).await;

        assert_eq!(store.conditional_decrement_stock(p.id, 1).await.unwrap(), None);
        assert_eq!(store.stock_of(p.id).await, Some(0));
    }

    #[tokio::test]
    async fn cart_created_lazily_and_deleted_once() {
        let store = InMemoryShopStore::new();
        let user = UserId::new();
        let p = ProductId::new();

        assert!(store.get_cart(user).await.unwrap().is_none());
        store.upsert_cart_line(user, p, 2).await.unwrap();
        let cart = store.upsert_cart_line(user, p, 4).await.unwrap();
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].quantity, 4);

        assert_eq!(store.delete_cart(user).await.unwrap(), 1);
        assert_eq!(store.delete_cart(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn coupon_usage_capped_per_user() {
        let store = InMemoryShopStore::new();
        let now = Utc::now();
        let coupon = Coupon {
            id: CouponId::new(),
            name: "TEN".to_string(),
            slug: "ten".to_string(),
            discount: 10.0,
            kind: CouponType::Percent,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            duration: 2,
            used_by: vec![],
        };
        store.insert_coupon(coupon.clone()).await;
        let user = UserId::new();

        assert!(store.record_usage_within_limit(coupon.id, user).await.unwrap());
        assert!(store.record_usage_within_limit(coupon.id, user).await.unwrap());
        assert!(!store.record_usage_within_limit(coupon.id, user).await.unwrap());

        assert!(store.remove_usage(coupon.id, user).await.unwrap());
        let stored = store.find_coupon(coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count(user), 1);
    }

    #[tokio::test]
    async fn conditional_update_is_guarded_by_status() {
        let store = InMemoryShopStore::new();
        let created = store.create(order(UserId::new())).await.unwrap();

        let filter = OrderFilter::by_external_id(created.external_id.clone())
            .status(OrderStatus::Pending);
        let patch = OrderPatch {
            status: Some(OrderStatus::Placed),
            paid_at: Some(Utc::now()),
            ..Default::default()
        };

        let updated = store.conditional_update(&filter, &patch).await.unwrap().unwrap();
        assert_eq!(updated.status, OrderStatus::Placed);
        assert_eq!(updated.version, 1);
        assert!(store.conditional_update(&filter, &patch).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_separates_live_and_archived() {
        let store = InMemoryShopStore::new();
        let user = UserId::new();
        let first = store.create(order(user)).await.unwrap();
        store.create(order(user)).await.unwrap();
        store.freeze_order(first.id).await;

        let live = store.list(&OrderQuery::default()).await.unwrap();
        assert_eq!(live.total, 1);
        let archived = store.list(&OrderQuery::new(1, 20, true)).await.unwrap();
        assert_eq!(archived.items[0].id, first.id);
        assert!(
            store
                .find_one(&OrderFilter::by_id(first.id))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_order_rejected() {
        let store = InMemoryShopStore::new();
        let o = order(UserId::new());
        store.create(o.clone()).await.unwrap();
        assert!(matches!(
            store.create(o).await,
            Err(StoreError::Duplicate { .. })
        ));
    }
}
