//! Integration tests for the order workflow engine.

use chrono::{Duration, Utc};
use common::{CouponId, ExternalOrderId, OrderId, ProductId, UserId};
use domain::{Coupon, CouponType, Money, OrderStatus, PaymentType, Product};
use store::{
    CartStore, CouponLedger, InMemoryShopStore, OrderFilter, OrderPatch, OrderQuery,
    OrderRepository,
};
use workflow::{
    Buyer, CreateOrder, InMemoryPaymentGateway, IntentStatus, OrderWorkflow, RealtimeHub,
    WebhookOutcome, WorkflowError,
};

type TestWorkflow = OrderWorkflow<InMemoryShopStore, InMemoryPaymentGateway, RealtimeHub>;

struct TestHarness {
    workflow: TestWorkflow,
    store: InMemoryShopStore,
    gateway: InMemoryPaymentGateway,
    hub: RealtimeHub,
    user: UserId,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryShopStore::new();
        let gateway = InMemoryPaymentGateway::new();
        let hub = RealtimeHub::default();
        let workflow = OrderWorkflow::new(store.clone(), gateway.clone(), hub.clone());

        Self {
            workflow,
            store,
            gateway,
            hub,
            user: UserId::new(),
        }
    }

    fn buyer(&self) -> Buyer {
        Buyer {
            id: self.user,
            email: "buyer@example.com".to_string(),
        }
    }

    async fn product(&self, price_cents: i64, stock: u32) -> ProductId {
        let id = ProductId::new();
        self.store
            .insert_product(Product {
                id,
                name: format!("Product {price_cents}"),
                price: Money::from_cents(price_cents),
                stock,
            })
            .await;
        id
    }

    async fn coupon(&self, kind: CouponType, discount: f64, duration: u32) -> CouponId {
        let now = Utc::now();
        let id = CouponId::new();
        self.store
            .insert_coupon(Coupon {
                id,
                name: format!("coupon-{id}"),
                slug: format!("coupon-{id}"),
                discount,
                kind,
                starts_at: now - Duration::days(1),
                ends_at: now + Duration::days(7),
                duration,
                used_by: vec![],
            })
            .await;
        id
    }

    async fn fill_cart(&self, product: ProductId, quantity: u32) {
        self.workflow
            .add_to_cart(self.user, product, quantity)
            .await
            .unwrap();
    }

    fn webhook(&self, kind: &str, external_id: &ExternalOrderId) -> (Vec<u8>, String) {
        let body = serde_json::json!({
            "id": "evt_test",
            "type": kind,
            "data": { "object": { "id": "cs_0001", "metadata": { "orderId": external_id.as_str() } } }
        })
        .to_string()
        .into_bytes();
        let signature = self
            .gateway
            .verifier()
            .sign(&body, Utc::now().timestamp())
            .unwrap();
        (body, signature)
    }

    async fn card_order_checked_out(&self) -> (OrderId, ExternalOrderId) {
        let product = self.product(1000, 5).await;
        self.fill_cart(product, 2).await;
        let order = self
            .workflow
            .create_order(
                self.user,
                CreateOrder::new("12 Nile St", "01000000000").with_payment_type(PaymentType::Card),
            )
            .await
            .unwrap();
        self.workflow
            .checkout(order.id, &self.buyer())
            .await
            .unwrap();
        (order.id, order.external_id)
    }
}

#[tokio::test]
async fn test_cash_order_from_cart() {
    let h = TestHarness::new();
    let product = h.product(1000, 5).await;
    h.fill_cart(product, 2).await;
    let mut updates = h.hub.subscribe();

    let order = h
        .workflow
        .create_order(h.user, CreateOrder::new("12 Nile St", "01000000000"))
        .await
        .unwrap();

    assert_eq!(order.total, Money::from_cents(2000));
    assert!(order.discount.is_zero());
    assert_eq!(order.subtotal, Money::from_cents(2000));
    assert_eq!(order.status, OrderStatus::Placed);
    assert_eq!(order.lines[0].unit_price, Money::from_cents(1000));
    assert_eq!(h.store.stock_of(product).await, Some(3));
    assert!(h.store.get_cart(h.user).await.unwrap().is_none());

    let changes = updates.recv().await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].new_stock, 3);
}

#[tokio::test]
async fn test_percent_coupon_discounts_subtotal() {
    let h = TestHarness::new();
    let product = h.product(1000, 5).await;
    let coupon = h.coupon(CouponType::Percent, 10.0, 1).await;
    h.fill_cart(product, 2).await;

    let order = h
        .workflow
        .create_order(
            h.user,
            CreateOrder::new("12 Nile St", "01000000000").with_coupon(coupon),
        )
        .await
        .unwrap();

    assert_eq!(order.total, Money::from_cents(2000));
    assert_eq!(order.discount.value(), 0.1);
    assert_eq!(order.subtotal, Money::from_cents(1800));

    let stored = h.store.find_coupon(coupon).await.unwrap().unwrap();
    assert_eq!(stored.usage_count(h.user), 1);
}

#[tokio::test]
async fn test_fixed_coupon_becomes_fraction_of_total() {
    let h = TestHarness::new();
    let product = h.product(1000, 5).await;
    let coupon = h.coupon(CouponType::Fixed, 5.0, 1).await;
    h.fill_cart(product, 2).await;

    let order = h
        .workflow
        .create_order(
            h.user,
            CreateOrder::new("addr", "phone").with_coupon(coupon),
        )
        .await
        .unwrap();

    assert_eq!(order.discount.value(), 0.25);
    assert_eq!(order.subtotal, Money::from_cents(1500));
}

#[tokio::test]
async fn test_subtotal_invariant_holds_for_odd_prices() {
    let h = TestHarness::new();
    let a = h.product(3333, 10).await;
    let b = h.product(1999, 10).await;
    let coupon = h.coupon(CouponType::Percent, 15.0, 5).await;
    h.fill_cart(a, 3).await;
    h.fill_cart(b, 1).await;

    let order = h
        .workflow
        .create_order(h.user, CreateOrder::new("addr", "phone").with_coupon(coupon))
        .await
        .unwrap();

    let expected = (order.total.cents() as f64 * (1.0 - order.discount.value())).round() as i64;
    assert_eq!(order.subtotal.cents(), expected);
    assert_eq!(order.total, Money::from_cents(3 * 3333 + 1999));
}

#[tokio::test]
async fn test_exhausted_coupon_persists_nothing() {
    let h = TestHarness::new();
    let product = h.product(1000, 10).await;
    let coupon = h.coupon(CouponType::Percent, 10.0, 1).await;

    h.fill_cart(product, 1).await;
    h.workflow
        .create_order(h.user, CreateOrder::new("addr", "phone").with_coupon(coupon))
        .await
        .unwrap();

    h.fill_cart(product, 1).await;
    let err = h
        .workflow
        .create_order(h.user, CreateOrder::new("addr", "phone").with_coupon(coupon))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::CouponExhausted(id) if id == coupon));
    assert_eq!(h.store.order_count().await, 1);
    assert_eq!(h.store.stock_of(product).await, Some(9));
    assert!(h.store.get_cart(h.user).await.unwrap().is_some());
}

#[tokio::test]
async fn test_unknown_and_expired_coupons_rejected() {
    let h = TestHarness::new();
    let product = h.product(1000, 10).await;
    h.fill_cart(product, 1).await;

    let missing = CouponId::new();
    let err = h
        .workflow
        .create_order(h.user, CreateOrder::new("addr", "phone").with_coupon(missing))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::CouponNotFound(id) if id == missing));

    let now = Utc::now();
    let expired = CouponId::new();
    h.store
        .insert_coupon(Coupon {
            id: expired,
            name: "old".to_string(),
            slug: "old".to_string(),
            discount: 50.0,
            kind: CouponType::Percent,
            starts_at: now - Duration::days(10),
            ends_at: now - Duration::days(1),
            duration: 1,
            used_by: vec![],
        })
        .await;
    let err = h
        .workflow
        .create_order(h.user, CreateOrder::new("addr", "phone").with_coupon(expired))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::CouponNotActive(_)));
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_insufficient_stock_leaves_cart_untouched() {
    let h = TestHarness::new();
    let plenty = h.product(1000, 10).await;
    let scarce = h.product(500, 3).await;
    h.fill_cart(plenty, 1).await;
    h.fill_cart(scarce, 3).await;
    h.store
        .insert_product(Product {
            id: scarce,
            name: "Scarce".to_string(),
            price: Money::from_cents(500),
            stock: 1,
        })
        .await;

    let err = h
        .workflow
        .create_order(h.user, CreateOrder::new("addr", "phone"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::ProductUnavailable(id) if id == scarce));
    assert_eq!(h.store.order_count().await, 0);
    assert_eq!(h.store.stock_of(plenty).await, Some(10));
    let cart = h.store.get_cart(h.user).await.unwrap().unwrap();
    assert_eq!(cart.lines.len(), 2);
}

#[tokio::test]
async fn test_order_uses_current_catalog_price() {
    let h = TestHarness::new();
    let product = h.product(1000, 10).await;
    h.fill_cart(product, 2).await;
    h.store
        .insert_product(Product {
            id: product,
            name: "Repriced".to_string(),
            price: Money::from_cents(1200),
            stock: 10,
        })
        .await;

    let order = h
        .workflow
        .create_order(h.user, CreateOrder::new("addr", "phone"))
        .await
        .unwrap();

    assert_eq!(order.lines[0].unit_price, Money::from_cents(1200));
    assert_eq!(order.lines[0].name, "Repriced");
    assert_eq!(order.total, Money::from_cents(2400));
}

#[tokio::test]
async fn test_checkout_binds_intent_and_keeps_pending() {
    let h = TestHarness::new();
    let product = h.product(1000, 5).await;
    let coupon = h.coupon(CouponType::Percent, 10.0, 1).await;
    h.fill_cart(product, 2).await;
    let order = h
        .workflow
        .create_order(
            h.user,
            CreateOrder::new("addr", "phone")
                .with_coupon(coupon)
                .with_payment_type(PaymentType::Card),
        )
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    let session = h.workflow.checkout(order.id, &h.buyer()).await.unwrap();
    assert_eq!(session.id, "cs_0001");
    assert_eq!(
        session.metadata.get("orderId").map(String::as_str),
        Some(order.external_id.as_str())
    );
    assert_eq!(h.gateway.discount_percents(), vec![10.0]);

    let request = h.gateway.last_session_request().unwrap();
    assert_eq!(request.customer_email, "buyer@example.com");
    assert_eq!(request.line_items[0].unit_amount, 1000);
    assert_eq!(request.line_items[0].quantity, 2);

    let stored = h
        .store
        .find_one(&OrderFilter::by_id(order.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(stored.payment_intent.as_deref(), Some("pi_0001"));
    assert_eq!(h.gateway.intent("pi_0001").unwrap().amount, 1800);
}

#[tokio::test]
async fn test_checkout_gateway_failure_surfaces() {
    let h = TestHarness::new();
    let product = h.product(1000, 5).await;
    h.fill_cart(product, 1).await;
    let order = h
        .workflow
        .create_order(
            h.user,
            CreateOrder::new("addr", "phone").with_payment_type(PaymentType::Card),
        )
        .await
        .unwrap();
    h.gateway.set_fail_on_checkout(true);

    let err = h.workflow.checkout(order.id, &h.buyer()).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Gateway(_)));
    let stored = h
        .store
        .find_one(&OrderFilter::by_id(order.id))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.payment_intent.is_none());
}

#[tokio::test]
async fn test_checkout_rejects_fully_discounted_order() {
    let h = TestHarness::new();
    let product = h.product(1000, 5).await;
    let coupon = h.coupon(CouponType::Fixed, 50.0, 1).await;
    h.fill_cart(product, 2).await;
    let order = h
        .workflow
        .create_order(
            h.user,
            CreateOrder::new("addr", "phone")
                .with_coupon(coupon)
                .with_payment_type(PaymentType::Card),
        )
        .await
        .unwrap();
    assert_eq!(order.subtotal, Money::from_cents(0));

    let err = h.workflow.checkout(order.id, &h.buyer()).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotEligible { .. }));
    assert_eq!(h.gateway.session_count(), 0);
    assert!(h.gateway.discount_percents().is_empty());
}

#[tokio::test]
async fn test_webhook_places_order_once() {
    let h = TestHarness::new();
    let (order_id, external_id) = h.card_order_checked_out().await;
    let (body, signature) = h.webhook("checkout.session.completed", &external_id);

    let outcome = h.workflow.handle_webhook(&body, &signature).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Placed(order_id));

    let placed = h
        .store
        .find_one(&OrderFilter::by_id(order_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(placed.status, OrderStatus::Placed);
    assert!(placed.paid_at.is_some());
    assert_eq!(
        h.gateway.intent("pi_0001").unwrap().status,
        IntentStatus::Succeeded
    );

    let replay = h.workflow.handle_webhook(&body, &signature).await.unwrap();
    assert_eq!(replay, WebhookOutcome::AlreadyProcessed);
    let after = h
        .store
        .find_one(&OrderFilter::by_id(order_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.version, placed.version);
    assert_eq!(after.paid_at, placed.paid_at);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature_and_other_events() {
    let h = TestHarness::new();
    let (_, external_id) = h.card_order_checked_out().await;

    let (body, _) = h.webhook("checkout.session.completed", &external_id);
    let err = h
        .workflow
        .handle_webhook(&body, "t=1,v1=00")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidSignature(_)));

    let (body, signature) = h.webhook("payment_intent.succeeded", &external_id);
    let err = h.workflow.handle_webhook(&body, &signature).await.unwrap_err();
    assert!(matches!(err, WorkflowError::UnsupportedEvent(kind) if kind == "payment_intent.succeeded"));
}

#[tokio::test]
async fn test_webhook_for_unknown_order_is_noop() {
    let h = TestHarness::new();
    let (body, signature) = h.webhook(
        "checkout.session.completed",
        &ExternalOrderId::new("00000000"),
    );
    let outcome = h.workflow.handle_webhook(&body, &signature).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);
}

#[tokio::test]
async fn test_signed_webhook_without_order_reference_is_ignored() {
    let h = TestHarness::new();
    let (order_id, _) = h.card_order_checked_out().await;
    let now = Utc::now().timestamp();

    let empty_metadata = serde_json::json!({
        "id": "evt_other",
        "type": "checkout.session.completed",
        "data": { "object": { "id": "cs_x", "metadata": {} } }
    })
    .to_string()
    .into_bytes();
    for body in [empty_metadata, b"{not json".to_vec()] {
        let signature = h.gateway.verifier().sign(&body, now).unwrap();
        let outcome = h.workflow.handle_webhook(&body, &signature).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    let order = h
        .store
        .find_one(&OrderFilter::by_id(order_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.paid_at.is_none());
}

#[tokio::test]
async fn test_webhook_confirmation_failure_keeps_placement() {
    let h = TestHarness::new();
    let (order_id, external_id) = h.card_order_checked_out().await;
    h.gateway.set_fail_on_confirm(true);
    let (body, signature) = h.webhook("checkout.session.completed", &external_id);

    let outcome = h.workflow.handle_webhook(&body, &signature).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::ConfirmationFailed(order_id));

    let order = h
        .store
        .find_one(&OrderFilter::by_id(order_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Placed);
}

#[tokio::test]
async fn test_cancel_cash_order_restores_stock_and_coupon() {
    let h = TestHarness::new();
    let product = h.product(1000, 5).await;
    let coupon = h.coupon(CouponType::Percent, 10.0, 2).await;
    h.fill_cart(product, 2).await;
    let order = h
        .workflow
        .create_order(h.user, CreateOrder::new("addr", "phone").with_coupon(coupon))
        .await
        .unwrap();
    assert_eq!(h.store.stock_of(product).await, Some(3));

    let admin = UserId::new();
    let cancelled = h
        .workflow
        .cancel_order(order.id, admin, Some("out of area".to_string()))
        .await
        .unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.updated_by, Some(admin));
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("out of area"));
    assert_eq!(h.store.stock_of(product).await, Some(5));
    let stored = h.store.find_coupon(coupon).await.unwrap().unwrap();
    assert_eq!(stored.usage_count(h.user), 0);
    assert_eq!(h.gateway.refund_count(), 0);
}

#[tokio::test]
async fn test_cancel_twice_fails_second_time() {
    let h = TestHarness::new();
    let product = h.product(1000, 5).await;
    h.fill_cart(product, 1).await;
    let order = h
        .workflow
        .create_order(h.user, CreateOrder::new("addr", "phone"))
        .await
        .unwrap();
    let admin = UserId::new();

    h.workflow.cancel_order(order.id, admin, None).await.unwrap();
    let err = h
        .workflow
        .cancel_order(order.id, admin, None)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::OrderNotFound(id) if id == order.id));
    assert_eq!(h.store.stock_of(product).await, Some(5));
}

#[tokio::test]
async fn test_cancel_paid_card_order_refunds() {
    let h = TestHarness::new();
    let (order_id, external_id) = h.card_order_checked_out().await;
    let (body, signature) = h.webhook("checkout.session.completed", &external_id);
    h.workflow.handle_webhook(&body, &signature).await.unwrap();

    h.workflow
        .cancel_order(order_id, UserId::new(), None)
        .await
        .unwrap();
    assert_eq!(h.gateway.refund_count(), 1);
}

#[tokio::test]
async fn test_cancel_unpaid_card_order_not_refundable() {
    let h = TestHarness::new();
    let (order_id, _) = h.card_order_checked_out().await;
    assert_eq!(
        h.gateway.intent("pi_0001").unwrap().status,
        IntentStatus::RequiresConfirmation
    );

    let err = h
        .workflow
        .cancel_order(order_id, UserId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::RefundNotEligible(ref id) if id == "pi_0001"));

    let order = h
        .store
        .find_one(&OrderFilter::by_id(order_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(h.gateway.refund_count(), 0);
}

#[tokio::test]
async fn test_cancel_card_order_without_checkout_skips_refund() {
    let h = TestHarness::new();
    let product = h.product(1000, 5).await;
    h.fill_cart(product, 1).await;
    let order = h
        .workflow
        .create_order(
            h.user,
            CreateOrder::new("addr", "phone").with_payment_type(PaymentType::Card),
        )
        .await
        .unwrap();

    let cancelled = h
        .workflow
        .cancel_order(order.id, UserId::new(), None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(h.gateway.refund_count(), 0);
}

#[tokio::test]
async fn test_delivered_order_still_cancellable() {
    let h = TestHarness::new();
    let product = h.product(1000, 5).await;
    h.fill_cart(product, 1).await;
    let order = h
        .workflow
        .create_order(h.user, CreateOrder::new("addr", "phone"))
        .await
        .unwrap();
    h.store
        .conditional_update(
            &OrderFilter::by_id(order.id),
            &OrderPatch {
                status: Some(OrderStatus::Delivered),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let cancelled = h
        .workflow
        .cancel_order(order.id, UserId::new(), None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_list_orders_paginates() {
    let h = TestHarness::new();
    let product = h.product(100, 100).await;
    for _ in 0..3 {
        h.fill_cart(product, 1).await;
        h.workflow
            .create_order(h.user, CreateOrder::new("addr", "phone"))
            .await
            .unwrap();
    }

    let page = h
        .workflow
        .list_orders(OrderQuery::new(1, 2, false))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.pages, 2);
}
