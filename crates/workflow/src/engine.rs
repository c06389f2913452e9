//! Order workflow engine.
//!
//! Orchestrates cart-to-order conversion, checkout, webhook reconciliation and
//! cancellation across the store, the payment gateway and the stock
//! broadcaster. Every state change is a conditional write; steps that cannot be
//! undone once later ones fail are logged as reconciliation hazards.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use common::{CouponId, OrderId, ProductId, UserId};
use domain::{
    Cart, CartLine, DiscountFraction, NewOrder, Order, OrderStatus, OrderTransition, PaymentType,
    Product, StockChange, price_lines,
};
use store::{OrderFilter, OrderPatch, OrderQuery, Page, ShopStore};
use tracing::{error, info, warn};

use crate::error::{Result, WorkflowError};
use crate::gateway::webhook::ORDER_METADATA_KEY;
use crate::gateway::{
    CheckoutSession, CheckoutSessionRequest, GatewayError, LineItem, PaymentGateway,
};
use crate::realtime::StockBroadcaster;

/// Caller-supplied fields of a new order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub address: String,
    pub phone: String,
    pub note: Option<String>,
    pub coupon: Option<CouponId>,
    pub payment_type: PaymentType,
}

impl CreateOrder {
    /// A cash order without note or coupon.
    pub fn new(address: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            phone: phone.into(),
            note: None,
            coupon: None,
            payment_type: PaymentType::Cash,
        }
    }

    pub fn with_coupon(mut self, coupon: CouponId) -> Self {
        self.coupon = Some(coupon);
        self
    }

    pub fn with_payment_type(mut self, payment_type: PaymentType) -> Self {
        self.payment_type = payment_type;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// The authenticated buyer starting a checkout.
#[derive(Debug, Clone)]
pub struct Buyer {
    pub id: UserId,
    pub email: String,
}

/// What a verified webhook delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The order moved from Pending to Placed and the intent was confirmed.
    Placed(OrderId),
    /// No pending card order matched; nothing changed.
    AlreadyProcessed,
    /// The signed delivery carried no usable order reference; nothing changed.
    Ignored,
    /// The order was placed but the gateway confirmation failed.
    ConfirmationFailed(OrderId),
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Placed(_) => "placed",
            WebhookOutcome::AlreadyProcessed => "already_processed",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::ConfirmationFailed(_) => "confirmation_failed",
        }
    }
}

fn record_hazard(kind: &'static str) {
    metrics::counter!("order_reconciliation_hazards_total", "kind" => kind).increment(1);
}

fn record_duration(operation: &'static str, started: Instant) {
    metrics::histogram!("order_workflow_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

/// Drives orders from cart to payment and back out through cancellation.
pub struct OrderWorkflow<S, P, B>
where
    S: ShopStore,
    P: PaymentGateway,
    B: StockBroadcaster,
{
    store: S,
    gateway: P,
    broadcaster: B,
}

impl<S, P, B> OrderWorkflow<S, P, B>
where
    S: ShopStore,
    P: PaymentGateway,
    B: StockBroadcaster,
{
    /// Creates a new workflow engine.
    pub fn new(store: S, gateway: P, broadcaster: B) -> Self {
        Self {
            store,
            gateway,
            broadcaster,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gateway(&self) -> &P {
        &self.gateway
    }

    /// Turns the user's cart into an order.
    ///
    /// Validation (cart, coupon, stock) happens before any write. Once the
    /// order is persisted, stock decrements and cart deletion are applied
    /// best-effort and failures are logged as hazards; the order is still
    /// returned.
    #[tracing::instrument(skip(self, request), fields(payment_type = %request.payment_type))]
    pub async fn create_order(&self, user: UserId, request: CreateOrder) -> Result<Order> {
        let started = Instant::now();

        let cart = self
            .store
            .get_cart(user)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or(WorkflowError::EmptyCart)?;
        let cart_lines = cart.merged_lines();

        let coupon = match request.coupon {
            Some(coupon_id) => {
                let coupon = self
                    .store
                    .find_coupon(coupon_id)
                    .await?
                    .ok_or(WorkflowError::CouponNotFound(coupon_id))?;
                if !coupon.is_active_at(Utc::now()) {
                    return Err(WorkflowError::CouponNotActive(coupon_id));
                }
                if coupon.is_exhausted_for(user) {
                    return Err(WorkflowError::CouponExhausted(coupon_id));
                }
                Some(coupon)
            }
            None => None,
        };

        let products = self.available_products(&cart_lines).await?;
        let priced = price_lines(&cart_lines, &products)?;
        let discount = coupon
            .as_ref()
            .map(|c| c.discount_fraction(priced.total))
            .unwrap_or(DiscountFraction::NONE);

        let order = Order::place(NewOrder {
            address: request.address,
            phone: request.phone,
            note: request.note,
            lines: priced.lines,
            coupon: request.coupon,
            discount,
            payment_type: request.payment_type,
            created_by: user,
        })?;

        // Redemption is claimed atomically; losing the race means the cap was hit
        if let Some(coupon_id) = request.coupon
            && !self.store.record_usage_within_limit(coupon_id, user).await?
        {
            return Err(WorkflowError::CouponExhausted(coupon_id));
        }

        let order = match self.store.create(order).await {
            Ok(order) => order,
            Err(e) => {
                if let Some(coupon_id) = request.coupon {
                    self.release_coupon(coupon_id, user).await;
                }
                return Err(e.into());
            }
        };

        let changes = self.take_stock(&order).await;
        self.broadcaster.publish_stock_change(changes);

        if let Err(e) = self.store.delete_cart(user).await {
            error!(hazard = "cart_delete", order_id = %order.id, error = %e, "order created but cart not deleted");
            record_hazard("cart_delete");
        }

        metrics::counter!("orders_created_total", "payment_type" => order.payment_type.as_str())
            .increment(1);
        record_duration("create_order", started);
        info!(order_id = %order.id, external_id = %order.external_id, total = %order.total, subtotal = %order.subtotal, "order created");

        Ok(order)
    }

    /// Opens a gateway checkout session for a pending card order of `buyer`.
    ///
    /// The order keeps its Pending status; only the payment intent handle is
    /// stored.
    #[tracing::instrument(skip(self, buyer), fields(user = %buyer.id))]
    pub async fn checkout(&self, order_id: OrderId, buyer: &Buyer) -> Result<CheckoutSession> {
        let started = Instant::now();

        let filter = OrderFilter::by_id(order_id)
            .created_by(buyer.id)
            .payment_type(PaymentType::Card)
            .status(OrderStatus::Pending);
        let Some(order) = self.store.find_one(&filter).await? else {
            return Err(self.checkout_miss(order_id, buyer.id).await?);
        };
        if order.subtotal.cents() <= 0 {
            warn!(%order_id, "fully discounted card order has nothing to charge");
            return Err(WorkflowError::NotEligible {
                order_id,
                action: "checkout",
            });
        }

        let mut discounts = Vec::new();
        if !order.discount.is_zero() {
            let handle = self
                .gateway
                .create_one_time_discount(order.discount.percent_off())
                .await?;
            discounts.push(handle);
        }

        let request = CheckoutSessionRequest {
            customer_email: buyer.email.clone(),
            metadata: BTreeMap::from([(
                ORDER_METADATA_KEY.to_string(),
                order.external_id.to_string(),
            )]),
            discounts,
            line_items: order
                .lines
                .iter()
                .map(|line| LineItem {
                    name: line.name.clone(),
                    unit_amount: line.unit_price.cents(),
                    quantity: line.quantity,
                })
                .collect(),
        };
        let session = self.gateway.create_checkout_session(request).await?;

        let method = self.gateway.create_payment_method().await?;
        let intent = self
            .gateway
            .create_payment_intent(order.subtotal, &method)
            .await?;

        let patch = OrderPatch {
            payment_intent: Some(intent.id.clone()),
            ..Default::default()
        };
        if self.store.conditional_update(&filter, &patch).await?.is_none() {
            warn!(%order_id, intent_id = %intent.id, "order left Pending during checkout");
            return Err(WorkflowError::NotEligible {
                order_id,
                action: "checkout",
            });
        }

        metrics::counter!("order_checkouts_total").increment(1);
        record_duration("checkout", started);
        info!(%order_id, session_id = %session.id, intent_id = %intent.id, "checkout session created");

        Ok(session)
    }

    /// Consumes a payment gateway webhook delivery.
    ///
    /// Errors only when the signature or the event type is rejected. Replays,
    /// deliveries for unknown orders and signed bodies without an order
    /// reference are successful no-ops.
    #[tracing::instrument(skip(self, payload, signature), fields(bytes = payload.len()))]
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookOutcome> {
        let started = Instant::now();

        let event = match self.gateway.verify_webhook(payload, signature) {
            Ok(event) => event,
            Err(GatewayError::MalformedEvent(reason)) => {
                warn!(%reason, "signed webhook without a usable order reference, ignoring");
                let outcome = WebhookOutcome::Ignored;
                metrics::counter!("order_webhooks_total", "outcome" => outcome.label()).increment(1);
                record_duration("webhook", started);
                return Ok(outcome);
            }
            Err(e) => {
                metrics::counter!("order_webhooks_total", "outcome" => "rejected").increment(1);
                warn!(error = %e, "webhook rejected");
                return Err(e.into());
            }
        };

        let placed = OrderStatus::Pending.apply(OrderTransition::ConfirmPayment)?;
        let filter = OrderFilter::by_external_id(event.external_order_id.clone())
            .status(OrderStatus::Pending)
            .payment_type(PaymentType::Card);
        let patch = OrderPatch {
            status: Some(placed),
            paid_at: Some(Utc::now()),
            ..Default::default()
        };

        let outcome = match self.store.conditional_update(&filter, &patch).await? {
            None => {
                info!(event_id = %event.event_id, external_id = %event.external_order_id, "no pending order for webhook, ignoring");
                WebhookOutcome::AlreadyProcessed
            }
            Some(order) => self.confirm_payment(&order).await,
        };

        metrics::counter!("order_webhooks_total", "outcome" => outcome.label()).increment(1);
        record_duration("webhook", started);

        Ok(outcome)
    }

    /// Cancels an order that is not yet cancelled.
    ///
    /// Restores stock, releases one coupon redemption and refunds card
    /// payments. The local cancellation stands even if the refund fails.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        cancelled_by: UserId,
        reason: Option<String>,
    ) -> Result<Order> {
        let started = Instant::now();

        let patch = OrderPatch {
            status: Some(OrderStatus::Cancelled),
            updated_by: Some(cancelled_by),
            cancel_reason: reason,
            ..Default::default()
        };
        let filter = OrderFilter::by_id(order_id).status_below(OrderStatus::Cancelled);
        let order = self
            .store
            .conditional_update(&filter, &patch)
            .await?
            .ok_or(WorkflowError::OrderNotFound(order_id))?;

        metrics::counter!("orders_cancelled_total").increment(1);
        info!(%order_id, "order cancelled");

        let changes = self.restore_stock(&order).await;
        self.broadcaster.publish_stock_change(changes);

        if let Some(coupon_id) = order.coupon {
            self.release_coupon(coupon_id, order.created_by).await;
        }

        let result = match (order.payment_type, order.payment_intent.as_deref()) {
            (PaymentType::Card, Some(intent_id)) => self.refund(&order, intent_id).await,
            (PaymentType::Card, None) => {
                info!(%order_id, "card order never checked out, no refund needed");
                Ok(())
            }
            (PaymentType::Cash, _) => Ok(()),
        };

        record_duration("cancel_order", started);
        result.map(|()| order)
    }

    /// Sets a product's quantity in the user's cart after an availability check.
    #[tracing::instrument(skip(self))]
    pub async fn add_to_cart(&self, user: UserId, product: ProductId, quantity: u32) -> Result<Cart> {
        match self.store.find_product(product).await? {
            Some(p) if p.has_stock_for(quantity) => {}
            _ => return Err(WorkflowError::ProductUnavailable(product)),
        }
        Ok(self.store.upsert_cart_line(user, product, quantity).await?)
    }

    /// Lists live or archived orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, query: OrderQuery) -> Result<Page<Order>> {
        Ok(self.store.list(&query).await?)
    }

    async fn available_products(&self, lines: &[CartLine]) -> Result<Vec<Product>> {
        let mut products = Vec::with_capacity(lines.len());
        for line in lines {
            match self.store.find_product(line.product_id).await? {
                Some(product) if product.has_stock_for(line.quantity) => products.push(product),
                _ => return Err(WorkflowError::ProductUnavailable(line.product_id)),
            }
        }
        Ok(products)
    }

    async fn take_stock(&self, order: &Order) -> Vec<StockChange> {
        let mut changes = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            match self
                .store
                .conditional_decrement_stock(line.product_id, line.quantity)
                .await
            {
                Ok(Some(new_stock)) => changes.push(StockChange {
                    product_id: line.product_id,
                    new_stock,
                }),
                Ok(None) => {
                    error!(hazard = "stock_decrement", order_id = %order.id, product_id = %line.product_id, quantity = line.quantity, "stock fell below order quantity before decrement");
                    record_hazard("stock_decrement");
                }
                Err(e) => {
                    error!(hazard = "stock_decrement", order_id = %order.id, product_id = %line.product_id, error = %e, "stock decrement failed");
                    record_hazard("stock_decrement");
                }
            }
        }
        changes
    }

    async fn restore_stock(&self, order: &Order) -> Vec<StockChange> {
        let mut changes = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            match self
                .store
                .conditional_increment_stock(line.product_id, line.quantity)
                .await
            {
                Ok(Some(new_stock)) => changes.push(StockChange {
                    product_id: line.product_id,
                    new_stock,
                }),
                Ok(None) => {
                    error!(hazard = "stock_restore", order_id = %order.id, product_id = %line.product_id, "product gone, stock not restored");
                    record_hazard("stock_restore");
                }
                Err(e) => {
                    error!(hazard = "stock_restore", order_id = %order.id, product_id = %line.product_id, error = %e, "stock restore failed");
                    record_hazard("stock_restore");
                }
            }
        }
        changes
    }

    async fn release_coupon(&self, coupon_id: CouponId, user: UserId) {
        match self.store.remove_usage(coupon_id, user).await {
            Ok(true) => {}
            Ok(false) => warn!(%coupon_id, %user, "no coupon redemption to release"),
            Err(e) => {
                error!(hazard = "coupon_release", %coupon_id, %user, error = %e, "coupon redemption not released");
                record_hazard("coupon_release");
            }
        }
    }

    async fn confirm_payment(&self, order: &Order) -> WebhookOutcome {
        let Some(intent_id) = order.payment_intent.as_deref() else {
            error!(hazard = "payment_confirmation", order_id = %order.id, "order placed without a payment intent");
            record_hazard("payment_confirmation");
            return WebhookOutcome::ConfirmationFailed(order.id);
        };

        match self.gateway.confirm_payment_intent(intent_id).await {
            Ok(intent) => {
                info!(order_id = %order.id, intent_id, status = %intent.status, "payment confirmed, order placed");
                WebhookOutcome::Placed(order.id)
            }
            Err(e) => {
                error!(hazard = "payment_confirmation", order_id = %order.id, intent_id, error = %e, "order placed but intent confirmation failed");
                record_hazard("payment_confirmation");
                WebhookOutcome::ConfirmationFailed(order.id)
            }
        }
    }

    async fn refund(&self, order: &Order, intent_id: &str) -> Result<()> {
        match self.gateway.refund(intent_id).await {
            Ok(refund) => {
                info!(order_id = %order.id, intent_id, refund_id = %refund.id, "payment refunded");
                Ok(())
            }
            Err(GatewayError::UnexpectedIntentStatus { actual, .. }) => {
                warn!(order_id = %order.id, intent_id, status = %actual, "cancelled order not refundable");
                Err(WorkflowError::RefundNotEligible(intent_id.to_string()))
            }
            Err(e) => {
                error!(hazard = "refund", order_id = %order.id, intent_id, error = %e, "order cancelled but refund failed");
                record_hazard("refund");
                Err(e.into())
            }
        }
    }

    /// Explains why the guarded checkout lookup matched nothing.
    async fn checkout_miss(&self, order_id: OrderId, user: UserId) -> Result<WorkflowError> {
        let owned = self
            .store
            .find_one(&OrderFilter::by_id(order_id).created_by(user))
            .await?;
        Ok(match owned {
            Some(_) => WorkflowError::NotEligible {
                order_id,
                action: "checkout",
            },
            None => WorkflowError::OrderNotFound(order_id),
        })
    }
}
