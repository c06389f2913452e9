//! Order workflow for the storefront.
//!
//! The [`OrderWorkflow`] engine drives four operations:
//! 1. Create an order from the caller's cart (coupon, stock, pricing)
//! 2. Open a checkout session and bind a payment intent to a card order
//! 3. Reconcile payment webhooks, placing each pending order exactly once
//! 4. Cancel an order, restoring stock and coupon usage and refunding cards
//!
//! External collaborators sit behind traits: [`ShopStore`](store::ShopStore),
//! [`PaymentGateway`] and [`StockBroadcaster`].

pub mod engine;
pub mod error;
pub mod gateway;
pub mod realtime;

pub use engine::{Buyer, CreateOrder, OrderWorkflow, WebhookOutcome};
pub use error::{Result, WorkflowError};
pub use gateway::{
    CheckoutCompleted, CheckoutSession, CheckoutSessionRequest, GatewayError,
    InMemoryPaymentGateway, IntentStatus, LineItem, PaymentGateway, PaymentIntent, Refund,
    StripeConfig, StripeGateway, WebhookVerifier,
};
pub use realtime::{ConnectionManager, RealtimeHub, StockBroadcaster};
