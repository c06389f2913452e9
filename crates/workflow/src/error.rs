//! Workflow error types.

use common::{CouponId, OrderId, ProductId};
use domain::OrderError;
use store::StoreError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors surfaced by the order workflow engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The caller has no cart, or the cart has no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// The referenced coupon does not exist.
    #[error("Coupon not found: {0}")]
    CouponNotFound(CouponId),

    /// The caller already redeemed the coupon as often as it allows.
    #[error("Coupon {0} already used the maximum number of times")]
    CouponExhausted(CouponId),

    /// The coupon exists but is outside its validity window.
    #[error("Coupon {0} is not active")]
    CouponNotActive(CouponId),

    /// A cart product is missing or has less stock than requested.
    #[error("Product unavailable: {0}")]
    ProductUnavailable(ProductId),

    /// No order matched the guarded lookup or update.
    #[error("Failed to find matching order: {0}")]
    OrderNotFound(OrderId),

    /// The order exists but is not a pending card order of the caller.
    #[error("Order {order_id} is not eligible for {action}")]
    NotEligible {
        order_id: OrderId,
        action: &'static str,
    },

    /// The gateway refused a refund because the payment never succeeded.
    #[error("Payment intent {0} is not eligible for refund")]
    RefundNotEligible(String),

    /// Webhook signature did not verify.
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// Webhook event type is not handled.
    #[error("Unsupported webhook event: {0}")]
    UnsupportedEvent(String),

    /// Payment gateway error.
    #[error("Payment gateway error: {0}")]
    Gateway(#[source] GatewayError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Domain error.
    #[error("Domain error: {0}")]
    Order(#[from] OrderError),
}

impl From<GatewayError> for WorkflowError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidSignature(reason) => WorkflowError::InvalidSignature(reason),
            GatewayError::UnsupportedEvent(kind) => WorkflowError::UnsupportedEvent(kind),
            other => WorkflowError::Gateway(other),
        }
    }
}

/// Convenience type alias for workflow results.
pub type Result<T> = std::result::Result<T, WorkflowError>;
