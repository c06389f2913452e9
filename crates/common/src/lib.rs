//! Shared identifier types for the storefront order workflow.

pub mod ids;

pub use ids::{CouponId, ExternalOrderId, OrderId, ProductId, UserId};
