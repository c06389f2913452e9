//! Domain layer for the storefront order workflow.
//!
//! This crate provides the documents the workflow reads and writes:
//! - [`Order`] with its embedded [`OrderLine`] snapshots and status machine
//! - [`Cart`], [`Coupon`] and [`Product`] snapshots owned by collaborators
//! - Pricing rules: current-price line capture and discount fractions

pub mod cart;
pub mod coupon;
pub mod error;
pub mod order;
pub mod product;

pub use cart::{Cart, CartLine};
pub use coupon::{Coupon, CouponType, slugify};
pub use error::OrderError;
pub use order::{
    DiscountFraction, Money, NewOrder, Order, OrderLine, OrderStatus, OrderTransition,
    PaymentType, PricedCart, price_lines,
};
pub use product::{Product, StockChange};
