//! Pricing of cart contents against current catalog prices.

use crate::cart::CartLine;
use crate::product::Product;

use super::{Money, OrderError, OrderLine};

/// Cart lines priced at current catalog prices.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedCart {
    pub lines: Vec<OrderLine>,
    pub total: Money,
}

/// Prices each cart line with the product's current price.
///
/// `products` must hold a snapshot for every cart line, in any order.
/// Stock is not checked here; callers re-read stock before pricing.
pub fn price_lines(cart_lines: &[CartLine], products: &[Product]) -> Result<PricedCart, OrderError> {
    let mut lines = Vec::with_capacity(cart_lines.len());
    let mut total = Money::zero();

    for cart_line in cart_lines {
        let product = products
            .iter()
            .find(|p| p.id == cart_line.product_id)
            .ok_or(OrderError::MissingProduct(cart_line.product_id))?;

        if cart_line.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                product_id: cart_line.product_id,
                quantity: 0,
            });
        }

        let line = OrderLine::new(
            product.id,
            product.name.clone(),
            cart_line.quantity,
            product.price,
        );
        total += line.final_price;
        lines.push(line);
    }

    Ok(PricedCart { lines, total })
}
