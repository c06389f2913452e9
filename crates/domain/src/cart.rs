//! The user's single active cart.

use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};

/// A product and quantity held in a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl CartLine {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// One cart per user, consumed when an order is created from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub owner: UserId,
    pub lines: Vec<CartLine>,
}

impl Cart {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            lines: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sets the quantity for a product, adding the line if it is not present.
    pub fn set_quantity(&mut self, product_id: ProductId, quantity: u32) {
        match self.lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => line.quantity = quantity,
            None => self.lines.push(CartLine::new(product_id, quantity)),
        }
    }

    /// Lines with duplicate products folded together, in first-seen order.
    pub fn merged_lines(&self) -> Vec<CartLine> {
        let mut merged: Vec<CartLine> = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            match merged.iter_mut().find(|m| m.product_id == line.product_id) {
                Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
                None => merged.push(*line),
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_quantity_replaces_existing_line() {
        let mut cart = Cart::new(UserId::new());
        let product = ProductId::new();
        cart.set_quantity(product, 2);
        cart.set_quantity(product, 5);
        assert_eq!(cart.lines, vec![CartLine::new(product, 5)]);
    }

    #[test]
    fn test_merged_lines_folds_duplicates() {
        let a = ProductId::new();
        let b = ProductId::new();
        let cart = Cart {
            owner: UserId::new(),
            lines: vec![CartLine::new(a, 1), CartLine::new(b, 2), CartLine::new(a, 3)],
        };
        assert_eq!(
            cart.merged_lines(),
            vec![CartLine::new(a, 4), CartLine::new(b, 2)]
        );
    }

    #[test]
    fn test_merged_lines_saturate_on_overflow() {
        let a = ProductId::new();
        let cart = Cart {
            owner: UserId::new(),
            lines: vec![CartLine::new(a, u32::MAX), CartLine::new(a, 2)],
        };
        assert_eq!(cart.merged_lines(), vec![CartLine::new(a, u32::MAX)]);
    }
}
