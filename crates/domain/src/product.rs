//! Catalog snapshot read during checkout.

use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::order::Money;

/// Current price and stock of a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Current sale price.
    pub price: Money,
    pub stock: u32,
}

impl Product {
    /// Returns true if `quantity` units can be taken from stock.
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.stock >= quantity
    }
}

/// A product's stock level after a change, as published to realtime clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChange {
    pub product_id: ProductId,
    pub new_stock: u32,
}
