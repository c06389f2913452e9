//! Domain error types.

use common::ProductId;
use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised by the order model itself.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in a state that allows the requested move.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    /// A line carries a zero quantity.
    #[error("Invalid quantity {quantity} for product {product_id} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Order has no lines.
    #[error("Order has no lines")]
    NoLines,

    /// A product referenced by a cart line has no catalog snapshot.
    #[error("Missing catalog entry for product {0}")]
    MissingProduct(ProductId),
}
