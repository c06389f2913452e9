//! Cart endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use common::ProductId;
use domain::Cart;
use serde::{Deserialize, Serialize};
use store::ShopStore;
use validator::Validate;
use workflow::PaymentGateway;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize, Validate)]
pub struct CartLineRequest {
    pub product_id: ProductId,
    #[validate(range(min = 1, max = 1000, message = "quantity must be between 1 and 1000"))]
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub owner: String,
    pub lines: Vec<CartLineResponse>,
}

#[derive(Serialize)]
pub struct CartLineResponse {
    pub product_id: String,
    pub quantity: u32,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        Self {
            owner: cart.owner.to_string(),
            lines: cart
                .lines
                .into_iter()
                .map(|line| CartLineResponse {
                    product_id: line.product_id.to_string(),
                    quantity: line.quantity,
                })
                .collect(),
        }
    }
}

/// PUT /cart: set a product's quantity in the caller's cart.
#[tracing::instrument(skip(state, user), fields(user = %user.id))]
pub async fn put_line<S: ShopStore, P: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    user: AuthUser,
    Json(req): Json<CartLineRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    req.validate()?;
    let cart = state
        .workflow
        .add_to_cart(user.id, req.product_id, req.quantity)
        .await?;
    Ok(Json(CartResponse::from(cart)))
}
