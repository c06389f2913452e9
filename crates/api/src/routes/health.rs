//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use store::ShopStore;
use workflow::PaymentGateway;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub online_users: usize,
}

/// GET /health: returns liveness and the number of connected realtime users.
pub async fn check<S: ShopStore, P: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        online_users: state.hub.connections().online_count(),
    })
}
