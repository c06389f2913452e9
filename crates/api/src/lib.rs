//! HTTP API server for the storefront order workflow.
//!
//! Exposes cart, order, checkout, webhook and cancellation endpoints over the
//! [`OrderWorkflow`], with structured logging (tracing) and Prometheus
//! metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use store::ShopStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use workflow::{OrderWorkflow, PaymentGateway, RealtimeHub};

/// Shared application state accessible from all handlers.
pub struct AppState<S: ShopStore, P: PaymentGateway> {
    pub workflow: OrderWorkflow<S, P, RealtimeHub>,
    pub hub: RealtimeHub,
}

impl<S: ShopStore, P: PaymentGateway> AppState<S, P> {
    /// Wires the workflow to `store`, `gateway` and a stock broadcast hub.
    pub fn new(store: S, gateway: P, hub: RealtimeHub) -> Self {
        Self {
            workflow: OrderWorkflow::new(store, gateway, hub.clone()),
            hub,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: ShopStore, P: PaymentGateway + 'static>(
    state: Arc<AppState<S, P>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S, P>))
        .route("/cart", put(routes::cart::put_line::<S, P>))
        .route(
            "/orders",
            post(routes::orders::create::<S, P>).get(routes::orders::list::<S, P>),
        )
        .route("/orders/webhook", post(routes::orders::webhook::<S, P>))
        .route("/orders/{id}/checkout", post(routes::orders::checkout::<S, P>))
        .route("/orders/{id}/cancel", patch(routes::orders::cancel::<S, P>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
