//! Order creation, checkout, webhook, cancellation and listing endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use common::{CouponId, OrderId};
use domain::{Order, PaymentType};
use serde::{Deserialize, Serialize};
use store::{OrderQuery, Page, ShopStore};
use validator::Validate;
use workflow::gateway::webhook::SIGNATURE_HEADER;
use workflow::{CreateOrder, PaymentGateway, WorkflowError};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 500, message = "address is required"))]
    pub address: String,
    #[validate(length(min = 5, max = 32, message = "phone is required"))]
    pub phone: String,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
    pub coupon: Option<CouponId>,
    #[serde(default)]
    pub payment_type: PaymentType,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelOrderRequest {
    #[validate(length(min = 1, max = 1000))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListOrdersParams {
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    pub size: Option<u32>,
    #[serde(default)]
    pub archived: bool,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub external_id: String,
    pub status: String,
    pub payment_type: String,
    pub address: String,
    pub phone: String,
    pub note: Option<String>,
    pub lines: Vec<OrderLineResponse>,
    pub coupon: Option<String>,
    pub discount: f64,
    pub total_cents: i64,
    pub subtotal_cents: i64,
    pub paid_at: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub final_price_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            external_id: order.external_id.to_string(),
            status: order.status.as_str().to_string(),
            payment_type: order.payment_type.to_string(),
            address: order.address.clone(),
            phone: order.phone.clone(),
            note: order.note.clone(),
            lines: order
                .lines
                .iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id.to_string(),
                    name: line.name.clone(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price.cents(),
                    final_price_cents: line.final_price.cents(),
                })
                .collect(),
            coupon: order.coupon.map(|c| c.to_string()),
            discount: order.discount.value(),
            total_cents: order.total.cents(),
            subtotal_cents: order.subtotal.cents(),
            paid_at: order.paid_at.map(|t| t.to_rfc3339()),
            cancel_reason: order.cancel_reason.clone(),
            created_at: order.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct OrderPageResponse {
    pub items: Vec<OrderResponse>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub pages: u64,
}

impl From<Page<Order>> for OrderPageResponse {
    fn from(page: Page<Order>) -> Self {
        Self {
            items: page.items.iter().map(OrderResponse::from).collect(),
            total: page.total,
            page: page.page,
            size: page.size,
            pages: page.pages,
        }
    }
}

// -- Handlers --

/// POST /orders: turn the caller's cart into an order.
#[tracing::instrument(skip(state, user, req), fields(user = %user.id))]
pub async fn create<S: ShopStore, P: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    user: AuthUser,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    req.validate()?;

    let mut request =
        CreateOrder::new(req.address, req.phone).with_payment_type(req.payment_type);
    if let Some(coupon) = req.coupon {
        request = request.with_coupon(coupon);
    }
    if let Some(note) = req.note {
        request = request.with_note(note);
    }

    let order = state.workflow.create_order(user.id, request).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// POST /orders/{id}/checkout: open a payment session for a pending card order.
#[tracing::instrument(skip(state, user), fields(user = %user.id))]
pub async fn checkout<S: ShopStore, P: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let order_id = parse_order_id(&id)?;
    let buyer = user.buyer()?;

    let session = state.workflow.checkout(order_id, &buyer).await?;
    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            session_id: session.id,
            url: session.url,
        }),
    ))
}

/// POST /orders/webhook: payment gateway callback.
///
/// Answers 200 whether or not the delivery changed anything.
#[tracing::instrument(skip_all)]
pub async fn webhook<S: ShopStore, P: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            WorkflowError::InvalidSignature(format!("missing {SIGNATURE_HEADER} header"))
        })?;

    state.workflow.handle_webhook(&body, signature).await?;
    Ok(Json(MessageResponse { message: "Done" }))
}

/// PATCH /orders/{id}/cancel: cancel an order. Admins only.
#[tracing::instrument(skip(state, user, body), fields(user = %user.id))]
pub async fn cancel<S: ShopStore, P: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Option<Json<CancelOrderRequest>>,
) -> Result<Json<OrderResponse>, ApiError> {
    user.require_admin()?;
    let order_id = parse_order_id(&id)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;

    let order = state
        .workflow
        .cancel_order(order_id, user.id, req.reason)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders: page through live or archived orders. Admins only.
#[tracing::instrument(skip(state, user), fields(user = %user.id))]
pub async fn list<S: ShopStore, P: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    user: AuthUser,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<OrderPageResponse>, ApiError> {
    user.require_admin()?;
    params.validate()?;

    let defaults = OrderQuery::default();
    let query = OrderQuery::new(
        params.page.unwrap_or(defaults.page),
        params.size.unwrap_or(defaults.size),
        params.archived,
    );
    let page = state.workflow.list_orders(query).await?;
    Ok(Json(OrderPageResponse::from(page)))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
