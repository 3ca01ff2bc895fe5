//! Buyer order endpoints.
//!
//! - POST /api/v1/orders - Place an order
//! - GET /api/v1/orders/{order_no} - Look an order up (cards included once completed)
//! - POST /api/v1/orders/{order_no}/cancel - Cancel an unpaid order

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    error::AppError,
    models::order::{CreateOrderRequest, OrderResponse},
    services::{order_service, settings_service},
    state::AppState,
};

/// Place an order.
///
/// # Request Body
///
/// ```json
/// {
///   "product_id": "550e8400-e29b-41d4-a716-446655440000",
///   "variant_id": null,
///   "quantity": 1,
///   "email": "buyer@example.com",
///   "payment_method": "alipay"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the PENDING order
/// - **Error (400)**: invalid fields or a disabled payment method
/// - **Error (404)**: unknown product
/// - **Error (409)**: product or variant not on sale
/// - **Error (422)**: not enough stock
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let settings = settings_service::load(&state.pool).await?;
    let order = order_service::create_order(&state.pool, &settings, request).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// Look an order up by number.
///
/// An unpaid order past its payment window is cancelled before it is
/// returned.
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_no): Path<String>,
) -> Result<Json<OrderResponse>, AppError> {
    let (order, cards) =
        order_service::get_order_with_cards(&state.pool, &order_no, state.config.order_timeout())
            .await?;
    Ok(Json(OrderResponse::new(
        order,
        cards.into_iter().map(Into::into).collect(),
    )))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_no): Path<String>,
) -> Result<Json<OrderResponse>, AppError> {
    let order =
        order_service::cancel_order(&state.pool, &order_no, state.config.order_timeout()).await?;
    Ok(Json(order.into()))
}
