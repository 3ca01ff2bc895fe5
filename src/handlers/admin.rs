//! Operator endpoints. All routes here sit behind the admin key middleware.
//!
//! - POST /api/v1/admin/products - Create a product with variants
//! - PUT /api/v1/admin/products/{id}/stock - Set a stock counter
//! - POST /api/v1/admin/products/{id}/cards - Import cards
//! - DELETE /api/v1/admin/cards/{id} - Delete an unsold card
//! - GET /api/v1/admin/orders - List orders, optionally by status
//! - POST /api/v1/admin/orders/{order_no}/dispense - Dispense a paid order
//! - GET|PUT /api/v1/admin/settings - Read or change store settings

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        card::{ImportCardsRequest, ImportCardsResponse},
        order::{DispenseRequest, OrderListQuery, OrderResponse},
        product::{CreateProductRequest, ProductResponse, UpdateStockRequest},
        setting::StoreSettings,
    },
    services::{
        catalog_service, dispense_service, notification_service, order_service, settings_service,
    },
    state::AppState,
};

pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), AppError> {
    let product = catalog_service::create_product(&state.pool, request).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(request): Json<UpdateStockRequest>,
) -> Result<StatusCode, AppError> {
    catalog_service::update_stock(&state.pool, product_id, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Import cards, one per line.
///
/// # Request Body
///
/// ```json
/// { "variant_id": null, "content": "CODE-1\nCODE-2\n" }
/// ```
pub async fn import_cards(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(request): Json<ImportCardsRequest>,
) -> Result<(StatusCode, Json<ImportCardsResponse>), AppError> {
    let settings = settings_service::load(&state.pool).await?;
    let imported =
        catalog_service::import_cards(&state.pool, settings.stock_mode, product_id, request)
            .await?;
    Ok((StatusCode::CREATED, Json(ImportCardsResponse { imported })))
}

pub async fn delete_card(
    State(state): State<AppState>,
    Path(card_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let settings = settings_service::load(&state.pool).await?;
    catalog_service::delete_card(&state.pool, settings.stock_mode, card_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Vec<OrderResponse>>, AppError> {
    let orders = order_service::list_orders(&state.pool, &query).await?;
    Ok(Json(orders.into_iter().map(Into::into).collect()))
}

/// Dispense a PAID order by hand.
///
/// An empty body retries the automatic claim; `{"cards": "..."}` delivers
/// the given cards instead. The buyer is emailed on success.
pub async fn dispense_order(
    State(state): State<AppState>,
    Path(order_no): Path<String>,
    body: Option<Json<DispenseRequest>>,
) -> Result<Json<OrderResponse>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let (order, cards) = dispense_service::dispense_order(
        &state.pool,
        &order_no,
        state.config.order_timeout(),
        request,
    )
    .await?;

    notification_service::spawn_order_completed_email(
        state.pool.clone(),
        order.clone(),
        cards.clone(),
    );
    Ok(Json(OrderResponse::new(
        order,
        cards.into_iter().map(Into::into).collect(),
    )))
}

pub async fn get_settings(State(state): State<AppState>) -> Result<Json<StoreSettings>, AppError> {
    Ok(Json(settings_service::load(&state.pool).await?))
}

/// Change store settings.
///
/// Values may be JSON strings, booleans or numbers; they are stored as text.
/// Unknown keys and values that do not parse are rejected before anything
/// is written.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(body): Json<HashMap<String, Value>>,
) -> Result<Json<StoreSettings>, AppError> {
    let updates = body
        .into_iter()
        .map(|(key, value)| setting_text(&key, value).map(|text| (key, text)))
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(Json(settings_service::update(&state.pool, updates).await?))
}

fn setting_text(key: &str, value: Value) -> Result<String, AppError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(AppError::InvalidRequest(format!(
            "Setting '{key}' must be a string, boolean or number"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setting_values_become_text() {
        assert_eq!(setting_text("usdt_enabled", json!(true)).unwrap(), "true");
        assert_eq!(setting_text("smtp_port", json!(587)).unwrap(), "587");
        assert_eq!(setting_text("usdt_exchange_rate", json!("7.1")).unwrap(), "7.1");
        assert!(matches!(
            setting_text("smtp_host", json!(["a"])),
            Err(AppError::InvalidRequest(_))
        ));
    }
}
