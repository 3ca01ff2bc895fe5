//! Public catalog endpoints.
//!
//! - GET /api/v1/products - List products on sale
//! - GET /api/v1/products/{id} - Get one product with its variants

use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use crate::{
    db::DbPool, error::AppError, models::product::ProductResponse,
    services::catalog_service,
};

pub async fn list_products(
    State(pool): State<DbPool>,
) -> Result<Json<Vec<ProductResponse>>, AppError> {
    Ok(Json(catalog_service::list_products(&pool).await?))
}

/// Get a product by id.
///
/// # Response
///
/// - **Success (200 OK)**: product fields plus a `variants` array
/// - **Error (404)**: unknown or inactive product
pub async fn get_product(
    State(pool): State<DbPool>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<ProductResponse>, AppError> {
    Ok(Json(catalog_service::get_product(&pool, product_id).await?))
}
