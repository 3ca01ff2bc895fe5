//! Product catalog models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "product_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Inactive,
}

/// Represents a product record from the database.
///
/// # Stock
///
/// In `auto` stock mode `stock` mirrors the number of AVAILABLE cards and is
/// kept in step by card import, deletion and dispensing. In `manual` mode it
/// is whatever the operator last set.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub stock: i32,
    pub sold_count: i32,
    pub status: ProductStatus,
    pub category_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ProductVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
    pub status: ProductStatus,
    pub sort_order: i32,
}

/// Product with its variants, as shown in the storefront.
#[derive(Debug, Serialize)]
pub struct ProductResponse {
    #[serde(flatten)]
    pub product: Product,
    pub variants: Vec<ProductVariant>,
}

/// Request body for creating a product.
///
/// ```json
/// {
///   "name": "Streaming Premium 1 Month",
///   "price": "49.90",
///   "variants": [{ "name": "Shared", "price": "19.90" }]
/// }
/// ```
#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub stock: i32,
    #[serde(default)]
    #[validate(nested)]
    pub variants: Vec<CreateVariantRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateVariantRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub stock: i32,
}

/// Operator override of a stock counter (manual stock mode).
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStockRequest {
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 0))]
    pub stock: i32,
}

/// Unit price for an order line: the variant price overrides the product price.
pub fn resolve_unit_price(product: &Product, variant: Option<&ProductVariant>) -> Decimal {
    variant.map_or(product.price, |v| v.price)
}
