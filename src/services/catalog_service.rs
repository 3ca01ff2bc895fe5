//! Products, variants and the card pool.

use rust_decimal::Decimal;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::card::{Card, CardStatus, ImportCardsRequest, parse_card_lines};
use crate::models::product::{
    CreateProductRequest, Product, ProductResponse, ProductStatus, ProductVariant,
    UpdateStockRequest,
};
use crate::models::setting::StockMode;

pub async fn find_product<'e, E>(executor: E, product_id: Uuid) -> Result<Option<Product>, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(executor)
        .await?;
    Ok(product)
}

pub async fn variants_of<'e, E>(executor: E, product_id: Uuid) -> Result<Vec<ProductVariant>, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let variants = sqlx::query_as::<_, ProductVariant>(
        "SELECT * FROM product_variants WHERE product_id = $1 ORDER BY sort_order, name",
    )
    .bind(product_id)
    .fetch_all(executor)
    .await?;
    Ok(variants)
}

/// Storefront listing: active products with their active variants.
pub async fn list_products(pool: &DbPool) -> Result<Vec<ProductResponse>, AppError> {
    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products WHERE status = 'active' ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    let mut responses = Vec::with_capacity(products.len());
    for product in products {
        let variants = variants_of(pool, product.id)
            .await?
            .into_iter()
            .filter(|v| v.status == ProductStatus::Active)
            .collect();
        responses.push(ProductResponse { product, variants });
    }
    Ok(responses)
}

pub async fn get_product(pool: &DbPool, product_id: Uuid) -> Result<ProductResponse, AppError> {
    let product = find_product(pool, product_id)
        .await?
        .filter(|p| p.status == ProductStatus::Active)
        .ok_or(AppError::ProductNotFound)?;
    let variants = variants_of(pool, product.id)
        .await?
        .into_iter()
        .filter(|v| v.status == ProductStatus::Active)
        .collect();
    Ok(ProductResponse { product, variants })
}

/// Create a product and its variants in one transaction.
pub async fn create_product(
    pool: &DbPool,
    request: CreateProductRequest,
) -> Result<ProductResponse, AppError> {
    request.validate()?;
    if request.price < Decimal::ZERO || request.variants.iter().any(|v| v.price < Decimal::ZERO) {
        return Err(AppError::InvalidRequest("Prices must not be negative".to_string()));
    }

    let mut tx = pool.begin().await?;

    let product = sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (name, description, price, original_price, category_id, stock)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&request.name)
    .bind(&request.description)
    .bind(request.price)
    .bind(request.original_price)
    .bind(request.category_id)
    .bind(request.stock)
    .fetch_one(&mut *tx)
    .await?;

    let mut variants = Vec::with_capacity(request.variants.len());
    for (sort_order, variant) in request.variants.iter().enumerate() {
        let variant = sqlx::query_as::<_, ProductVariant>(
            r#"
            INSERT INTO product_variants (product_id, name, price, stock, sort_order)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(product.id)
        .bind(&variant.name)
        .bind(variant.price)
        .bind(variant.stock)
        .bind(sort_order as i32)
        .fetch_one(&mut *tx)
        .await?;
        variants.push(variant);
    }

    tx.commit().await?;

    tracing::info!("Created product {} ({})", product.name, product.id);
    Ok(ProductResponse { product, variants })
}

/// Set a stock counter by hand. Only meaningful in manual stock mode; in auto
/// mode the next card import or deletion recomputes it.
pub async fn update_stock(
    pool: &DbPool,
    product_id: Uuid,
    request: UpdateStockRequest,
) -> Result<(), AppError> {
    request.validate()?;

    let updated = match request.variant_id {
        Some(variant_id) => sqlx::query(
            "UPDATE product_variants SET stock = $1 WHERE id = $2 AND product_id = $3",
        )
        .bind(request.stock)
        .bind(variant_id)
        .bind(product_id)
        .execute(pool)
        .await?
        .rows_affected(),
        None => sqlx::query("UPDATE products SET stock = $1, updated_at = NOW() WHERE id = $2")
            .bind(request.stock)
            .bind(product_id)
            .execute(pool)
            .await?
            .rows_affected(),
    };

    if updated == 0 {
        return Err(AppError::ProductNotFound);
    }
    Ok(())
}

/// Number of cards that could be sold right now for a product or variant.
pub async fn count_available_cards<'e, E>(
    executor: E,
    product_id: Uuid,
    variant_id: Option<Uuid>,
) -> Result<i64, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM cards
        WHERE product_id = $1
          AND ($2::uuid IS NULL OR variant_id = $2)
          AND status = 'available'
        "#,
    )
    .bind(product_id)
    .bind(variant_id)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

/// Quantity that can be ordered under the given stock mode.
pub async fn available_stock(
    pool: &DbPool,
    stock_mode: StockMode,
    product: &Product,
    variant: Option<&ProductVariant>,
) -> Result<i64, AppError> {
    match stock_mode {
        StockMode::Auto => count_available_cards(pool, product.id, variant.map(|v| v.id)).await,
        StockMode::Manual => Ok(i64::from(variant.map_or(product.stock, |v| v.stock))),
    }
}

/// Recompute product and variant stock from the AVAILABLE card count.
async fn sync_stock_with_pool(
    tx: &mut sqlx::PgConnection,
    product_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE product_variants v
        SET stock = (
            SELECT COUNT(*) FROM cards c
            WHERE c.variant_id = v.id AND c.status = 'available'
        )
        WHERE v.product_id = $1
        "#,
    )
    .bind(product_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE products
        SET stock = (
            SELECT COUNT(*) FROM cards c
            WHERE c.product_id = $1 AND c.status = 'available'
        ),
        updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(product_id)
    .execute(&mut *tx)
    .await?;

    Ok(())
}

/// Import cards, one per line of the request content.
///
/// In auto stock mode the stock counters are recomputed in the same
/// transaction.
pub async fn import_cards(
    pool: &DbPool,
    stock_mode: StockMode,
    product_id: Uuid,
    request: ImportCardsRequest,
) -> Result<usize, AppError> {
    request.validate()?;
    let lines = parse_card_lines(&request.content);
    if lines.is_empty() {
        return Err(AppError::InvalidRequest("No card content supplied".to_string()));
    }

    let mut tx = pool.begin().await?;

    find_product(&mut *tx, product_id)
        .await?
        .ok_or(AppError::ProductNotFound)?;
    if let Some(variant_id) = request.variant_id {
        let belongs: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM product_variants WHERE id = $1 AND product_id = $2)",
        )
        .bind(variant_id)
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;
        if !belongs {
            return Err(AppError::InvalidRequest(
                "Variant does not belong to this product".to_string(),
            ));
        }
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO cards (product_id, variant_id, content)
        SELECT $1, $2, content FROM UNNEST($3::text[]) AS t(content)
        "#,
    )
    .bind(product_id)
    .bind(request.variant_id)
    .bind(&lines)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if stock_mode == StockMode::Auto {
        sync_stock_with_pool(&mut tx, product_id).await?;
    }

    tx.commit().await?;

    tracing::info!("Imported {inserted} cards for product {product_id}");
    Ok(inserted as usize)
}

/// Delete a card. Sold cards belong to an order and cannot be deleted.
pub async fn delete_card(
    pool: &DbPool,
    stock_mode: StockMode,
    card_id: Uuid,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let card = sqlx::query_as::<_, Card>("SELECT * FROM cards WHERE id = $1 FOR UPDATE")
        .bind(card_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::CardNotFound)?;

    if card.status == CardStatus::Sold {
        return Err(AppError::InvalidState(
            "Sold cards cannot be deleted".to_string(),
        ));
    }

    sqlx::query("DELETE FROM cards WHERE id = $1")
        .bind(card_id)
        .execute(&mut *tx)
        .await?;

    if stock_mode == StockMode::Auto {
        sync_stock_with_pool(&mut tx, card.product_id).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Cards sold to an order.
pub async fn cards_for_order<'e, E>(executor: E, order_id: Uuid) -> Result<Vec<Card>, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let cards = sqlx::query_as::<_, Card>(
        "SELECT * FROM cards WHERE order_id = $1 ORDER BY sold_at, created_at, id",
    )
    .bind(order_id)
    .fetch_all(executor)
    .await?;
    Ok(cards)
}
