//! Order ledger: creation, lookup with lazy expiry, cancellation.
//!
//! # Lazy Expiry
//!
//! There is no background timer for unpaid orders. Every read path goes
//! through [`check_and_expire`], which cancels a PENDING order older than
//! the configured timeout before returning it. An order nobody reads stays
//! nominally PENDING, which is harmless: stock is checked at creation, never
//! reserved, and the USDT matcher ignores orders past their window.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::card::Card;
use crate::models::order::{CreateOrderRequest, Order, OrderListQuery, OrderStatus, order_total};
use crate::models::payment::PaymentMethod;
use crate::models::product::{ProductStatus, resolve_unit_price};
use crate::models::setting::StoreSettings;
use crate::services::{catalog_service, payment_service};

/// Order number collisions are retried this many times before giving up.
const ORDER_NO_ATTEMPTS: usize = 5;

/// Generate a human-facing order number: `YYYYMMDDHHMMSS` plus six random
/// digits. Uniqueness is enforced by the `orders.order_no` index, not here.
pub fn generate_order_no(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::rng().random_range(0..1_000_000);
    format!("{}{:06}", now.format("%Y%m%d%H%M%S"), suffix)
}

/// Create a PENDING order and its PENDING payment record.
///
/// # Process
///
/// 1. Validate the request and the payment method
/// 2. Check the product (and variant) are on sale
/// 3. Check available stock under the configured stock mode
/// 4. Snapshot the price and insert order + payment in one transaction
///
/// # Errors
///
/// - `InvalidRequest`: bad fields, disabled payment method, missing variant
/// - `ProductNotFound`: product does not exist
/// - `InvalidState`: product or variant is not on sale
/// - `OutOfStock`: not enough stock for `quantity`
pub async fn create_order(
    pool: &DbPool,
    settings: &StoreSettings,
    request: CreateOrderRequest,
) -> Result<Order, AppError> {
    request.validate()?;

    if !payment_service::method_enabled(settings, request.payment_method) {
        return Err(AppError::InvalidRequest(format!(
            "Payment method '{}' is not available",
            request.payment_method.as_str()
        )));
    }

    let product = catalog_service::find_product(pool, request.product_id)
        .await?
        .ok_or(AppError::ProductNotFound)?;
    if product.status != ProductStatus::Active {
        return Err(AppError::InvalidState("Product is not on sale".to_string()));
    }

    let variants = catalog_service::variants_of(pool, product.id).await?;
    let variant = match request.variant_id {
        Some(variant_id) => {
            let variant = variants
                .iter()
                .find(|v| v.id == variant_id)
                .ok_or_else(|| AppError::InvalidRequest("Unknown variant".to_string()))?;
            if variant.status != ProductStatus::Active {
                return Err(AppError::InvalidState("Variant is not on sale".to_string()));
            }
            Some(variant)
        }
        None if variants.iter().any(|v| v.status == ProductStatus::Active) => {
            return Err(AppError::InvalidRequest(
                "A variant must be selected for this product".to_string(),
            ));
        }
        None => None,
    };

    let available =
        catalog_service::available_stock(pool, settings.stock_mode, &product, variant).await?;
    if available < i64::from(request.quantity) {
        return Err(AppError::OutOfStock);
    }

    let unit_price = resolve_unit_price(&product, variant);
    let total_amount = order_total(unit_price, request.quantity);
    let new_order = NewOrder {
        email: request.email.trim().to_string(),
        product_id: product.id,
        product_name: product.name.clone(),
        variant_id: variant.map(|v| v.id),
        variant_name: variant.map(|v| v.name.clone()),
        quantity: request.quantity,
        unit_price,
        total_amount,
        payment_method: request.payment_method,
        remark: request.remark,
    };

    for attempt in 1..=ORDER_NO_ATTEMPTS {
        let order_no = generate_order_no(Utc::now());
        match insert_order(pool, &order_no, &new_order).await {
            Ok(order) => {
                tracing::info!(
                    "Created order {} for {} x {} ({})",
                    order.order_no,
                    order.quantity,
                    order.product_name,
                    order.total_amount
                );
                return Ok(order);
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tracing::warn!("Order number {order_no} collided (attempt {attempt})");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::InvalidState(
        "Could not allocate an order number, please retry".to_string(),
    ))
}

struct NewOrder {
    email: String,
    product_id: Uuid,
    product_name: String,
    variant_id: Option<Uuid>,
    variant_name: Option<String>,
    quantity: i32,
    unit_price: Decimal,
    total_amount: Decimal,
    payment_method: PaymentMethod,
    remark: Option<String>,
}

async fn insert_order(
    pool: &DbPool,
    order_no: &str,
    new_order: &NewOrder,
) -> Result<Order, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (
            order_no, email, product_id, product_name, variant_id, variant_name,
            quantity, unit_price, total_amount, payment_method, remark
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(order_no)
    .bind(&new_order.email)
    .bind(new_order.product_id)
    .bind(&new_order.product_name)
    .bind(new_order.variant_id)
    .bind(&new_order.variant_name)
    .bind(new_order.quantity)
    .bind(new_order.unit_price)
    .bind(new_order.total_amount)
    .bind(new_order.payment_method)
    .bind(&new_order.remark)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO payments (order_id, payment_method, amount) VALUES ($1, $2, $3)")
        .bind(order.id)
        .bind(order.payment_method)
        .bind(order.total_amount)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(order)
}

/// Fetch an order without any expiry side effect.
pub async fn find_order<'e, E>(executor: E, order_no: &str) -> Result<Option<Order>, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_no = $1")
        .bind(order_no)
        .fetch_optional(executor)
        .await?;
    Ok(order)
}

/// Cancel `order` if it is PENDING and past `timeout`; otherwise return it
/// unchanged.
///
/// The update is conditional on the order still being PENDING, so a payment
/// confirmed a moment earlier wins and repeated reads never flip the status
/// back and forth.
pub async fn check_and_expire(
    pool: &DbPool,
    order: Order,
    timeout: Duration,
) -> Result<Order, AppError> {
    if !order.is_expired(Utc::now(), timeout) {
        return Ok(order);
    }

    let expired = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = 'cancelled', cancelled_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(order.id)
    .fetch_optional(pool)
    .await?;

    match expired {
        Some(order) => {
            tracing::info!("Order {} expired unpaid", order.order_no);
            Ok(order)
        }
        None => find_order(pool, &order.order_no)
            .await?
            .ok_or(AppError::OrderNotFound),
    }
}

/// Look an order up by number, applying lazy expiry first.
pub async fn get_order(pool: &DbPool, order_no: &str, timeout: Duration) -> Result<Order, AppError> {
    let order = find_order(pool, order_no)
        .await?
        .ok_or(AppError::OrderNotFound)?;
    check_and_expire(pool, order, timeout).await
}

/// Look an order up together with the cards sold to it.
pub async fn get_order_with_cards(
    pool: &DbPool,
    order_no: &str,
    timeout: Duration,
) -> Result<(Order, Vec<Card>), AppError> {
    let order = get_order(pool, order_no, timeout).await?;
    let cards = if order.status == OrderStatus::Completed {
        catalog_service::cards_for_order(pool, order.id).await?
    } else {
        Vec::new()
    };
    Ok((order, cards))
}

/// Cancel a PENDING order at the buyer's request.
///
/// # Errors
///
/// - `OrderNotFound`: no such order
/// - `InvalidState`: order is not PENDING (including one that just expired)
pub async fn cancel_order(
    pool: &DbPool,
    order_no: &str,
    timeout: Duration,
) -> Result<Order, AppError> {
    let order = get_order(pool, order_no, timeout).await?;
    if !order.status.can_transition_to(OrderStatus::Cancelled) {
        return Err(not_pending(&order));
    }

    let cancelled = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = 'cancelled', cancelled_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(order.id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| not_pending(&order))?;

    tracing::info!("Order {} cancelled by buyer", cancelled.order_no);
    Ok(cancelled)
}

/// Operator listing, newest first.
pub async fn list_orders(pool: &DbPool, query: &OrderListQuery) -> Result<Vec<Order>, AppError> {
    let orders = sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE ($1::order_status IS NULL OR status = $1)
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(query.status)
    .bind(query.limit.clamp(1, 500))
    .fetch_all(pool)
    .await?;
    Ok(orders)
}

pub(crate) fn not_pending(order: &Order) -> AppError {
    AppError::InvalidState(format!(
        "Order {} is {}, expected pending",
        order.order_no,
        order.status.as_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn order_no_is_date_prefixed() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 8, 5, 1).unwrap();
        let order_no = generate_order_no(now);
        assert_eq!(order_no.len(), 20);
        assert!(order_no.starts_with("20250309080501"));
        assert!(order_no.chars().all(|c| c.is_ascii_digit()));
    }
}
