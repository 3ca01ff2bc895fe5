//! Payment completion and card dispensing.
//!
//! # Completion
//!
//! Every confirmation path (Alipay notify, WeChat notify, USDT matcher,
//! demo page) ends in [`complete_payment`]:
//!
//! 1. Missing, COMPLETED or CANCELLED orders are a no-op
//! 2. PENDING orders move to PAID together with their payment (one transaction)
//! 3. Cards are claimed and the order moves PAID → COMPLETED (second transaction)
//!
//! If step 3 finds too few cards the order stays PAID. The payment is never
//! undone once a gateway confirmed it; an operator dispenses by hand later.
//!
//! # Atomic Claim
//!
//! Dispensing locks the order row, then claims cards with a single
//! `UPDATE ... FOR UPDATE SKIP LOCKED`. Two orders for the same product can
//! never read the same AVAILABLE cards, and two completions of the same order
//! serialize on the order row.

use chrono::Utc;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::card::{Card, parse_card_lines};
use crate::models::order::{DispenseRequest, Order, OrderStatus};
use crate::models::payment::PaymentMethod;
use crate::services::order_service;

/// What a completion call did.
#[derive(Debug)]
pub enum CompletionOutcome {
    /// Cards were dispensed by this call; the buyer should be notified.
    Completed { order: Order, cards: Vec<Card> },
    /// Payment recorded but not enough cards; the order stays PAID.
    AwaitingStock(Order),
    /// Another call already completed the order.
    AlreadyCompleted,
    /// Money arrived for an order that was cancelled. Needs a refund.
    Cancelled,
    NotFound,
}

impl CompletionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CompletionOutcome::Completed { .. } => "completed",
            CompletionOutcome::AwaitingStock(_) => "awaiting_stock",
            CompletionOutcome::AlreadyCompleted => "already_completed",
            CompletionOutcome::Cancelled => "cancelled",
            CompletionOutcome::NotFound => "not_found",
        }
    }

    /// The order and cards to email the buyer about, if this call delivered.
    ///
    /// Only `Completed` delivers; every other outcome sends nothing, so a
    /// repeated confirmation never emails twice.
    pub fn delivery(&self) -> Option<(&Order, &[Card])> {
        match self {
            CompletionOutcome::Completed { order, cards } => Some((order, cards.as_slice())),
            _ => None,
        }
    }
}

/// Record a confirmed payment and dispense the order's cards.
///
/// Safe to call repeatedly with the same arguments: a second call finds the
/// order COMPLETED and does nothing.
pub async fn complete_payment(
    pool: &DbPool,
    order_no: &str,
    trade_no: &str,
    method: PaymentMethod,
) -> Result<CompletionOutcome, AppError> {
    let Some(mut order) = order_service::find_order(pool, order_no).await? else {
        tracing::warn!("Payment {trade_no} refers to unknown order {order_no}");
        return Ok(CompletionOutcome::NotFound);
    };

    if order.status == OrderStatus::Pending {
        order = match mark_paid(pool, &order, trade_no, method).await? {
            Some(paid) => paid,
            // Lost a race with another confirmation or a cancellation.
            None => order_service::find_order(pool, order_no)
                .await?
                .ok_or(AppError::OrderNotFound)?,
        };
    }

    match order.status {
        OrderStatus::Paid => {}
        OrderStatus::Completed => {
            tracing::info!("Order {order_no} already completed, ignoring payment {trade_no}");
            return Ok(CompletionOutcome::AlreadyCompleted);
        }
        OrderStatus::Cancelled => {
            tracing::warn!(
                "Payment {trade_no} ({}) arrived for cancelled order {order_no}; refund required",
                method.as_str()
            );
            return Ok(CompletionOutcome::Cancelled);
        }
        OrderStatus::Pending => {
            return Err(AppError::InvalidState(format!(
                "Order {order_no} could not be marked paid"
            )));
        }
    }

    match dispense_from_pool(pool, order.id).await {
        Ok((order, cards)) => {
            tracing::info!("Order {} completed with {} cards", order.order_no, cards.len());
            Ok(CompletionOutcome::Completed { order, cards })
        }
        Err(AppError::OutOfStock) => {
            tracing::warn!(
                "Order {} is paid but out of stock; awaiting manual dispense",
                order.order_no
            );
            Ok(CompletionOutcome::AwaitingStock(order))
        }
        Err(AppError::InvalidState(_)) => Ok(CompletionOutcome::AlreadyCompleted),
        Err(e) => Err(e),
    }
}

/// Mark the payment SUCCESS and the order PAID in one transaction.
///
/// Returns `None` if the order was no longer PENDING.
async fn mark_paid(
    pool: &DbPool,
    order: &Order,
    trade_no: &str,
    method: PaymentMethod,
) -> Result<Option<Order>, AppError> {
    if method != order.payment_method {
        tracing::warn!(
            "Order {} was placed for {} but paid via {}",
            order.order_no,
            order.payment_method.as_str(),
            method.as_str()
        );
    }

    let mut tx = pool.begin().await?;

    let paid = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = 'paid', paid_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(order.id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(paid) = paid else {
        tx.rollback().await?;
        return Ok(None);
    };

    sqlx::query(
        r#"
        UPDATE payments
        SET status = 'success', trade_no = $2, payment_method = $3, paid_at = NOW()
        WHERE order_id = $1
        "#,
    )
    .bind(order.id)
    .bind(trade_no)
    .bind(method)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!("Order {} paid ({} {})", paid.order_no, method.as_str(), trade_no);
    Ok(Some(paid))
}

/// Lock the order row and require it to be PAID.
async fn lock_paid_order(tx: &mut sqlx::PgConnection, order_id: Uuid) -> Result<Order, AppError> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    if order.status != OrderStatus::Paid {
        return Err(AppError::InvalidState(format!(
            "Order {} is {}, expected paid",
            order.order_no,
            order.status.as_str()
        )));
    }
    Ok(order)
}

async fn mark_completed(tx: &mut sqlx::PgConnection, order_id: Uuid) -> Result<Order, AppError> {
    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = 'completed', completed_at = NOW()
        WHERE id = $1 AND status = 'paid'
        RETURNING *
        "#,
    )
    .bind(order_id)
    .fetch_one(&mut *tx)
    .await?;
    Ok(order)
}

/// Claim `quantity` AVAILABLE cards for a PAID order and complete it.
///
/// Claiming, stock counters and the COMPLETED transition commit together.
///
/// # Errors
///
/// - `OutOfStock`: fewer than `quantity` cards could be claimed; nothing changes
/// - `InvalidState`: the order is not PAID
pub async fn dispense_from_pool(
    pool: &DbPool,
    order_id: Uuid,
) -> Result<(Order, Vec<Card>), AppError> {
    let mut tx = pool.begin().await?;

    let order = lock_paid_order(&mut tx, order_id).await?;

    let cards = sqlx::query_as::<_, Card>(
        r#"
        WITH claimed AS (
            SELECT id FROM cards
            WHERE product_id = $2
              AND ($3::uuid IS NULL OR variant_id = $3)
              AND status = 'available'
            ORDER BY created_at, id
            LIMIT $4
            FOR UPDATE SKIP LOCKED
        )
        UPDATE cards
        SET status = 'sold', order_id = $1, sold_at = NOW()
        FROM claimed
        WHERE cards.id = claimed.id
        RETURNING cards.*
        "#,
    )
    .bind(order.id)
    .bind(order.product_id)
    .bind(order.variant_id)
    .bind(i64::from(order.quantity))
    .fetch_all(&mut *tx)
    .await?;

    if cards.len() < order.quantity as usize {
        tx.rollback().await?;
        return Err(AppError::OutOfStock);
    }

    if let Some(variant_id) = order.variant_id {
        sqlx::query("UPDATE product_variants SET stock = GREATEST(stock - $1, 0) WHERE id = $2")
            .bind(order.quantity)
            .bind(variant_id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        r#"
        UPDATE products
        SET stock = GREATEST(stock - $1, 0),
            sold_count = sold_count + $1,
            updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(order.quantity)
    .bind(order.product_id)
    .execute(&mut *tx)
    .await?;

    let order = mark_completed(&mut tx, order.id).await?;

    tx.commit().await?;
    Ok((order, cards))
}

/// Take the first `quantity` cards from operator-supplied text.
///
/// # Errors
///
/// `InvalidRequest` if the text holds fewer than `quantity` cards.
pub fn take_manual_cards(text: &str, quantity: i32) -> Result<Vec<String>, AppError> {
    let mut lines = parse_card_lines(text);
    let needed = quantity.max(0) as usize;
    if lines.len() < needed {
        return Err(AppError::InvalidRequest(format!(
            "{needed} cards required, {} supplied",
            lines.len()
        )));
    }
    lines.truncate(needed);
    Ok(lines)
}

/// Deliver operator-supplied cards to a PAID order and complete it.
///
/// The cards are created already SOLD and linked to the order; they never
/// enter the AVAILABLE pool, so only `sold_count` moves.
pub async fn dispense_manual(
    pool: &DbPool,
    order_id: Uuid,
    text: &str,
) -> Result<(Order, Vec<Card>), AppError> {
    let mut tx = pool.begin().await?;

    let order = lock_paid_order(&mut tx, order_id).await?;
    let contents = take_manual_cards(text, order.quantity)?;

    let cards = sqlx::query_as::<_, Card>(
        r#"
        INSERT INTO cards (product_id, variant_id, content, status, order_id, sold_at)
        SELECT $1, $2, content, 'sold'::card_status, $3, $4 FROM UNNEST($5::text[]) AS t(content)
        RETURNING *
        "#,
    )
    .bind(order.product_id)
    .bind(order.variant_id)
    .bind(order.id)
    .bind(Utc::now())
    .bind(&contents)
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE products SET sold_count = sold_count + $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(order.quantity)
    .bind(order.product_id)
    .execute(&mut *tx)
    .await?;

    let order = mark_completed(&mut tx, order.id).await?;

    tx.commit().await?;

    tracing::info!(
        "Order {} completed by manual dispense ({} cards)",
        order.order_no,
        cards.len()
    );
    Ok((order, cards))
}

/// Operator dispense for a PAID order.
///
/// Without card text the automatic claim from the pool is retried; with it
/// the supplied cards are delivered.
///
/// # Errors
///
/// - `OrderNotFound`: no such order
/// - `InvalidState`: order is not PAID
/// - `OutOfStock`: pool retry found too few cards
/// - `InvalidRequest`: supplied text holds fewer than `quantity` cards
pub async fn dispense_order(
    pool: &DbPool,
    order_no: &str,
    timeout: chrono::Duration,
    request: DispenseRequest,
) -> Result<(Order, Vec<Card>), AppError> {
    let order = order_service::get_order(pool, order_no, timeout).await?;
    match request.cards.as_deref() {
        Some(text) if !text.trim().is_empty() => dispense_manual(pool, order.id, text).await,
        _ => dispense_from_pool(pool, order.id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::card::CardStatus;
    use rust_decimal::Decimal;

    fn paid_order() -> Order {
        Order {
            id: Uuid::new_v4(),
            order_no: "20250101120000123456".into(),
            user_id: None,
            email: "buyer@example.com".into(),
            product_id: Uuid::new_v4(),
            product_name: "Streaming Premium".into(),
            variant_id: None,
            variant_name: None,
            quantity: 1,
            unit_price: Decimal::new(4990, 2),
            total_amount: Decimal::new(4990, 2),
            status: OrderStatus::Paid,
            payment_method: PaymentMethod::Wechat,
            usdt_amount: None,
            remark: None,
            created_at: Utc::now(),
            paid_at: Some(Utc::now()),
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn only_completed_outcome_delivers() {
        let order = paid_order();
        let card = Card {
            id: Uuid::new_v4(),
            product_id: order.product_id,
            variant_id: None,
            content: "CODE-0001".into(),
            status: CardStatus::Sold,
            order_id: Some(order.id),
            sold_at: Some(Utc::now()),
            created_at: Utc::now(),
        };
        let completed = CompletionOutcome::Completed {
            order: order.clone(),
            cards: vec![card],
        };
        let (delivered, cards) = completed.delivery().unwrap();
        assert_eq!(delivered.order_no, order.order_no);
        assert_eq!(cards.len(), 1);

        assert!(CompletionOutcome::AwaitingStock(order).delivery().is_none());
        assert!(CompletionOutcome::AlreadyCompleted.delivery().is_none());
        assert!(CompletionOutcome::Cancelled.delivery().is_none());
        assert!(CompletionOutcome::NotFound.delivery().is_none());
    }

    #[test]
    fn manual_cards_are_capped_at_quantity() {
        let cards = take_manual_cards("a\n\nb\nc\n", 2).unwrap();
        assert_eq!(cards, vec!["a", "b"]);
    }

    #[test]
    fn manual_cards_must_cover_quantity() {
        assert!(matches!(
            take_manual_cards("only-one\n\n", 2),
            Err(AppError::InvalidRequest(_))
        ));
    }
}
