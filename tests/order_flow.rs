//! End-to-end order lifecycle against a real Postgres.
//!
//! Run with `DATABASE_URL` pointing at a server where the test user may
//! create databases: `cargo test -- --ignored`.

use std::collections::HashMap;

use chrono::Duration;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use card_shop::error::AppError;
use card_shop::models::card::{CardStatus, ImportCardsRequest};
use card_shop::models::order::{CreateOrderRequest, DispenseRequest, Order, OrderStatus};
use card_shop::models::payment::{PaymentMethod, PaymentStatus};
use card_shop::models::product::{CreateProductRequest, Product};
use card_shop::models::setting::{StockMode, StoreSettings};
use card_shop::services::dispense_service::{self, CompletionOutcome};
use card_shop::services::gateways::usdt;
use card_shop::services::{catalog_service, order_service, payment_service, settings_service};

const TIMEOUT_MINUTES: i64 = 15;

fn timeout() -> Duration {
    Duration::minutes(TIMEOUT_MINUTES)
}

async fn new_product(pool: &PgPool, price: &str) -> Product {
    let request = CreateProductRequest {
        name: "Streaming Premium".into(),
        description: None,
        price: price.parse().unwrap(),
        original_price: None,
        category_id: None,
        stock: 0,
        variants: Vec::new(),
    };
    catalog_service::create_product(pool, request)
        .await
        .unwrap()
        .product
}

async fn import(pool: &PgPool, product_id: Uuid, content: &str) {
    let request = ImportCardsRequest {
        variant_id: None,
        content: content.into(),
    };
    catalog_service::import_cards(pool, StockMode::Auto, product_id, request)
        .await
        .unwrap();
}

async fn place_order(pool: &PgPool, product_id: Uuid, method: PaymentMethod) -> Order {
    let settings = StoreSettings {
        wechat_enabled: true,
        ..settings_service::load(pool).await.unwrap()
    };
    let request = CreateOrderRequest {
        product_id,
        variant_id: None,
        quantity: 1,
        email: "buyer@example.com".into(),
        payment_method: method,
        remark: None,
    };
    order_service::create_order(pool, &settings, request)
        .await
        .unwrap()
}

async fn payment_status(pool: &PgPool, order_id: Uuid) -> (PaymentStatus, Option<String>) {
    sqlx::query_as("SELECT status, trade_no FROM payments WHERE order_id = $1")
        .bind(order_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn fresh_install_offers_no_payment_method(pool: PgPool) {
    let settings = settings_service::load(&pool).await.unwrap();
    assert!(!settings.wechat_enabled);
    assert!(!settings.alipay_enabled);
    assert!(!settings.usdt_ready());

    assert!(payment_service::available_methods(&settings).is_empty());

    let product = new_product(&pool, "1.00").await;
    import(&pool, product.id, "A\n").await;
    let request = CreateOrderRequest {
        product_id: product.id,
        variant_id: None,
        quantity: 1,
        email: "buyer@example.com".into(),
        payment_method: PaymentMethod::Wechat,
        remark: None,
    };
    let result = order_service::create_order(&pool, &settings, request).await;
    assert!(matches!(result, Err(AppError::InvalidRequest(_))));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn paid_order_receives_its_card_once(pool: PgPool) {
    let product = new_product(&pool, "49.90").await;
    import(&pool, product.id, "CODE-0001\n").await;

    let order = place_order(&pool, product.id, PaymentMethod::Wechat).await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_amount, Decimal::new(4990, 2));

    let outcome =
        dispense_service::complete_payment(&pool, &order.order_no, "T1", PaymentMethod::Wechat)
            .await
            .unwrap();
    let (completed, cards) = match outcome {
        CompletionOutcome::Completed { order, cards } => (order, cards),
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(completed.status, OrderStatus::Completed);
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].content, "CODE-0001");
    assert_eq!(cards[0].status, CardStatus::Sold);
    assert_eq!(cards[0].order_id, Some(order.id));

    let (status, trade_no) = payment_status(&pool, order.id).await;
    assert_eq!(status, PaymentStatus::Success);
    assert_eq!(trade_no.as_deref(), Some("T1"));

    let product = catalog_service::find_product(&pool, product.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.sold_count, 1);
    assert_eq!(product.stock, 0);

    let again =
        dispense_service::complete_payment(&pool, &order.order_no, "T1", PaymentMethod::Wechat)
            .await
            .unwrap();
    assert!(matches!(again, CompletionOutcome::AlreadyCompleted));
    let sold: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cards WHERE order_id = $1")
        .bind(order.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(sold, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn empty_pool_leaves_order_paid_until_manual_dispense(pool: PgPool) {
    let product = new_product(&pool, "10.00").await;
    import(&pool, product.id, "ONLY-CARD\n").await;
    let order = place_order(&pool, product.id, PaymentMethod::Wechat).await;

    // The last card disappears between ordering and paying.
    let card_id: Uuid = sqlx::query_scalar("SELECT id FROM cards WHERE product_id = $1")
        .bind(product.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    catalog_service::delete_card(&pool, StockMode::Auto, card_id)
        .await
        .unwrap();

    let outcome =
        dispense_service::complete_payment(&pool, &order.order_no, "T2", PaymentMethod::Wechat)
            .await
            .unwrap();
    let paid = match outcome {
        CompletionOutcome::AwaitingStock(order) => order,
        other => panic!("expected awaiting stock, got {other:?}"),
    };
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(payment_status(&pool, order.id).await.0, PaymentStatus::Success);

    let short = dispense_service::dispense_order(
        &pool,
        &order.order_no,
        timeout(),
        DispenseRequest { cards: None },
    )
    .await;
    assert!(matches!(short, Err(AppError::OutOfStock)));

    let (completed, cards) = dispense_service::dispense_order(
        &pool,
        &order.order_no,
        timeout(),
        DispenseRequest {
            cards: Some("\nMANUAL-1\nMANUAL-2\n".into()),
        },
    )
    .await
    .unwrap();
    assert_eq!(completed.status, OrderStatus::Completed);
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].content, "MANUAL-1");

    let again = dispense_service::dispense_order(
        &pool,
        &order.order_no,
        timeout(),
        DispenseRequest {
            cards: Some("MANUAL-3".into()),
        },
    )
    .await;
    assert!(matches!(again, Err(AppError::InvalidState(_))));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn stale_pending_order_expires_on_read(pool: PgPool) {
    let product = new_product(&pool, "5.00").await;
    import(&pool, product.id, "A\n").await;
    let order = place_order(&pool, product.id, PaymentMethod::Wechat).await;

    sqlx::query("UPDATE orders SET created_at = NOW() - INTERVAL '16 minutes' WHERE id = $1")
        .bind(order.id)
        .execute(&pool)
        .await
        .unwrap();

    let first = order_service::get_order(&pool, &order.order_no, timeout())
        .await
        .unwrap();
    assert_eq!(first.status, OrderStatus::Cancelled);
    let second = order_service::get_order(&pool, &order.order_no, timeout())
        .await
        .unwrap();
    assert_eq!(second.status, OrderStatus::Cancelled);
    assert_eq!(second.cancelled_at, first.cancelled_at);

    let cancel = order_service::cancel_order(&pool, &order.order_no, timeout()).await;
    assert!(matches!(cancel, Err(AppError::InvalidState(_))));

    let late =
        dispense_service::complete_payment(&pool, &order.order_no, "T3", PaymentMethod::Wechat)
            .await
            .unwrap();
    assert!(matches!(late, CompletionOutcome::Cancelled));
    let available: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM cards WHERE product_id = $1 AND status = 'available'")
            .bind(product.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(available, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn concurrent_usdt_orders_get_distinct_amounts(pool: PgPool) {
    let settings = settings_service::update(
        &pool,
        HashMap::from([
            ("usdt_enabled".to_string(), "true".to_string()),
            ("usdt_wallet_address".to_string(), "TWalletAddress".to_string()),
        ]),
    )
    .await
    .unwrap();
    assert!(settings.usdt_ready());

    let product = new_product(&pool, "49.90").await;
    import(&pool, product.id, "A\nB\n").await;
    let first = place_order(&pool, product.id, PaymentMethod::Usdt).await;
    let second = place_order(&pool, product.id, PaymentMethod::Usdt).await;

    let a = usdt::assign_amount(&pool, &settings, &first, timeout())
        .await
        .unwrap();
    let b = usdt::assign_amount(&pool, &settings, &second, timeout())
        .await
        .unwrap();
    assert_eq!(a, Decimal::new(693, 2));
    assert!((a - b).abs() >= Decimal::new(1, 2));

    // Asking again returns the reserved amount.
    let first = order_service::get_order(&pool, &first.order_no, timeout())
        .await
        .unwrap();
    assert_eq!(
        usdt::assign_amount(&pool, &settings, &first, timeout())
            .await
            .unwrap(),
        a
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn concurrent_completions_never_share_cards(pool: PgPool) {
    let product = new_product(&pool, "1.00").await;
    import(&pool, product.id, "A\nB\n").await;
    let first = place_order(&pool, product.id, PaymentMethod::Wechat).await;
    let second = place_order(&pool, product.id, PaymentMethod::Wechat).await;

    let (x, y) = tokio::join!(
        dispense_service::complete_payment(&pool, &first.order_no, "TX1", PaymentMethod::Wechat),
        dispense_service::complete_payment(&pool, &second.order_no, "TX2", PaymentMethod::Wechat),
    );
    let (
        CompletionOutcome::Completed { cards: cx, .. },
        CompletionOutcome::Completed { cards: cy, .. },
    ) = (x.unwrap(), y.unwrap())
    else {
        panic!("both orders should complete");
    };
    assert_eq!(cx.len(), 1);
    assert_eq!(cy.len(), 1);
    assert_ne!(cx[0].id, cy[0].id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn disabled_method_and_bad_settings_are_rejected(pool: PgPool) {
    let product = new_product(&pool, "1.00").await;
    import(&pool, product.id, "A\n").await;

    let settings = StoreSettings {
        wechat_enabled: false,
        ..settings_service::load(&pool).await.unwrap()
    };
    let request = CreateOrderRequest {
        product_id: product.id,
        variant_id: None,
        quantity: 1,
        email: "buyer@example.com".into(),
        payment_method: PaymentMethod::Wechat,
        remark: None,
    };
    let result = order_service::create_order(&pool, &settings, request).await;
    assert!(matches!(result, Err(AppError::InvalidRequest(_))));

    let bad = settings_service::update(
        &pool,
        HashMap::from([("usdt_exchange_rate".to_string(), "seven".to_string())]),
    )
    .await;
    assert!(matches!(bad, Err(AppError::InvalidRequest(_))));
    let unchanged = settings_service::load(&pool).await.unwrap();
    assert_eq!(unchanged.usdt_exchange_rate, Decimal::new(72, 1));
}
