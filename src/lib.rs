//! Card shop: a storefront for virtual goods.
//!
//! Buyers order license cards, pay through Alipay, a WeChat stand-in or a
//! USDT (TRC20) transfer, and receive their cards as soon as the payment is
//! confirmed.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Background**: USDT transfer watcher in the same process
//! - **Authentication**: admin API key with SHA-256 hashing
//! - **Format**: JSON requests/responses

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod state;
pub mod usdt_watcher;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post, put},
};

use crate::state::AppState;

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/products", post(handlers::admin::create_product))
        .route(
            "/products/{id}/stock",
            put(handlers::admin::update_stock),
        )
        .route(
            "/products/{id}/cards",
            post(handlers::admin::import_cards),
        )
        .route("/cards/{id}", delete(handlers::admin::delete_card))
        .route("/orders", get(handlers::admin::list_orders))
        .route(
            "/orders/{order_no}/dispense",
            post(handlers::admin::dispense_order),
        )
        .route(
            "/settings",
            get(handlers::admin::get_settings).put(handlers::admin::update_settings),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth,
        ));

    let api_routes = Router::new()
        // Catalog
        .route("/products", get(handlers::products::list_products))
        .route("/products/{id}", get(handlers::products::get_product))
        // Orders
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/{order_no}", get(handlers::orders::get_order))
        .route(
            "/orders/{order_no}/cancel",
            post(handlers::orders::cancel_order),
        )
        // Payments
        .route("/payments/methods", get(handlers::payments::list_methods))
        .route(
            "/orders/{order_no}/payment",
            post(handlers::payments::create_payment),
        )
        .route(
            "/orders/{order_no}/payment-status",
            get(handlers::payments::payment_status),
        )
        .route(
            "/payments/alipay/notify",
            post(handlers::payments::alipay_notify),
        )
        .route(
            "/payments/wechat/notify",
            post(handlers::payments::wechat_notify),
        )
        .route(
            "/payments/wechat/mock/{order_no}",
            get(handlers::payments::wechat_mock_pay),
        )
        .nest("/admin", admin_routes);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_routes)
        .with_state(state)
}
