//! Router checks that are answered before any database access.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

use card_shop::config::Config;
use card_shop::middleware::auth::hash_api_key;
use card_shop::state::AppState;

fn app_with(config: impl FnOnce(&mut Config)) -> axum::Router {
    let url = "postgres://card_shop@localhost/unused";
    let pool = PgPoolOptions::new().connect_lazy(url).unwrap();
    let mut base = Config::with_defaults(url);
    config(&mut base);
    card_shop::router(AppState::new(pool, base).unwrap())
}

fn app(admin_key: Option<&str>) -> axum::Router {
    app_with(|config| {
        config.admin_api_key_sha256 = admin_key.map(hash_api_key);
        config.wechat_mock_secret = Some("route-test-secret".into());
    })
}

async fn status(app: axum::Router, request: Request<Body>) -> StatusCode {
    app.oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn admin_routes_need_a_configured_key() {
    let request = Request::builder()
        .uri("/api/v1/admin/settings")
        .header("Authorization", "Bearer anything")
        .body(Body::empty())
        .unwrap();
    assert_eq!(status(app(None), request).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_reject_wrong_or_missing_key() {
    let wrong = Request::builder()
        .uri("/api/v1/admin/orders")
        .header("Authorization", "Bearer not-the-key")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        status(app(Some("s3cret")), wrong).await,
        StatusCode::UNAUTHORIZED
    );

    let missing = Request::builder()
        .uri("/api/v1/admin/orders")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        status(app(Some("s3cret")), missing).await,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn forged_mock_payment_link_is_refused() {
    let request = Request::builder()
        .uri("/api/v1/payments/wechat/mock/20250101120000123456?sign=deadbeef")
        .body(Body::empty())
        .unwrap();
    assert_eq!(status(app(None), request).await, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn mock_payment_link_needs_a_configured_secret() {
    let request = Request::builder()
        .uri("/api/v1/payments/wechat/mock/20250101120000123456?sign=deadbeef")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        status(app_with(|_| {}), request).await,
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
