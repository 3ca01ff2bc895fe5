//! Checkout and gateway callback endpoints.
//!
//! - GET /api/v1/payments/methods - Payment methods currently offered
//! - POST /api/v1/orders/{order_no}/payment - Get payment instructions
//! - GET /api/v1/orders/{order_no}/payment-status - Poll for payment
//! - POST /api/v1/payments/alipay/notify - Alipay asynchronous notification
//! - POST /api/v1/payments/wechat/notify - WeChat (mock) notification
//! - GET /api/v1/payments/wechat/mock/{order_no} - Demo payment page

use std::collections::BTreeMap;

use axum::{
    Form, Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    error::AppError,
    models::payment::{PaymentInstructions, PaymentMethodInfo, PaymentStatusResponse},
    services::{gateways::wechat::WechatNotification, payment_service, settings_service},
    state::AppState,
};

pub async fn list_methods(
    State(state): State<AppState>,
) -> Result<Json<Vec<PaymentMethodInfo>>, AppError> {
    let settings = settings_service::load(&state.pool).await?;
    Ok(Json(payment_service::available_methods(&settings)))
}

/// Get payment instructions for a PENDING order.
///
/// # Response (200 OK)
///
/// ```json
/// { "type": "qrcode", "data": { "qr_code": "https://qr.alipay.com/bax0..." } }
/// ```
///
/// `type` is one of `qrcode`, `redirect` or `usdt-transfer`.
///
/// # Errors
///
/// - **409**: order is not PENDING (including one that just expired)
/// - **502**: the gateway refused; the order stays PENDING
pub async fn create_payment(
    State(state): State<AppState>,
    Path(order_no): Path<String>,
) -> Result<Json<PaymentInstructions>, AppError> {
    let settings = settings_service::load(&state.pool).await?;
    let instructions =
        payment_service::create_payment_instructions(&state, &settings, &order_no).await?;
    Ok(Json(instructions))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(order_no): Path<String>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    Ok(Json(payment_service::payment_status(&state, &order_no).await?))
}

/// Alipay notification.
///
/// Alipay retries until it reads the literal body `success`, so every
/// rejected notification answers `failure` instead of an error status.
pub async fn alipay_notify(
    State(state): State<AppState>,
    Form(params): Form<BTreeMap<String, String>>,
) -> &'static str {
    match payment_service::handle_alipay_notification(&state, params).await {
        Ok(()) => "success",
        Err(e) => {
            tracing::warn!("Rejected Alipay notification: {e}");
            "failure"
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WechatAck {
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn wechat_notify(
    State(state): State<AppState>,
    Json(notification): Json<WechatNotification>,
) -> Json<WechatAck> {
    match payment_service::handle_wechat_notification(&state, notification).await {
        Ok(()) => Json(WechatAck {
            code: "SUCCESS",
            message: None,
        }),
        Err(e) => {
            tracing::warn!("Rejected WeChat notification: {e}");
            Json(WechatAck {
                code: "FAIL",
                message: Some(e.to_string()),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MockPayQuery {
    pub sign: String,
}

/// Demo WeChat payment page. Following the signed link pays the order.
pub async fn wechat_mock_pay(
    State(state): State<AppState>,
    Path(order_no): Path<String>,
    Query(query): Query<MockPayQuery>,
) -> Result<Json<Value>, AppError> {
    let outcome = payment_service::confirm_wechat_mock(&state, &order_no, &query.sign).await?;
    Ok(Json(json!({
        "order_no": order_no,
        "result": outcome.label(),
    })))
}
