//! Checkout instructions and gateway confirmations.
//!
//! Each gateway has its own way of telling the store that money arrived,
//! but all of them end in [`confirm_payment`], which runs the completion
//! flow and emails the buyer when cards were dispensed.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::models::payment::{
    PaymentInstructions, PaymentMethod, PaymentMethodInfo, PaymentStatusResponse,
};
use crate::models::setting::StoreSettings;
use crate::services::dispense_service::{self, CompletionOutcome};
use crate::services::gateways::alipay::{AlipayClient, AlipayNotification};
use crate::services::gateways::usdt;
use crate::services::gateways::wechat::{self, WechatNotification};
use crate::services::{notification_service, order_service, settings_service};
use crate::state::AppState;

/// Whether buyers may choose `method` right now.
pub fn method_enabled(settings: &StoreSettings, method: PaymentMethod) -> bool {
    match method {
        PaymentMethod::Alipay => settings.alipay_enabled,
        PaymentMethod::Wechat => settings.wechat_enabled,
        PaymentMethod::Usdt => settings.usdt_ready(),
    }
}

/// Payment methods offered at checkout, in display order.
pub fn available_methods(settings: &StoreSettings) -> Vec<PaymentMethodInfo> {
    [
        (PaymentMethod::Alipay, "Alipay"),
        (PaymentMethod::Wechat, "WeChat Pay"),
        (PaymentMethod::Usdt, "USDT (TRC20)"),
    ]
    .into_iter()
    .filter(|(method, _)| method_enabled(settings, *method))
    .map(|(method, name)| PaymentMethodInfo { method, name })
    .collect()
}

fn notify_url(state: &AppState, gateway: &str) -> String {
    format!(
        "{}/api/v1/payments/{}/notify",
        state.config.public_base_url.trim_end_matches('/'),
        gateway
    )
}

/// Tell the buyer how to pay for `order_no`.
///
/// # Errors
///
/// - `OrderNotFound`: no such order
/// - `InvalidState`: order is not PENDING (expired orders are CANCELLED first)
/// - `InvalidRequest`: the order's payment method has since been disabled
/// - `Gateway`: Alipay refused or could not be reached; the order is untouched
pub async fn create_payment_instructions(
    state: &AppState,
    settings: &StoreSettings,
    order_no: &str,
) -> Result<PaymentInstructions, AppError> {
    let timeout = state.config.order_timeout();
    let order = order_service::get_order(&state.pool, order_no, timeout).await?;
    if order.status != OrderStatus::Pending {
        return Err(order_service::not_pending(&order));
    }
    if !method_enabled(settings, order.payment_method) {
        return Err(AppError::InvalidRequest(format!(
            "Payment method '{}' is not available",
            order.payment_method.as_str()
        )));
    }

    match order.payment_method {
        PaymentMethod::Alipay => {
            let client = AlipayClient::from_config(&state.config)?;
            let qr_code = client
                .precreate(&state.http, &order, &notify_url(state, "alipay"))
                .await?;
            Ok(PaymentInstructions::Qrcode { qr_code })
        }
        PaymentMethod::Wechat => {
            let url = wechat::redirect_url(
                &state.config.public_base_url,
                wechat_secret(state)?,
                &order.order_no,
            )?;
            Ok(PaymentInstructions::Redirect { url })
        }
        PaymentMethod::Usdt => {
            let amount = usdt::assign_amount(&state.pool, settings, &order, timeout).await?;
            Ok(PaymentInstructions::UsdtTransfer {
                address: settings.usdt_wallet_address.clone(),
                amount,
                network: "TRC20",
                expires_at: order.expires_at(timeout),
            })
        }
    }
}

/// Run the completion flow for a confirmed payment and notify the buyer.
pub async fn confirm_payment(
    state: &AppState,
    order_no: &str,
    trade_no: &str,
    method: PaymentMethod,
) -> Result<CompletionOutcome, AppError> {
    let outcome = dispense_service::complete_payment(&state.pool, order_no, trade_no, method).await?;
    tracing::info!(
        "Payment {} for order {} via {}: {}",
        trade_no,
        order_no,
        method.as_str(),
        outcome.label()
    );

    if let Some((order, cards)) = outcome.delivery() {
        notification_service::spawn_order_completed_email(
            state.pool.clone(),
            order.clone(),
            cards.to_vec(),
        );
    }
    Ok(outcome)
}

fn wechat_secret(state: &AppState) -> Result<&str, AppError> {
    state.config.wechat_secret().ok_or_else(|| {
        AppError::Configuration("WECHAT_MOCK_SECRET is not configured".to_string())
    })
}

/// Check that the gateway reported the amount the order asked for.
fn ensure_amount_matches(order: &Order, paid: rust_decimal::Decimal) -> Result<(), AppError> {
    if order.total_amount.round_dp(2) != paid.round_dp(2) {
        return Err(AppError::Gateway(format!(
            "Order {} expects {}, gateway reported {}",
            order.order_no, order.total_amount, paid
        )));
    }
    Ok(())
}

/// Decide whether a verified, paid Alipay notification runs completion.
///
/// A notification for an unknown order is acknowledged and dropped so Alipay
/// stops retrying it. One whose amount differs from the order is rejected.
fn should_confirm_alipay(
    order: Option<&Order>,
    notification: &AlipayNotification,
) -> Result<bool, AppError> {
    let Some(order) = order else {
        tracing::warn!(
            "Alipay trade {} refers to unknown order {}",
            notification.trade_no,
            notification.out_trade_no
        );
        return Ok(false);
    };
    ensure_amount_matches(order, notification.total_amount)?;
    Ok(true)
}

/// Handle an Alipay asynchronous notification.
///
/// Non-success trade states are acknowledged without changing anything.
pub async fn handle_alipay_notification(
    state: &AppState,
    params: BTreeMap<String, String>,
) -> Result<(), AppError> {
    let client = AlipayClient::from_config(&state.config)?;
    let notification = client.verify_notification(&params)?;

    if !notification.is_paid() {
        tracing::info!(
            "Alipay reports {} for order {}",
            notification.trade_status,
            notification.out_trade_no
        );
        return Ok(());
    }

    let order = order_service::find_order(&state.pool, &notification.out_trade_no).await?;
    if !should_confirm_alipay(order.as_ref(), &notification)? {
        return Ok(());
    }

    confirm_payment(
        state,
        &notification.out_trade_no,
        &notification.trade_no,
        PaymentMethod::Alipay,
    )
    .await?;
    Ok(())
}

/// Handle a signed WeChat (mock) notification.
pub async fn handle_wechat_notification(
    state: &AppState,
    notification: WechatNotification,
) -> Result<(), AppError> {
    notification.verify(wechat_secret(state)?)?;

    if !notification.is_paid() {
        tracing::info!(
            "WeChat reports {} for order {}",
            notification.trade_status,
            notification.order_no
        );
        return Ok(());
    }

    confirm_payment(
        state,
        &notification.order_no,
        &notification.trade_no,
        PaymentMethod::Wechat,
    )
    .await?;
    Ok(())
}

/// Demo payment page: the signed link from checkout pays the order.
pub async fn confirm_wechat_mock(
    state: &AppState,
    order_no: &str,
    sign: &str,
) -> Result<CompletionOutcome, AppError> {
    if !wechat::verify(wechat_secret(state)?, order_no, sign) {
        return Err(AppError::Gateway("Payment link signature is invalid".to_string()));
    }
    let settings = settings_service::load(&state.pool).await?;
    if !settings.wechat_enabled {
        return Err(AppError::InvalidRequest(
            "Payment method 'wechat' is not available".to_string(),
        ));
    }

    let order = order_service::get_order(&state.pool, order_no, state.config.order_timeout()).await?;
    if order.status == OrderStatus::Cancelled {
        return Err(order_service::not_pending(&order));
    }

    let trade_no = format!("MOCK{}", Uuid::new_v4().simple());
    confirm_payment(state, order_no, &trade_no, PaymentMethod::Wechat).await
}

/// Status poll used by the checkout page.
pub async fn payment_status(state: &AppState, order_no: &str) -> Result<PaymentStatusResponse, AppError> {
    let order = order_service::get_order(&state.pool, order_no, state.config.order_timeout()).await?;
    Ok(PaymentStatusResponse {
        paid: matches!(order.status, OrderStatus::Paid | OrderStatus::Completed),
        order_no: order.order_no,
        status: order.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(total: &str) -> Order {
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
            unit_price: total.parse().unwrap(),
            total_amount: total.parse().unwrap(),
            status: OrderStatus::Pending,
            payment_method: PaymentMethod::Alipay,
            usdt_amount: None,
            remark: None,
            created_at: chrono::Utc::now(),
            paid_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    fn notification(amount: &str) -> AlipayNotification {
        AlipayNotification {
            out_trade_no: "20250101120000123456".into(),
            trade_no: "2025010122001400001".into(),
            trade_status: "TRADE_SUCCESS".into(),
            total_amount: amount.parse().unwrap(),
        }
    }

    #[test]
    fn alipay_notification_for_unknown_order_is_acknowledged() {
        assert!(!should_confirm_alipay(None, &notification("49.90")).unwrap());
    }

    #[test]
    fn alipay_amount_must_match_order_total() {
        let order = order("49.90");
        assert!(should_confirm_alipay(Some(&order), &notification("49.9")).unwrap());
        assert!(matches!(
            should_confirm_alipay(Some(&order), &notification("0.01")),
            Err(AppError::Gateway(_))
        ));
    }

    #[test]
    fn usdt_needs_a_wallet() {
        let mut settings = StoreSettings {
            usdt_enabled: true,
            ..StoreSettings::default()
        };
        assert!(!method_enabled(&settings, PaymentMethod::Usdt));

        settings.usdt_wallet_address = "TXYZ".into();
        assert!(method_enabled(&settings, PaymentMethod::Usdt));
    }

    #[test]
    fn only_enabled_methods_are_listed() {
        let settings = StoreSettings {
            alipay_enabled: false,
            wechat_enabled: true,
            ..StoreSettings::default()
        };
        let methods: Vec<_> = available_methods(&settings)
            .into_iter()
            .map(|m| m.method)
            .collect();
        assert_eq!(methods, vec![PaymentMethod::Wechat]);
    }
}
