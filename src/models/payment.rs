//! Payment records and the payment instruction contract.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::OrderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Alipay,
    Wechat,
    Usdt,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Alipay => "alipay",
            PaymentMethod::Wechat => "wechat",
            PaymentMethod::Usdt => "usdt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
}

/// Payment record, one per order.
///
/// `trade_no` is the gateway's own transaction id (a Tron transaction hash
/// for USDT). It is unique across payments, which is what stops one inbound
/// transfer from paying two orders.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_method: PaymentMethod,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub trade_no: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// How the buyer should pay.
///
/// ```json
/// { "type": "usdt-transfer", "data": { "address": "T...", "amount": "6.93", ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PaymentInstructions {
    Qrcode {
        qr_code: String,
    },
    Redirect {
        url: String,
    },
    UsdtTransfer {
        address: String,
        amount: Decimal,
        network: &'static str,
        expires_at: DateTime<Utc>,
    },
}

/// Payment method offered at checkout.
#[derive(Debug, Serialize)]
pub struct PaymentMethodInfo {
    pub method: PaymentMethod,
    pub name: &'static str,
}

/// Response for the payment status poll.
#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub order_no: String,
    pub status: OrderStatus,
    pub paid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_serialize_with_type_tag() {
        let json = serde_json::to_value(PaymentInstructions::Qrcode {
            qr_code: "https://qr.alipay.com/abc".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "qrcode");
        assert_eq!(json["data"]["qr_code"], "https://qr.alipay.com/abc");

        let json = serde_json::to_value(PaymentInstructions::UsdtTransfer {
            address: "TWallet".into(),
            amount: Decimal::new(693, 2),
            network: "TRC20",
            expires_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["type"], "usdt-transfer");
        assert_eq!(json["data"]["amount"], "6.93");
    }
}
