//! WeChat Pay stand-in.
//!
//! There is no real WeChat integration. Checkout redirects the buyer to a
//! built-in demo endpoint, and callbacks are authenticated with an
//! HMAC-SHA256 signature keyed by `WECHAT_MOCK_SECRET`, so the flow
//! exercises the same verify-then-complete path as a real gateway.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Callback body.
///
/// ```json
/// {
///   "order_no": "20250101120000123456",
///   "trade_no": "4200001234202501010000000001",
///   "trade_status": "SUCCESS",
///   "sign": "5f2c..."
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct WechatNotification {
    pub order_no: String,
    pub trade_no: String,
    pub trade_status: String,
    pub sign: String,
}

impl WechatNotification {
    /// Message covered by `sign`.
    pub fn signed_message(&self) -> String {
        format!("{}&{}&{}", self.order_no, self.trade_no, self.trade_status)
    }

    pub fn is_paid(&self) -> bool {
        self.trade_status == "SUCCESS"
    }

    /// Reject the notification unless its signature checks out.
    pub fn verify(&self, secret: &str) -> Result<(), AppError> {
        if verify(secret, &self.signed_message(), &self.sign) {
            Ok(())
        } else {
            Err(AppError::Gateway(
                "WeChat notification signature is invalid".to_string(),
            ))
        }
    }
}

/// Hex HMAC-SHA256 of `message`.
pub fn sign(secret: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex HMAC-SHA256 signature.
pub fn verify(secret: &str, message: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(message.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// URL of the demo payment page for `order_no`.
pub fn redirect_url(base_url: &str, secret: &str, order_no: &str) -> Result<String, AppError> {
    let page = format!(
        "{}/api/v1/payments/wechat/mock/{}",
        base_url.trim_end_matches('/'),
        order_no
    );
    let url = url::Url::parse_with_params(&page, &[("sign", sign(secret, order_no))])
        .map_err(|e| AppError::Configuration(format!("PUBLIC_BASE_URL is not a valid URL: {e}")))?;
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn redirect_url_carries_order_signature() {
        let url = redirect_url("https://shop.example.com/", SECRET, "20250101120000123456").unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        assert_eq!(
            parsed.path(),
            "/api/v1/payments/wechat/mock/20250101120000123456"
        );
        let (_, sign) = parsed.query_pairs().find(|(k, _)| k == "sign").unwrap();
        assert!(verify(SECRET, "20250101120000123456", &sign));
    }

    #[test]
    fn notification_signature_is_checked() {
        let mut notification = WechatNotification {
            order_no: "20250101120000123456".into(),
            trade_no: "4200001".into(),
            trade_status: "SUCCESS".into(),
            sign: String::new(),
        };
        notification.sign = sign(SECRET, &notification.signed_message());
        assert!(notification.verify(SECRET).is_ok());
        assert!(notification.is_paid());

        notification.trade_status = "CLOSED".into();
        assert!(matches!(
            notification.verify(SECRET),
            Err(AppError::Gateway(_))
        ));
    }

    #[test]
    fn garbage_signature_fails() {
        assert!(!verify(SECRET, "x", "zz"));
        assert!(!verify(SECRET, "x", &sign("other-secret", "x")));
    }
}
