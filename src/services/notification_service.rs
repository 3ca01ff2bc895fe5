//! Buyer notifications.
//!
//! A completed order sends one plain-text email listing the delivered cards.
//! Delivery never affects the order: every problem ends up as a
//! [`NotifyOutcome`] that is logged and otherwise ignored.

use std::time::Duration;

use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;

use crate::db::DbPool;
use crate::models::card::Card;
use crate::models::order::Order;
use crate::models::setting::StoreSettings;
use crate::services::settings_service;

/// Port on which the SMTP server expects implicit TLS. Anything else uses
/// STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

const SMTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum NotifyOutcome {
    Sent,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Could not build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Why an email would not be sent, if it would not.
pub fn readiness(settings: &StoreSettings) -> Option<String> {
    if !settings.email_notify {
        Some("email notifications are disabled".to_string())
    } else if !settings.smtp_configured() {
        Some("SMTP is not fully configured".to_string())
    } else {
        None
    }
}

pub fn subject(settings: &StoreSettings, order: &Order) -> String {
    format!("[{}] Order {} delivered", settings.sender_name, order.order_no)
}

/// Plain-text email body: order summary followed by one card per line.
pub fn render_body(order: &Order, cards: &[Card]) -> String {
    let mut body = String::new();
    body.push_str("Thank you for your purchase.\n\n");
    body.push_str(&format!("Order number: {}\n", order.order_no));
    match &order.variant_name {
        Some(variant) => body.push_str(&format!("Product: {} ({})\n", order.product_name, variant)),
        None => body.push_str(&format!("Product: {}\n", order.product_name)),
    }
    body.push_str(&format!("Quantity: {}\n", order.quantity));
    body.push_str(&format!("Total: {}\n\n", order.total_amount));
    body.push_str("Your cards:\n");
    for (i, card) in cards.iter().enumerate() {
        body.push_str(&format!("{}. {}\n", i + 1, card.content));
    }
    body.push_str("\nKeep this email safe. Cards are shown only to the buyer.\n");
    body
}

fn build_message(
    settings: &StoreSettings,
    order: &Order,
    cards: &[Card],
) -> Result<Message, NotifyError> {
    let from = Mailbox::new(
        Some(settings.sender_name.clone()),
        settings.smtp_user.parse::<Address>()?,
    );
    let to = Mailbox::new(None, order.email.parse::<Address>()?);

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(subject(settings, order))
        .header(ContentType::TEXT_PLAIN)
        .body(render_body(order, cards))?;
    Ok(message)
}

fn transport(settings: &StoreSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
    let builder = if settings.smtp_port == IMPLICIT_TLS_PORT {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_host)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)?
    };
    Ok(builder
        .port(settings.smtp_port)
        .credentials(Credentials::new(
            settings.smtp_user.clone(),
            settings.smtp_pass.clone(),
        ))
        .timeout(Some(SMTP_TIMEOUT))
        .build())
}

async fn deliver(settings: &StoreSettings, order: &Order, cards: &[Card]) -> Result<(), NotifyError> {
    let message = build_message(settings, order, cards)?;
    transport(settings)?.send(message).await?;
    Ok(())
}

/// Email the buyer their cards. Never fails.
pub async fn send_order_completed_email(
    settings: &StoreSettings,
    order: &Order,
    cards: &[Card],
) -> NotifyOutcome {
    if let Some(reason) = readiness(settings) {
        return NotifyOutcome::Skipped(reason);
    }
    match deliver(settings, order, cards).await {
        Ok(()) => NotifyOutcome::Sent,
        Err(e) => NotifyOutcome::Failed(e.to_string()),
    }
}

/// Send the completion email in the background and log how it went.
///
/// Settings are read fresh so the email reflects the current SMTP config.
pub fn spawn_order_completed_email(pool: DbPool, order: Order, cards: Vec<Card>) {
    tokio::spawn(async move {
        let settings = match settings_service::load(&pool).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!("Skipping email for order {}: {}", order.order_no, e);
                return;
            }
        };

        match send_order_completed_email(&settings, &order, &cards).await {
            NotifyOutcome::Sent => {
                tracing::info!("Delivery email sent for order {}", order.order_no)
            }
            NotifyOutcome::Skipped(reason) => {
                tracing::debug!("No delivery email for order {}: {}", order.order_no, reason)
            }
            NotifyOutcome::Failed(reason) => {
                tracing::warn!(
                    "Delivery email for order {} failed: {}",
                    order.order_no,
                    reason
                )
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::card::CardStatus;
    use crate::models::order::OrderStatus;
    use crate::models::payment::PaymentMethod;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn completed_order() -> Order {
        Order {
            id: Uuid::new_v4(),
            order_no: "20250101120000123456".into(),
            user_id: None,
            email: "buyer@example.com".into(),
            product_id: Uuid::new_v4(),
            product_name: "Streaming Premium".into(),
            variant_id: None,
            variant_name: Some("12 months".into()),
            quantity: 2,
            unit_price: Decimal::new(1990, 2),
            total_amount: Decimal::new(3980, 2),
            status: OrderStatus::Completed,
            payment_method: PaymentMethod::Wechat,
            usdt_amount: None,
            remark: None,
            created_at: Utc::now(),
            paid_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            cancelled_at: None,
        }
    }

    fn card(order: &Order, content: &str) -> Card {
        Card {
            id: Uuid::new_v4(),
            product_id: order.product_id,
            variant_id: None,
            content: content.into(),
            status: CardStatus::Sold,
            order_id: Some(order.id),
            sold_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    fn smtp_settings() -> StoreSettings {
        StoreSettings {
            email_notify: true,
            smtp_host: "smtp.example.com".into(),
            smtp_user: "shop@example.com".into(),
            smtp_pass: "secret".into(),
            ..StoreSettings::default()
        }
    }

    #[tokio::test]
    async fn disabled_notifications_are_skipped() {
        let order = completed_order();
        let outcome =
            send_order_completed_email(&StoreSettings::default(), &order, &[]).await;
        assert!(matches!(outcome, NotifyOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn incomplete_smtp_is_skipped() {
        let settings = StoreSettings {
            smtp_pass: String::new(),
            ..smtp_settings()
        };
        let outcome = send_order_completed_email(&settings, &completed_order(), &[]).await;
        assert_eq!(
            outcome,
            NotifyOutcome::Skipped("SMTP is not fully configured".into())
        );
    }

    #[tokio::test]
    async fn bad_recipient_is_reported_not_raised() {
        let mut order = completed_order();
        order.email = "not an address".into();
        let outcome = send_order_completed_email(&smtp_settings(), &order, &[]).await;
        assert!(matches!(outcome, NotifyOutcome::Failed(_)));
    }

    #[test]
    fn body_lists_every_card() {
        let order = completed_order();
        let cards = vec![card(&order, "AAAA-1111"), card(&order, "BBBB-2222")];
        let body = render_body(&order, &cards);
        assert!(body.contains("20250101120000123456"));
        assert!(body.contains("Streaming Premium (12 months)"));
        assert!(body.contains("1. AAAA-1111"));
        assert!(body.contains("2. BBBB-2222"));
    }

    #[test]
    fn message_uses_sender_name_and_subject() {
        let order = completed_order();
        let message = build_message(&smtp_settings(), &order, &[]).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Card Shop"));
        assert!(raw.contains("Order 20250101120000123456 delivered"));
    }
}
