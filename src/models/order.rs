//! Order data models and API request/response types.
//!
//! # State Machine
//!
//! ```text
//! PENDING --(timeout, lazily on read)--> CANCELLED
//! PENDING --(explicit cancel)----------> CANCELLED
//! PENDING --(payment confirmed)--------> PAID
//! PAID    --(cards dispensed)----------> COMPLETED
//! ```
//!
//! COMPLETED and CANCELLED are terminal. A PAID order whose cards could not
//! be dispensed stays PAID until an operator dispenses it by hand.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::card::DeliveredCard;
use crate::models::payment::PaymentMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

/// Represents an order record from the database.
///
/// `product_name` and `variant_name` are snapshots taken at creation so the
/// order reads the same after the catalog changes. `total_amount` is
/// `unit_price * quantity` at creation and is never recomputed.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub order_no: String,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub product_id: Uuid,
    pub product_name: String,
    pub variant_id: Option<Uuid>,
    pub variant_name: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    /// Unique token amount reserved for USDT orders.
    pub usdt_amount: Option<Decimal>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// A PENDING order older than `timeout` should be cancelled.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.status == OrderStatus::Pending && now - self.created_at > timeout
    }

    /// Moment after which an unpaid order is no longer payable.
    pub fn expires_at(&self, timeout: Duration) -> DateTime<Utc> {
        self.created_at + timeout
    }
}

/// Request to create an order.
///
/// # JSON Example
///
/// ```json
/// {
///   "product_id": "550e8400-e29b-41d4-a716-446655440000",
///   "variant_id": null,
///   "quantity": 1,
///   "email": "buyer@example.com",
///   "payment_method": "usdt"
/// }
/// ```
#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
    #[validate(email)]
    pub email: String,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 500))]
    pub remark: Option<String>,
}

/// Order as returned to the buyer. Cards are included once COMPLETED.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_no: String,
    pub email: String,
    pub product_id: Uuid,
    pub product_name: String,
    pub variant_id: Option<Uuid>,
    pub variant_name: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usdt_amount: Option<Decimal>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cards: Vec<DeliveredCard>,
}

impl OrderResponse {
    pub fn new(order: Order, cards: Vec<DeliveredCard>) -> Self {
        Self {
            order_no: order.order_no,
            email: order.email,
            product_id: order.product_id,
            product_name: order.product_name,
            variant_id: order.variant_id,
            variant_name: order.variant_name,
            quantity: order.quantity,
            unit_price: order.unit_price,
            total_amount: order.total_amount,
            status: order.status,
            payment_method: order.payment_method,
            usdt_amount: order.usdt_amount,
            remark: order.remark,
            created_at: order.created_at,
            paid_at: order.paid_at,
            completed_at: order.completed_at,
            cancelled_at: order.cancelled_at,
            cards,
        }
    }
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self::new(order, Vec::new())
    }
}

/// Filter for the operator order listing.
#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Operator dispense request.
///
/// Without `cards` the automatic claim from the pool is retried; with
/// `cards` the given text (one card per line) is delivered instead.
#[derive(Debug, Default, Deserialize)]
pub struct DispenseRequest {
    pub cards: Option<String>,
}

/// Order total at creation time.
pub fn order_total(unit_price: Decimal, quantity: i32) -> Decimal {
    unit_price * Decimal::from(quantity)
}
