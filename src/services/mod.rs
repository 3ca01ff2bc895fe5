//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, validation, and gateway calls.

/// Products, variants and the card pool
pub mod catalog_service;
/// Payment completion and card dispensing
pub mod dispense_service;
pub mod gateways;
/// Buyer emails
pub mod notification_service;
/// Order creation, lookup, expiry and cancellation
pub mod order_service;
pub mod payment_service;
pub mod settings_service;
