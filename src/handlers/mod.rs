//! HTTP request handlers (route handlers).
//!
//! Handlers extract request data, call into [`crate::services`] and turn the
//! result into a JSON response. Errors become responses through
//! [`crate::error::AppError`].

/// Operator endpoints
pub mod admin;
pub mod health;
/// Buyer order endpoints
pub mod orders;
/// Checkout and gateway callbacks
pub mod payments;
pub mod products;
