//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.
//!
//! Email delivery problems are not errors. They are reported through
//! [`NotifyOutcome`](crate::services::notification_service::NotifyOutcome).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Validation**: malformed or missing request fields
/// - **Not found**: referenced product, order or card does not exist
/// - **Lifecycle**: action attempted in the wrong status
/// - **Inventory**: not enough cards or stock
/// - **Upstream**: payment provider failed or sent an unverifiable message
/// - **Internal**: database or configuration failures
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Operator bearer key is missing or wrong.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Product not found")]
    ProductNotFound,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Card not found")]
    CardNotFound,

    /// The entity is not in a status that allows the requested action.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("{0}")]
    InvalidState(String),

    /// Not enough AVAILABLE cards (or stock counter) to satisfy the quantity.
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("Out of stock")]
    OutOfStock,

    /// Payment provider call failed or its response could not be trusted.
    ///
    /// Returns HTTP 502 Bad Gateway.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// Stored settings or process configuration are unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request")]
    InvalidRequest(String),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::InvalidRequest(errors.to_string())
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "out_of_stock",
///     "message": "Out of stock"
///   }
/// }
/// ```
///
/// Database and configuration errors are logged and hidden from the client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::ProductNotFound => {
                (StatusCode::NOT_FOUND, "product_not_found", self.to_string())
            }
            AppError::OrderNotFound => (StatusCode::NOT_FOUND, "order_not_found", self.to_string()),
            AppError::CardNotFound => (StatusCode::NOT_FOUND, "card_not_found", self.to_string()),
            AppError::InvalidState(ref msg) => (StatusCode::CONFLICT, "invalid_state", msg.clone()),
            AppError::OutOfStock => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "out_of_stock",
                self.to_string(),
            ),
            AppError::Gateway(_) => (StatusCode::BAD_GATEWAY, "gateway_error", self.to_string()),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Database(ref e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Configuration(ref e) => {
                tracing::error!("Configuration error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
