//! Health check endpoint for service monitoring.

use crate::{db::DbPool, error::AppError};
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response.
///
/// Reports whether the storefront can serve orders right now.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` when a body is returned
    pub status: String,

    /// `"connected"` once the round trip to PostgreSQL succeeded
    pub database: String,

    /// Server clock at the time of the check
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Checks
///
/// - The pool can hand out a connection and run a trivial query
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
///
/// # Response (500 Internal Server Error)
///
/// When the database is unreachable the standard error body is returned,
/// so load balancers stop routing payment callbacks to this instance.
pub async fn health_check(State(pool): State<DbPool>) -> Result<Json<HealthResponse>, AppError> {
    // One round trip is enough to prove the pool works
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        database: "connected".to_string(),
        timestamp: Utc::now(),
    }))
}
