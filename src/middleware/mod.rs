//! HTTP middleware components.
//!
//! Middleware run before route handlers and can short-circuit requests
//! (reject unauthorized callers).

/// Admin API key authentication
pub mod auth;
