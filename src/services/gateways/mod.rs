//! Payment gateway adapters.
//!
//! Each adapter turns an order into payment instructions and knows how to
//! authenticate its own confirmations. They hold no state beyond
//! configuration; completing a confirmed payment is shared and lives in
//! [`crate::services::dispense_service`].

pub mod alipay;
pub mod usdt;
pub mod wechat;
