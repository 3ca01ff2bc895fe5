//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! along with the request and response bodies built from them.

/// License cards
pub mod card;
/// Orders and their state machine
pub mod order;
/// Payment records and checkout instructions
pub mod payment;
/// Products and variants
pub mod product;
/// Typed store settings
pub mod setting;
