//! License card models.
//!
//! A card is one unit of sellable secret content. It moves from AVAILABLE to
//! SOLD exactly once and never back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "card_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Available,
    Sold,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Card {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub content: String,
    pub status: CardStatus,
    pub order_id: Option<Uuid>,
    pub sold_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Card as delivered to the buyer.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveredCard {
    pub id: Uuid,
    pub content: String,
}

impl From<Card> for DeliveredCard {
    fn from(card: Card) -> Self {
        Self {
            id: card.id,
            content: card.content,
        }
    }
}

/// Bulk import request: one card per line of `content`.
#[derive(Debug, Deserialize, Validate)]
pub struct ImportCardsRequest {
    pub variant_id: Option<Uuid>,
    #[validate(length(min = 1))]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ImportCardsResponse {
    pub imported: usize,
}

/// Split pasted card text into card contents.
///
/// Lines are trimmed and blank lines dropped.
pub fn parse_card_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_lines_skip_blank_and_trim() {
        let lines = parse_card_lines("  user1:pass1 \n\n\r\nuser2:pass2\r\n   \n");
        assert_eq!(lines, vec!["user1:pass1", "user2:pass2"]);
    }

    #[test]
    fn empty_text_has_no_cards() {
        assert!(parse_card_lines("\n \n").is_empty());
    }
}
