use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{RatingId, RecipeId, Settings, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rating {
    pub rating_id: RatingId,
    pub recipe_id: RecipeId,
    pub user_id: UserId,
    pub thumbs_up: bool,
    pub feedback: Option<String>,
    pub modifications: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingInput {
    pub thumbs_up: bool,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub modifications: Option<String>,
}

/// Thumbs counts for one recipe.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingTally {
    pub up: u32,
    pub down: u32,
}

impl RatingTally {
    #[must_use]
    pub fn total(self) -> u32 {
        self.up.saturating_add(self.down)
    }

    /// Share of thumbs-up ratings, `None` when nobody has rated.
    #[must_use]
    pub fn approval(self) -> Option<Decimal> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some(Decimal::from(self.up) / Decimal::from(total))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingSummary {
    pub recipe_id: RecipeId,
    pub up_count: u32,
    pub down_count: u32,
    pub total: u32,
    pub is_favorite: bool,
}

impl RatingSummary {
    #[must_use]
    pub fn new(recipe_id: RecipeId, tally: RatingTally, settings: &Settings) -> Self {
        Self {
            recipe_id,
            up_count: tally.up,
            down_count: tally.down,
            total: tally.total(),
            is_favorite: is_favorite(tally, settings),
        }
    }
}

/// A favorite has at least `favorites_min_raters` ratings and an approval
/// share of at least `favorites_threshold`.
#[must_use]
pub fn is_favorite(tally: RatingTally, settings: &Settings) -> bool {
    let total = tally.total();
    if total == 0 || total < settings.favorites_min_raters {
        return false;
    }
    Decimal::from(tally.up) >= settings.favorites_threshold * Decimal::from(total)
}
