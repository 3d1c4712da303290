use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub mod catalog;
pub mod ledger;
pub mod menu;
pub mod rating;
pub mod recipe;
pub mod settings;
pub mod shopping;
pub mod suggest;

pub use catalog::{list_recipes, Availability, Catalog, CatalogEntry};
pub use ledger::{
    clamp_deduction, expiring_items, normalize_name, replay_history, round_quantity, ChangeType,
    ExpiringItem, HistoryEntry, InventoryItem, InventoryPatch, NewInventoryItem, StockIndex,
    StorageLocation, QUANTITY_SCALE,
};
pub use menu::{
    servings_ratio, validate_week_start, CookedMeal, Deduction, MealType, MenuPlan, PlanPatch,
    PlannedMeal, PlannedMealInput,
};
pub use rating::{is_favorite, Rating, RatingInput, RatingSummary, RatingTally};
pub use recipe::{
    normalize_tags, version_content_digest, Difficulty, Ingredient, IngredientInput, ListFilter,
    Recipe, RecipeDetail, RecipeDraft, RecipeImage, RecipePage, RecipeQuery, RecipeSummary,
    RecipeVersion, SourceType,
};
pub use settings::Settings;
pub use shopping::{
    aggregate_requirements, reconcile_with_stock, AggregatedIngredient, PlannedCooking,
    ShoppingList, ShoppingListItem,
};
pub use suggest::{suggest, Season, Strategy, Suggestion, SuggestionMetrics, SuggestionOptions};

/// Failure taxonomy shared by every engine operation.
///
/// Storage layers wrap these inside `anyhow::Error`; callers recover the
/// variant with `downcast_ref::<EngineError>()`.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(pub Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(value).map(Self)
            }
        }
    };
}

ulid_id!(RecipeId);
ulid_id!(RecipeVersionId);
ulid_id!(IngredientId);
ulid_id!(ImageId);
ulid_id!(RatingId);
ulid_id!(InventoryItemId);
ulid_id!(HistoryEntryId);
ulid_id!(MenuPlanId);
ulid_id!(PlannedMealId);
ulid_id!(ShoppingItemId);
ulid_id!(
    /// Household member acting on the engine. Authentication lives outside.
    UserId
);

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} must be non-empty")));
    }
    Ok(())
}
