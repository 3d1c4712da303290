use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, Weekday};

use crate::{EngineError, InventoryItemId, MenuPlanId, PlannedMealId, RecipeId, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Snack => "snack",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "breakfast" => Some(Self::Breakfast),
            "lunch" => Some(Self::Lunch),
            "dinner" => Some(Self::Dinner),
            "snack" => Some(Self::Snack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedMeal {
    pub meal_id: PlannedMealId,
    pub plan_id: MenuPlanId,
    pub recipe_id: RecipeId,
    pub meal_date: Date,
    pub meal_type: MealType,
    pub servings_planned: Option<u32>,
    pub notes: Option<String>,
    pub cooked: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cooked_date: Option<OffsetDateTime>,
    pub cooked_by: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuPlan {
    pub plan_id: MenuPlanId,
    pub week_start_date: Date,
    pub name: Option<String>,
    pub created_by: UserId,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub meals: Vec<PlannedMeal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedMealInput {
    pub recipe_id: RecipeId,
    pub meal_date: Date,
    pub meal_type: MealType,
    #[serde(default)]
    pub servings_planned: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl PlannedMealInput {
    /// # Errors
    /// Returns [`EngineError::Validation`] when planned servings is zero.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.servings_planned == Some(0) {
            return Err(EngineError::Validation(
                "servings_planned must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Replaces every meal of the plan when present.
    #[serde(default)]
    pub meals: Option<Vec<PlannedMealInput>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deduction {
    pub item_id: InventoryItemId,
    pub item_name: String,
    pub quantity_deducted: Decimal,
    pub quantity_before: Decimal,
    pub quantity_after: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CookedMeal {
    pub meal: PlannedMeal,
    pub deductions: Vec<Deduction>,
}

/// Weeks start on Monday.
///
/// # Errors
/// Returns [`EngineError::InvalidState`] when `week_start_date` is any other weekday.
pub fn validate_week_start(week_start_date: Date) -> Result<(), EngineError> {
    if week_start_date.weekday() != Weekday::Monday {
        return Err(EngineError::InvalidState(format!(
            "week_start_date {week_start_date} must be a Monday"
        )));
    }
    Ok(())
}

/// Multiplier applied to a version's ingredient quantities for a planned meal.
///
/// Planned servings default to the version's servings; a version without
/// servings counts as one.
#[must_use]
pub fn servings_ratio(servings_planned: Option<u32>, version_servings: Option<u32>) -> Decimal {
    let base = version_servings.filter(|servings| *servings > 0).unwrap_or(1);
    let planned = servings_planned.filter(|servings| *servings > 0).unwrap_or(base);
    Decimal::from(planned) / Decimal::from(base)
}
