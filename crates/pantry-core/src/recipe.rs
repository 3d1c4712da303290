use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Date, OffsetDateTime};

use crate::{
    require_text, EngineError, ImageId, IngredientId, RecipeId, RecipeVersionId, UserId,
    QUANTITY_SCALE,
};

pub const MAX_TITLE_CHARS: usize = 255;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Manual,
    Scraped,
}

impl SourceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scraped => "scraped",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "scraped" => Some(Self::Scraped),
            _ => None,
        }
    }

    /// Recipes arriving with a source URL came through the scraping collaborator.
    #[must_use]
    pub fn for_source_url(source_url: Option<&str>) -> Self {
        match source_url {
            Some(url) if !url.trim().is_empty() => Self::Scraped,
            _ => Self::Manual,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngredientInput {
    pub name: String,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub is_optional: bool,
}

impl IngredientInput {
    /// # Errors
    /// Returns [`EngineError::Validation`] for a blank name, a non-positive
    /// quantity, or a quantity finer than [`QUANTITY_SCALE`] decimal places.
    pub fn validate(&self) -> Result<(), EngineError> {
        require_text("ingredient name", &self.name)?;
        if let Some(quantity) = self.quantity {
            if quantity <= Decimal::ZERO {
                return Err(EngineError::Validation(format!(
                    "ingredient {} quantity must be greater than zero",
                    self.name.trim()
                )));
            }
            if quantity.normalize().scale() > QUANTITY_SCALE {
                return Err(EngineError::Validation(format!(
                    "ingredient {} quantity allows at most {QUANTITY_SCALE} decimal places",
                    self.name.trim()
                )));
            }
        }
        Ok(())
    }
}

/// Full recipe snapshot submitted on create and on every update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipeDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub prep_time_minutes: Option<u32>,
    #[serde(default)]
    pub cook_time_minutes: Option<u32>,
    #[serde(default)]
    pub servings: Option<u32>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    pub instructions: String,
    pub ingredients: Vec<IngredientInput>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RecipeDraft {
    /// # Errors
    /// Returns [`EngineError::Validation`] when the snapshot is incomplete or malformed.
    pub fn validate(&self) -> Result<(), EngineError> {
        require_text("title", &self.title)?;
        if self.title.trim().chars().count() > MAX_TITLE_CHARS {
            return Err(EngineError::Validation(format!(
                "title must be at most {MAX_TITLE_CHARS} characters"
            )));
        }
        require_text("instructions", &self.instructions)?;
        if self.servings == Some(0) {
            return Err(EngineError::Validation(
                "servings must be greater than zero".to_string(),
            ));
        }
        if self.ingredients.is_empty() {
            return Err(EngineError::Validation(
                "a recipe needs at least one ingredient".to_string(),
            ));
        }
        for ingredient in &self.ingredients {
            ingredient.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipe {
    pub recipe_id: RecipeId,
    pub title: String,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub source_type: SourceType,
    pub created_by: UserId,
    pub current_version: u32,
    pub times_cooked: u32,
    pub last_cooked_date: Option<Date>,
    pub is_deleted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ingredient {
    pub ingredient_id: IngredientId,
    pub name: String,
    pub quantity: Option<Decimal>,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub is_optional: bool,
    pub display_order: u32,
}

impl Ingredient {
    #[must_use]
    pub fn to_input(&self) -> IngredientInput {
        IngredientInput {
            name: self.name.clone(),
            quantity: self.quantity,
            unit: self.unit.clone(),
            category: self.category.clone(),
            is_optional: self.is_optional,
        }
    }
}

/// Immutable snapshot; rows are only ever inserted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipeVersion {
    pub version_id: RecipeVersionId,
    pub recipe_id: RecipeId,
    pub version_number: u32,
    pub prep_time_minutes: Option<u32>,
    pub cook_time_minutes: Option<u32>,
    pub servings: Option<u32>,
    pub difficulty: Option<Difficulty>,
    pub instructions: String,
    pub change_description: Option<String>,
    pub modified_by: UserId,
    pub content_digest: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub ingredients: Vec<Ingredient>,
}

impl RecipeVersion {
    #[must_use]
    pub fn total_time_minutes(&self) -> u32 {
        self.prep_time_minutes
            .unwrap_or(0)
            .saturating_add(self.cook_time_minutes.unwrap_or(0))
    }

    /// Ingredients that count toward deduction, shopping and availability.
    pub fn required_ingredients(&self) -> impl Iterator<Item = &Ingredient> {
        self.ingredients.iter().filter(|ingredient| !ingredient.is_optional)
    }

    #[must_use]
    pub fn digest_matches(&self) -> bool {
        let inputs = self.ingredients.iter().map(Ingredient::to_input).collect::<Vec<_>>();
        version_content_digest(
            self.prep_time_minutes,
            self.cook_time_minutes,
            self.servings,
            self.difficulty,
            &self.instructions,
            &inputs,
        ) == self.content_digest
    }
}

/// Stable digest over the content of one version snapshot.
#[must_use]
pub fn version_content_digest(
    prep_time_minutes: Option<u32>,
    cook_time_minutes: Option<u32>,
    servings: Option<u32>,
    difficulty: Option<Difficulty>,
    instructions: &str,
    ingredients: &[IngredientInput],
) -> String {
    fn opt<T: ToString>(value: Option<T>) -> String {
        value.map_or_else(String::new, |inner| inner.to_string())
    }

    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}\t{}\t{}\t{}\n",
            opt(prep_time_minutes),
            opt(cook_time_minutes),
            opt(servings),
            difficulty.map_or("", Difficulty::as_str)
        )
        .as_bytes(),
    );
    hasher.update(instructions.as_bytes());
    hasher.update(b"\n");
    for ingredient in ingredients {
        let line = format!(
            "{}\t{}\t{}\t{}\t{}\n",
            ingredient.name,
            opt(ingredient.quantity.map(|quantity| quantity.normalize())),
            ingredient.unit.as_deref().unwrap_or(""),
            ingredient.category.as_deref().unwrap_or(""),
            ingredient.is_optional
        );
        hasher.update(line.as_bytes());
    }
    format!("sha256:{:x}", hasher.finalize())
}

/// Lowercases, trims and de-duplicates tags while keeping first-seen order.
#[must_use]
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let normalized = tag.trim().to_lowercase();
        if !normalized.is_empty() && !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipeDetail {
    pub recipe: Recipe,
    pub version: RecipeVersion,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipeImage {
    pub image_id: ImageId,
    pub recipe_id: RecipeId,
    pub image_path: String,
    pub is_primary: bool,
    pub display_order: u32,
    pub uploaded_by: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ListFilter {
    Favorites,
    NotRecent,
    NeverTried,
    AvailableInventory,
}

impl ListFilter {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "favorites" => Some(Self::Favorites),
            "not_recent" => Some(Self::NotRecent),
            "never_tried" => Some(Self::NeverTried),
            "available_inventory" => Some(Self::AvailableInventory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipeQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub filter: Option<ListFilter>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

impl Default for RecipeQuery {
    fn default() -> Self {
        Self {
            search: None,
            tags: Vec::new(),
            difficulty: None,
            filter: None,
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl RecipeQuery {
    /// # Errors
    /// Returns [`EngineError::Validation`] for a zero page or a limit outside 1..=100.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.page == 0 {
            return Err(EngineError::Validation("page must be at least 1".to_string()));
        }
        if self.limit == 0 || self.limit > 100 {
            return Err(EngineError::Validation("limit must be in 1..=100".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipeSummary {
    pub recipe_id: RecipeId,
    pub title: String,
    pub description: Option<String>,
    pub prep_time_minutes: Option<u32>,
    pub cook_time_minutes: Option<u32>,
    pub servings: Option<u32>,
    pub difficulty: Option<Difficulty>,
    pub tags: Vec<String>,
    pub is_favorite: bool,
    pub times_cooked: u32,
    pub last_cooked_date: Option<Date>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipePage {
    pub items: Vec<RecipeSummary>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingredient(name: &str, quantity: Option<i64>) -> IngredientInput {
        IngredientInput {
            name: name.to_string(),
            quantity: quantity.map(Decimal::from),
            unit: Some("g".to_string()),
            category: None,
            is_optional: false,
        }
    }

    fn draft() -> RecipeDraft {
        RecipeDraft {
            title: "Fried Rice".to_string(),
            description: None,
            source_url: None,
            prep_time_minutes: Some(10),
            cook_time_minutes: Some(15),
            servings: Some(4),
            difficulty: Some(Difficulty::Easy),
            instructions: "Fry the rice.".to_string(),
            ingredients: vec![ingredient("rice", Some(200))],
            tags: vec!["Dinner".to_string()],
        }
    }

    #[test]
    fn draft_validation_rejects_malformed_snapshots() {
        assert_eq!(draft().validate(), Ok(()));

        let mut blank_title = draft();
        blank_title.title = "  ".to_string();
        assert!(matches!(blank_title.validate(), Err(EngineError::Validation(_))));

        let mut zero_servings = draft();
        zero_servings.servings = Some(0);
        assert!(matches!(zero_servings.validate(), Err(EngineError::Validation(_))));

        let mut negative = draft();
        negative.ingredients = vec![ingredient("rice", Some(-5))];
        assert!(matches!(negative.validate(), Err(EngineError::Validation(_))));

        let mut empty = draft();
        empty.ingredients.clear();
        assert!(matches!(empty.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn ingredient_quantities_finer_than_the_ledger_scale_are_rejected() {
        let mut fine = ingredient("saffron", None);
        fine.quantity = Some(Decimal::new(1, 4));
        assert!(matches!(fine.validate(), Err(EngineError::Validation(_))));

        fine.quantity = Some(Decimal::new(3333, 4));
        assert!(matches!(fine.validate(), Err(EngineError::Validation(_))));

        let mut trailing_zero = ingredient("saffron", None);
        trailing_zero.quantity = Some(Decimal::new(3330, 4));
        assert_eq!(trailing_zero.validate(), Ok(()));
    }

    #[test]
    fn tags_are_lowercased_trimmed_and_deduplicated() {
        let tags = vec![
            " Summer ".to_string(),
            "summer".to_string(),
            String::new(),
            "Quick".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["summer".to_string(), "quick".to_string()]);
    }

    #[test]
    fn source_type_follows_source_url() {
        assert_eq!(SourceType::for_source_url(Some("https://example.org/r/1")), SourceType::Scraped);
        assert_eq!(SourceType::for_source_url(Some("  ")), SourceType::Manual);
        assert_eq!(SourceType::for_source_url(None), SourceType::Manual);
    }

    #[test]
    fn digest_ignores_decimal_scale_but_tracks_content() {
        let base = version_content_digest(Some(10), None, Some(4), None, "Boil.", &[ingredient(
            "rice",
            Some(200),
        )]);
        let mut scaled = ingredient("rice", None);
        scaled.quantity = Some(Decimal::new(200_000, 3));
        let same = version_content_digest(Some(10), None, Some(4), None, "Boil.", &[scaled]);
        let other = version_content_digest(Some(10), None, Some(4), None, "Steam.", &[ingredient(
            "rice",
            Some(200),
        )]);
        assert_eq!(base, same);
        assert_ne!(base, other);
        assert!(base.starts_with("sha256:"));
    }

    #[test]
    fn query_limits_are_bounded() {
        assert_eq!(RecipeQuery::default().validate(), Ok(()));
        let query = RecipeQuery { limit: 101, ..RecipeQuery::default() };
        assert!(matches!(query.validate(), Err(EngineError::Validation(_))));
        let query = RecipeQuery { page: 0, ..RecipeQuery::default() };
        assert!(matches!(query.validate(), Err(EngineError::Validation(_))));
    }
}
