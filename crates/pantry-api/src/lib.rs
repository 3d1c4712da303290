use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use pantry_core::{
    aggregate_requirements, list_recipes, reconcile_with_stock, suggest, CookedMeal,
    EngineError, ExpiringItem, HistoryEntry, InventoryItem, InventoryItemId, InventoryPatch,
    MenuPlan, MenuPlanId, NewInventoryItem, PlanPatch, PlannedMeal, PlannedMealId,
    PlannedMealInput, Rating, RatingId, RatingInput, RatingSummary, RecipeDetail, RecipeDraft,
    RecipeId, RecipeImage, RecipePage, RecipeQuery, RecipeVersion, Settings, ShoppingList,
    Strategy, Suggestion, SuggestionOptions, UserId,
};
use pantry_store_sqlite::{IntegrityReport, ItemFilter, PlanFilter, SchemaStatus, SqliteStore};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tracing::{debug, info, warn};

pub const API_CONTRACT_VERSION: &str = "api.v1";

const DEFAULT_SUGGESTION_LIMIT: usize = 10;

/// Read-only accessor for household settings. Consulted on every operation
/// that needs thresholds; implementations must not cache across calls unless
/// the values are fixed.
pub trait SettingsSource: Debug + Send + Sync {
    /// # Errors
    /// Returns an error when the settings cannot be loaded or fail validation.
    fn current(&self) -> Result<Settings>;
}

/// Fixed settings value.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub Settings);

impl SettingsSource for StaticSettings {
    fn current(&self) -> Result<Settings> {
        self.0.validate()?;
        Ok(self.0.clone())
    }
}

/// Settings re-read from a YAML file on every call. A missing file yields
/// the defaults.
#[derive(Debug, Clone)]
pub struct YamlSettingsFile {
    path: PathBuf,
}

impl YamlSettingsFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SettingsSource for YamlSettingsFile {
    fn current(&self) -> Result<Settings> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "settings file absent; using defaults");
            return Ok(Settings::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read settings file {}", self.path.display()))?;
        let settings: Settings = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse settings file {}", self.path.display()))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Recover the domain failure carried by an api error, if any.
#[must_use]
pub fn classify(err: &anyhow::Error) -> Option<&EngineError> {
    err.downcast_ref::<EngineError>()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRecipeRequest {
    pub actor: UserId,
    pub recipe: RecipeDraft,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateRecipeRequest {
    pub actor: UserId,
    #[serde(default)]
    pub change_description: Option<String>,
    pub recipe: RecipeDraft,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevertRecipeRequest {
    pub actor: UserId,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddImageRequest {
    pub actor: UserId,
    pub image_path: String,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateRequest {
    pub user_id: UserId,
    #[serde(flatten)]
    pub rating: RatingInput,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateItemRequest {
    pub actor: UserId,
    pub item: NewInventoryItem,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateItemRequest {
    pub actor: UserId,
    pub patch: InventoryPatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdjustRequest {
    pub actor: UserId,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeductRequest {
    #[serde(default)]
    pub actor: Option<UserId>,
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeductResult {
    pub item_id: InventoryItemId,
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub actor: UserId,
    pub name: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FindOrCreateItemRequest {
    #[serde(default)]
    pub actor: Option<UserId>,
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatePlanRequest {
    pub actor: UserId,
    pub week_start_date: Date,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub meals: Vec<PlannedMealInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkCookedRequest {
    pub actor: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuggestRequest {
    pub strategy: String,
    #[serde(default = "default_suggestion_limit")]
    pub limit: usize,
    #[serde(default)]
    pub today: Option<Date>,
    #[serde(default)]
    pub min_match_fraction: Option<Decimal>,
    #[serde(default)]
    pub max_total_minutes: Option<u32>,
}

fn default_suggestion_limit() -> usize {
    DEFAULT_SUGGESTION_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpiringRequest {
    /// Defaults to the `expiration_warning_days` setting.
    #[serde(default)]
    pub within_days: Option<u32>,
    #[serde(default)]
    pub today: Option<Date>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerCheck {
    pub item_id: InventoryItemId,
    pub quantity: Decimal,
    pub replayed_quantity: Decimal,
    pub consistent: bool,
}

/// Household engine facade. Each call opens the `SQLite` store, applies
/// pending migrations and reads settings afresh.
#[derive(Debug, Clone)]
pub struct PantryApi {
    db_path: PathBuf,
    settings: Arc<dyn SettingsSource>,
}

impl PantryApi {
    #[must_use]
    pub fn new(db_path: PathBuf, settings: Arc<dyn SettingsSource>) -> Self {
        Self { db_path, settings }
    }

    /// Facade with default settings.
    #[must_use]
    pub fn with_default_settings(db_path: PathBuf) -> Self {
        Self::new(db_path, Arc::new(StaticSettings::default()))
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// # Errors
    /// Returns an error when the settings source fails.
    pub fn settings(&self) -> Result<Settings> {
        self.settings.current()
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when any integrity probe fails to run.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        self.store()?.integrity_check()
    }

    /// # Errors
    /// Returns [`EngineError::Validation`] for a malformed draft.
    pub fn create_recipe(&self, request: &CreateRecipeRequest) -> Result<RecipeDetail> {
        self.store()?.create_recipe(&request.recipe, request.actor, OffsetDateTime::now_utc())
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing recipe and
    /// [`EngineError::Validation`] for a malformed draft.
    pub fn update_recipe(
        &self,
        recipe_id: RecipeId,
        request: &UpdateRecipeRequest,
    ) -> Result<RecipeDetail> {
        self.store()?.update_recipe(
            recipe_id,
            &request.recipe,
            request.change_description.as_deref(),
            request.actor,
            OffsetDateTime::now_utc(),
        )
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] when the recipe or version is absent.
    pub fn revert_recipe(
        &self,
        recipe_id: RecipeId,
        request: &RevertRecipeRequest,
    ) -> Result<RecipeDetail> {
        self.store()?.revert_recipe(
            recipe_id,
            request.version,
            request.actor,
            OffsetDateTime::now_utc(),
        )
    }

    /// Soft-delete a recipe.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] when no live recipe matched.
    pub fn delete_recipe(&self, recipe_id: RecipeId) -> Result<()> {
        if !self.store()?.soft_delete_recipe(recipe_id, OffsetDateTime::now_utc())? {
            return Err(EngineError::NotFound(format!("recipe {recipe_id}")).into());
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`EngineError::InvalidState`] while planned meals reference the recipe.
    pub fn purge_recipe(&self, recipe_id: RecipeId) -> Result<()> {
        self.store()?.purge_recipe(recipe_id)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing recipe or version.
    pub fn get_recipe(&self, recipe_id: RecipeId, version: Option<u32>) -> Result<RecipeDetail> {
        self.store()?.get_recipe(recipe_id, version)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing recipe.
    pub fn recipe_versions(&self, recipe_id: RecipeId) -> Result<Vec<RecipeVersion>> {
        self.store()?.recipe_versions(recipe_id)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing recipe.
    pub fn add_recipe_image(
        &self,
        recipe_id: RecipeId,
        request: &AddImageRequest,
    ) -> Result<RecipeImage> {
        self.store()?.add_recipe_image(
            recipe_id,
            &request.image_path,
            request.is_primary,
            request.actor,
            OffsetDateTime::now_utc(),
        )
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing recipe.
    pub fn recipe_images(&self, recipe_id: RecipeId) -> Result<Vec<RecipeImage>> {
        self.store()?.recipe_images(recipe_id)
    }

    /// Paginated, filtered recipe listing.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] for an out-of-range page or limit.
    pub fn list_recipes(&self, query: &RecipeQuery) -> Result<RecipePage> {
        query.validate()?;
        let settings = self.settings()?;
        let catalog = self.store()?.load_catalog()?;
        let today = OffsetDateTime::now_utc().date();
        Ok(list_recipes(
            &catalog,
            query,
            &settings,
            today,
            SuggestionOptions::default().min_match_fraction,
        ))
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing or deleted recipe.
    pub fn rate_recipe(&self, recipe_id: RecipeId, request: &RateRequest) -> Result<Rating> {
        self.store()?.rate_recipe(
            recipe_id,
            request.user_id,
            &request.rating,
            OffsetDateTime::now_utc(),
        )
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing recipe.
    pub fn ratings(&self, recipe_id: RecipeId) -> Result<Vec<Rating>> {
        self.store()?.ratings(recipe_id)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] or [`EngineError::Unauthorized`].
    pub fn update_rating(&self, rating_id: RatingId, request: &RateRequest) -> Result<Rating> {
        self.store()?.update_rating(
            rating_id,
            request.user_id,
            &request.rating,
            OffsetDateTime::now_utc(),
        )
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] or [`EngineError::Unauthorized`].
    pub fn delete_rating(&self, rating_id: RatingId, user_id: UserId) -> Result<()> {
        self.store()?.delete_rating(rating_id, user_id)
    }

    /// Thumbs counts and favorite status under the current settings.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing recipe.
    pub fn rating_summary(&self, recipe_id: RecipeId) -> Result<RatingSummary> {
        let settings = self.settings()?;
        let tally = self.store()?.rating_tally(recipe_id)?;
        Ok(RatingSummary::new(recipe_id, tally, &settings))
    }

    /// # Errors
    /// Returns [`EngineError::Validation`] for invalid item fields.
    pub fn create_item(&self, request: &CreateItemRequest) -> Result<InventoryItem> {
        self.store()?.create_item(&request.item, request.actor, OffsetDateTime::now_utc())
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown item.
    pub fn get_item(&self, item_id: InventoryItemId) -> Result<InventoryItem> {
        self.store()?
            .get_item(item_id)?
            .ok_or_else(|| EngineError::NotFound(format!("inventory item {item_id}")).into())
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list_items(&self, filter: &ItemFilter) -> Result<Vec<InventoryItem>> {
        self.store()?.list_items(filter)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] or [`EngineError::Validation`].
    pub fn update_item(
        &self,
        item_id: InventoryItemId,
        request: &UpdateItemRequest,
    ) -> Result<InventoryItem> {
        self.store()?.update_item(item_id, &request.patch, request.actor, OffsetDateTime::now_utc())
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] or [`EngineError::Validation`].
    pub fn adjust_item(
        &self,
        item_id: InventoryItemId,
        request: &AdjustRequest,
    ) -> Result<InventoryItem> {
        self.store()?.adjust_quantity(
            item_id,
            request.quantity,
            request.actor,
            OffsetDateTime::now_utc(),
        )
    }

    /// # Errors
    /// Returns [`EngineError::Validation`] for a negative amount.
    pub fn deduct(
        &self,
        item_id: InventoryItemId,
        request: &DeductRequest,
    ) -> Result<DeductResult> {
        let applied = self.store()?.deduct(
            item_id,
            request.amount,
            &request.reason,
            request.actor,
            OffsetDateTime::now_utc(),
        )?;
        Ok(DeductResult { item_id, applied })
    }

    /// # Errors
    /// Returns [`EngineError::Validation`] for a blank name or non-positive quantity.
    pub fn record_purchase(&self, request: &PurchaseRequest) -> Result<InventoryItem> {
        self.store()?.record_purchase(
            &request.name,
            request.quantity,
            request.unit.as_deref(),
            request.category.as_deref(),
            request.actor,
            OffsetDateTime::now_utc(),
        )
    }

    /// First item matching the name, or a new zero-quantity placeholder.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] for a blank name.
    pub fn find_or_create_item(&self, request: &FindOrCreateItemRequest) -> Result<InventoryItem> {
        self.store()?.find_or_create_item(
            &request.name,
            request.unit.as_deref(),
            request.category.as_deref(),
            request.actor,
            OffsetDateTime::now_utc(),
        )
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown item.
    pub fn delete_item(&self, item_id: InventoryItemId) -> Result<()> {
        self.store()?.delete_item(item_id)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown item.
    pub fn item_history(&self, item_id: InventoryItemId) -> Result<Vec<HistoryEntry>> {
        self.store()?.history(item_id)
    }

    /// Compare an item's stored quantity with its replayed ledger.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown item and
    /// [`EngineError::InvalidState`] for a broken ledger chain.
    pub fn check_ledger(&self, item_id: InventoryItemId) -> Result<LedgerCheck> {
        let store = self.store()?;
        let Some(item) = store.get_item(item_id)? else {
            return Err(EngineError::NotFound(format!("inventory item {item_id}")).into());
        };
        let replayed_quantity = store.replay_ledger(item_id)?;
        if replayed_quantity != item.quantity {
            warn!(%item_id, quantity = %item.quantity, %replayed_quantity, "ledger drift detected");
        }
        Ok(LedgerCheck {
            item_id,
            quantity: item.quantity,
            replayed_quantity,
            consistent: replayed_quantity == item.quantity,
        })
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn low_stock_items(&self) -> Result<Vec<InventoryItem>> {
        self.store()?.low_stock_items()
    }

    /// # Errors
    /// Returns an error when settings or the store cannot be read.
    pub fn expiring_items(&self, request: &ExpiringRequest) -> Result<Vec<ExpiringItem>> {
        let within_days = match request.within_days {
            Some(days) => days,
            None => self.settings()?.expiration_warning_days,
        };
        let today = request.today.unwrap_or_else(|| OffsetDateTime::now_utc().date());
        self.store()?.expiring_items(today, within_days)
    }

    /// # Errors
    /// Returns [`EngineError::InvalidState`] when the week does not start on Monday.
    pub fn create_plan(&self, request: &CreatePlanRequest) -> Result<MenuPlan> {
        self.store()?.create_plan(
            request.week_start_date,
            request.name.as_deref(),
            &request.meals,
            request.actor,
            OffsetDateTime::now_utc(),
        )
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown plan.
    pub fn get_plan(&self, plan_id: MenuPlanId) -> Result<MenuPlan> {
        self.store()?.get_plan(plan_id)
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list_plans(&self, filter: &PlanFilter) -> Result<Vec<MenuPlan>> {
        self.store()?.list_plans(filter)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown plan or recipe.
    pub fn update_plan(&self, plan_id: MenuPlanId, patch: &PlanPatch) -> Result<MenuPlan> {
        self.store()?.update_plan(plan_id, patch, OffsetDateTime::now_utc())
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown plan.
    pub fn delete_plan(&self, plan_id: MenuPlanId) -> Result<()> {
        self.store()?.delete_plan(plan_id)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown plan or recipe.
    pub fn add_meal(&self, plan_id: MenuPlanId, input: &PlannedMealInput) -> Result<PlannedMeal> {
        self.store()?.add_meal(plan_id, input)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] when the meal is not in the plan.
    pub fn remove_meal(&self, plan_id: MenuPlanId, meal_id: PlannedMealId) -> Result<()> {
        self.store()?.remove_meal(plan_id, meal_id)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] when the meal is not in the plan and
    /// [`EngineError::InvalidState`] when it was already cooked.
    pub fn mark_cooked(
        &self,
        plan_id: MenuPlanId,
        meal_id: PlannedMealId,
        request: &MarkCookedRequest,
    ) -> Result<CookedMeal> {
        self.store()?.mark_cooked(plan_id, meal_id, request.actor, OffsetDateTime::now_utc())
    }

    /// Shopping list for a plan's uncooked meals, net of current stock.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown plan.
    pub fn shopping_list(&self, plan_id: MenuPlanId, grouped: bool) -> Result<ShoppingList> {
        let store = self.store()?;
        let meals = store.shopping_inputs(plan_id)?;
        let stock = store.stock_index()?;
        let items = reconcile_with_stock(aggregate_requirements(&meals), &stock, grouped);
        info!(%plan_id, meals = meals.len(), items = items.len(), "shopping list generated");
        Ok(ShoppingList {
            menu_plan_id: plan_id,
            grouped,
            items,
            generated_at: OffsetDateTime::now_utc(),
        })
    }

    /// Ranked suggestions for a named strategy. Unknown names fall back to
    /// rotation.
    ///
    /// # Errors
    /// Returns an error when settings or the catalog cannot be read.
    pub fn suggest(&self, request: &SuggestRequest) -> Result<Vec<Suggestion>> {
        let strategy = Strategy::parse(request.strategy.trim()).unwrap_or_else(|| {
            warn!(strategy = %request.strategy, "unknown suggestion strategy; using rotation");
            Strategy::Rotation
        });
        let defaults = SuggestionOptions::default();
        let options = SuggestionOptions {
            min_match_fraction: request.min_match_fraction.unwrap_or(defaults.min_match_fraction),
            max_total_minutes: request.max_total_minutes.unwrap_or(defaults.max_total_minutes),
        };
        let settings = self.settings()?;
        let catalog = self.store()?.load_catalog()?;
        let today = request.today.unwrap_or_else(|| OffsetDateTime::now_utc().date());
        let suggestions = suggest(strategy, &catalog, &settings, today, request.limit, &options);
        debug!(strategy = strategy.as_str(), count = suggestions.len(), "suggestions ranked");
        Ok(suggestions)
    }
}
