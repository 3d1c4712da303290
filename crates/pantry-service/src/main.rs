use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use clap::Parser;
use pantry_api::{
    classify, AddImageRequest, AdjustRequest, CreateItemRequest, CreatePlanRequest,
    CreateRecipeRequest, DeductRequest, DeductResult, ExpiringRequest, FindOrCreateItemRequest,
    LedgerCheck, MarkCookedRequest, MigrateResult, PantryApi, PurchaseRequest, RateRequest,
    RevertRecipeRequest, SettingsSource, StaticSettings, SuggestRequest, UpdateItemRequest,
    UpdateRecipeRequest, YamlSettingsFile, API_CONTRACT_VERSION,
};
use pantry_core::{
    CookedMeal, EngineError, ExpiringItem, HistoryEntry, InventoryItem, InventoryItemId,
    MenuPlan, MenuPlanId, PlanPatch, PlannedMeal, PlannedMealId, PlannedMealInput, Rating,
    RatingId, RatingSummary, RecipeDetail, RecipeId, RecipeImage, RecipePage, RecipeQuery,
    RecipeVersion, ShoppingList, Suggestion, UserId,
};
use pantry_store_sqlite::{IntegrityReport, ItemFilter, PlanFilter, SchemaStatus};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: PantryApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct Removed {
    removed: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionQuery {
    version: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct ShoppingListQuery {
    #[serde(default = "grouped_by_default")]
    grouped: bool,
}

fn grouped_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct RatingOwner {
    user_id: UserId,
}

#[derive(Debug, Parser)]
#[command(name = "pantry-service")]
#[command(about = "Local HTTP service for the household pantry engine")]
struct Args {
    #[arg(long, default_value = "./pantry.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// YAML settings file, re-read on every request. Defaults apply when absent.
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long, default_value = "info")]
    log_filter: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(status: StatusCode, message: impl Into<String>) -> ServiceError {
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }
}

fn status_for(err: &anyhow::Error) -> StatusCode {
    match classify(err) {
        Some(EngineError::Validation(_)) => StatusCode::BAD_REQUEST,
        Some(EngineError::NotFound(_)) => StatusCode::NOT_FOUND,
        Some(EngineError::Unauthorized(_)) => StatusCode::FORBIDDEN,
        Some(EngineError::InvalidState(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(EngineError::Conflict(_)) => StatusCode::CONFLICT,
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: anyhow::Error) -> ServiceError {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %format!("{err:#}"), "request failed");
    }
    ServiceState::error(status, format!("{err:#}"))
}

fn parse_id<T: FromStr>(value: &str, label: &str) -> Result<T, ServiceError> {
    value.parse().map_err(|_| {
        ServiceState::error(StatusCode::BAD_REQUEST, format!("invalid {label} id: {value}"))
    })
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

type Reply<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/db/integrity", get(db_integrity))
        .route("/v1/recipes", post(recipe_create))
        .route("/v1/recipes/list", post(recipe_list))
        .route(
            "/v1/recipes/:recipe_id",
            get(recipe_show).put(recipe_update).delete(recipe_delete),
        )
        .route("/v1/recipes/:recipe_id/purge", post(recipe_purge))
        .route("/v1/recipes/:recipe_id/revert", post(recipe_revert))
        .route("/v1/recipes/:recipe_id/versions", get(recipe_versions))
        .route("/v1/recipes/:recipe_id/images", get(recipe_images).post(recipe_add_image))
        .route("/v1/recipes/:recipe_id/ratings", get(recipe_ratings).post(recipe_rate))
        .route("/v1/recipes/:recipe_id/rating-summary", get(recipe_rating_summary))
        .route("/v1/ratings/:rating_id", put(rating_update).delete(rating_delete))
        .route("/v1/inventory", post(inventory_create))
        .route("/v1/inventory/list", post(inventory_list))
        .route("/v1/inventory/purchase", post(inventory_purchase))
        .route("/v1/inventory/find-or-create", post(inventory_find_or_create))
        .route("/v1/inventory/low-stock", get(inventory_low_stock))
        .route("/v1/inventory/expiring", post(inventory_expiring))
        .route(
            "/v1/inventory/:item_id",
            get(inventory_show).patch(inventory_update).delete(inventory_delete),
        )
        .route("/v1/inventory/:item_id/adjust", post(inventory_adjust))
        .route("/v1/inventory/:item_id/deduct", post(inventory_deduct))
        .route("/v1/inventory/:item_id/history", get(inventory_history))
        .route("/v1/inventory/:item_id/ledger-check", get(inventory_ledger_check))
        .route("/v1/plans", post(plan_create))
        .route("/v1/plans/list", post(plan_list))
        .route("/v1/plans/:plan_id", get(plan_show).patch(plan_update).delete(plan_delete))
        .route("/v1/plans/:plan_id/meals", post(plan_add_meal))
        .route("/v1/plans/:plan_id/meals/:meal_id", delete(plan_remove_meal))
        .route("/v1/plans/:plan_id/meals/:meal_id/cooked", post(plan_mark_cooked))
        .route("/v1/plans/:plan_id/shopping-list", get(plan_shopping_list))
        .route("/v1/suggestions", post(suggestions))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_filter)),
        )
        .init();

    let settings: Arc<dyn SettingsSource> = match args.settings {
        Some(path) => Arc::new(YamlSettingsFile::new(path)),
        None => Arc::new(StaticSettings::default()),
    };
    settings.current()?;
    let state = ServiceState { api: PantryApi::new(args.db.clone(), settings) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(bind = %args.bind, db = %args.db.display(), "pantry service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(State(state): State<ServiceState>) -> Reply<SchemaStatus> {
    let status = state.api.schema_status().map_err(api_error)?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Reply<MigrateResult> {
    let result = state.api.migrate(request.dry_run).map_err(api_error)?;
    Ok(Json(envelope(result)))
}

async fn db_integrity(State(state): State<ServiceState>) -> Reply<IntegrityReport> {
    let report = state.api.integrity_check().map_err(api_error)?;
    Ok(Json(envelope(report)))
}

async fn recipe_create(
    State(state): State<ServiceState>,
    Json(request): Json<CreateRecipeRequest>,
) -> Reply<RecipeDetail> {
    let detail = state.api.create_recipe(&request).map_err(api_error)?;
    Ok(Json(envelope(detail)))
}

async fn recipe_list(
    State(state): State<ServiceState>,
    Json(query): Json<RecipeQuery>,
) -> Reply<RecipePage> {
    let page = state.api.list_recipes(&query).map_err(api_error)?;
    Ok(Json(envelope(page)))
}

async fn recipe_show(
    State(state): State<ServiceState>,
    Path(recipe_id): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Reply<RecipeDetail> {
    let recipe_id: RecipeId = parse_id(&recipe_id, "recipe")?;
    let detail = state.api.get_recipe(recipe_id, query.version).map_err(api_error)?;
    Ok(Json(envelope(detail)))
}

async fn recipe_update(
    State(state): State<ServiceState>,
    Path(recipe_id): Path<String>,
    Json(request): Json<UpdateRecipeRequest>,
) -> Reply<RecipeDetail> {
    let recipe_id: RecipeId = parse_id(&recipe_id, "recipe")?;
    let detail = state.api.update_recipe(recipe_id, &request).map_err(api_error)?;
    Ok(Json(envelope(detail)))
}

async fn recipe_delete(
    State(state): State<ServiceState>,
    Path(recipe_id): Path<String>,
) -> Reply<Removed> {
    let recipe_id: RecipeId = parse_id(&recipe_id, "recipe")?;
    state.api.delete_recipe(recipe_id).map_err(api_error)?;
    Ok(Json(envelope(Removed { removed: true })))
}

async fn recipe_purge(
    State(state): State<ServiceState>,
    Path(recipe_id): Path<String>,
) -> Reply<Removed> {
    let recipe_id: RecipeId = parse_id(&recipe_id, "recipe")?;
    state.api.purge_recipe(recipe_id).map_err(api_error)?;
    Ok(Json(envelope(Removed { removed: true })))
}

async fn recipe_revert(
    State(state): State<ServiceState>,
    Path(recipe_id): Path<String>,
    Json(request): Json<RevertRecipeRequest>,
) -> Reply<RecipeDetail> {
    let recipe_id: RecipeId = parse_id(&recipe_id, "recipe")?;
    let detail = state.api.revert_recipe(recipe_id, &request).map_err(api_error)?;
    Ok(Json(envelope(detail)))
}

async fn recipe_versions(
    State(state): State<ServiceState>,
    Path(recipe_id): Path<String>,
) -> Reply<Vec<RecipeVersion>> {
    let recipe_id: RecipeId = parse_id(&recipe_id, "recipe")?;
    let versions = state.api.recipe_versions(recipe_id).map_err(api_error)?;
    Ok(Json(envelope(versions)))
}

async fn recipe_images(
    State(state): State<ServiceState>,
    Path(recipe_id): Path<String>,
) -> Reply<Vec<RecipeImage>> {
    let recipe_id: RecipeId = parse_id(&recipe_id, "recipe")?;
    let images = state.api.recipe_images(recipe_id).map_err(api_error)?;
    Ok(Json(envelope(images)))
}

async fn recipe_add_image(
    State(state): State<ServiceState>,
    Path(recipe_id): Path<String>,
    Json(request): Json<AddImageRequest>,
) -> Reply<RecipeImage> {
    let recipe_id: RecipeId = parse_id(&recipe_id, "recipe")?;
    let image = state.api.add_recipe_image(recipe_id, &request).map_err(api_error)?;
    Ok(Json(envelope(image)))
}

async fn recipe_ratings(
    State(state): State<ServiceState>,
    Path(recipe_id): Path<String>,
) -> Reply<Vec<Rating>> {
    let recipe_id: RecipeId = parse_id(&recipe_id, "recipe")?;
    let ratings = state.api.ratings(recipe_id).map_err(api_error)?;
    Ok(Json(envelope(ratings)))
}

async fn recipe_rate(
    State(state): State<ServiceState>,
    Path(recipe_id): Path<String>,
    Json(request): Json<RateRequest>,
) -> Reply<Rating> {
    let recipe_id: RecipeId = parse_id(&recipe_id, "recipe")?;
    let rating = state.api.rate_recipe(recipe_id, &request).map_err(api_error)?;
    Ok(Json(envelope(rating)))
}

async fn recipe_rating_summary(
    State(state): State<ServiceState>,
    Path(recipe_id): Path<String>,
) -> Reply<RatingSummary> {
    let recipe_id: RecipeId = parse_id(&recipe_id, "recipe")?;
    let summary = state.api.rating_summary(recipe_id).map_err(api_error)?;
    Ok(Json(envelope(summary)))
}

async fn rating_update(
    State(state): State<ServiceState>,
    Path(rating_id): Path<String>,
    Json(request): Json<RateRequest>,
) -> Reply<Rating> {
    let rating_id: RatingId = parse_id(&rating_id, "rating")?;
    let rating = state.api.update_rating(rating_id, &request).map_err(api_error)?;
    Ok(Json(envelope(rating)))
}

async fn rating_delete(
    State(state): State<ServiceState>,
    Path(rating_id): Path<String>,
    Json(owner): Json<RatingOwner>,
) -> Reply<Removed> {
    let rating_id: RatingId = parse_id(&rating_id, "rating")?;
    state.api.delete_rating(rating_id, owner.user_id).map_err(api_error)?;
    Ok(Json(envelope(Removed { removed: true })))
}

async fn inventory_create(
    State(state): State<ServiceState>,
    Json(request): Json<CreateItemRequest>,
) -> Reply<InventoryItem> {
    let item = state.api.create_item(&request).map_err(api_error)?;
    Ok(Json(envelope(item)))
}

async fn inventory_list(
    State(state): State<ServiceState>,
    Json(filter): Json<ItemFilter>,
) -> Reply<Vec<InventoryItem>> {
    let items = state.api.list_items(&filter).map_err(api_error)?;
    Ok(Json(envelope(items)))
}

async fn inventory_purchase(
    State(state): State<ServiceState>,
    Json(request): Json<PurchaseRequest>,
) -> Reply<InventoryItem> {
    let item = state.api.record_purchase(&request).map_err(api_error)?;
    Ok(Json(envelope(item)))
}

async fn inventory_find_or_create(
    State(state): State<ServiceState>,
    Json(request): Json<FindOrCreateItemRequest>,
) -> Reply<InventoryItem> {
    let item = state.api.find_or_create_item(&request).map_err(api_error)?;
    Ok(Json(envelope(item)))
}

async fn inventory_low_stock(State(state): State<ServiceState>) -> Reply<Vec<InventoryItem>> {
    let items = state.api.low_stock_items().map_err(api_error)?;
    Ok(Json(envelope(items)))
}

async fn inventory_expiring(
    State(state): State<ServiceState>,
    Json(request): Json<ExpiringRequest>,
) -> Reply<Vec<ExpiringItem>> {
    let items = state.api.expiring_items(&request).map_err(api_error)?;
    Ok(Json(envelope(items)))
}

async fn inventory_show(
    State(state): State<ServiceState>,
    Path(item_id): Path<String>,
) -> Reply<InventoryItem> {
    let item_id: InventoryItemId = parse_id(&item_id, "inventory item")?;
    let item = state.api.get_item(item_id).map_err(api_error)?;
    Ok(Json(envelope(item)))
}

async fn inventory_update(
    State(state): State<ServiceState>,
    Path(item_id): Path<String>,
    Json(request): Json<UpdateItemRequest>,
) -> Reply<InventoryItem> {
    let item_id: InventoryItemId = parse_id(&item_id, "inventory item")?;
    let item = state.api.update_item(item_id, &request).map_err(api_error)?;
    Ok(Json(envelope(item)))
}

async fn inventory_delete(
    State(state): State<ServiceState>,
    Path(item_id): Path<String>,
) -> Reply<Removed> {
    let item_id: InventoryItemId = parse_id(&item_id, "inventory item")?;
    state.api.delete_item(item_id).map_err(api_error)?;
    Ok(Json(envelope(Removed { removed: true })))
}

async fn inventory_adjust(
    State(state): State<ServiceState>,
    Path(item_id): Path<String>,
    Json(request): Json<AdjustRequest>,
) -> Reply<InventoryItem> {
    let item_id: InventoryItemId = parse_id(&item_id, "inventory item")?;
    let item = state.api.adjust_item(item_id, &request).map_err(api_error)?;
    Ok(Json(envelope(item)))
}

async fn inventory_deduct(
    State(state): State<ServiceState>,
    Path(item_id): Path<String>,
    Json(request): Json<DeductRequest>,
) -> Reply<DeductResult> {
    let item_id: InventoryItemId = parse_id(&item_id, "inventory item")?;
    let result = state.api.deduct(item_id, &request).map_err(api_error)?;
    Ok(Json(envelope(result)))
}

async fn inventory_history(
    State(state): State<ServiceState>,
    Path(item_id): Path<String>,
) -> Reply<Vec<HistoryEntry>> {
    let item_id: InventoryItemId = parse_id(&item_id, "inventory item")?;
    let history = state.api.item_history(item_id).map_err(api_error)?;
    Ok(Json(envelope(history)))
}

async fn inventory_ledger_check(
    State(state): State<ServiceState>,
    Path(item_id): Path<String>,
) -> Reply<LedgerCheck> {
    let item_id: InventoryItemId = parse_id(&item_id, "inventory item")?;
    let check = state.api.check_ledger(item_id).map_err(api_error)?;
    Ok(Json(envelope(check)))
}

async fn plan_create(
    State(state): State<ServiceState>,
    Json(request): Json<CreatePlanRequest>,
) -> Reply<MenuPlan> {
    let plan = state.api.create_plan(&request).map_err(api_error)?;
    Ok(Json(envelope(plan)))
}

async fn plan_list(
    State(state): State<ServiceState>,
    Json(filter): Json<PlanFilter>,
) -> Reply<Vec<MenuPlan>> {
    let plans = state.api.list_plans(&filter).map_err(api_error)?;
    Ok(Json(envelope(plans)))
}

async fn plan_show(
    State(state): State<ServiceState>,
    Path(plan_id): Path<String>,
) -> Reply<MenuPlan> {
    let plan_id: MenuPlanId = parse_id(&plan_id, "menu plan")?;
    let plan = state.api.get_plan(plan_id).map_err(api_error)?;
    Ok(Json(envelope(plan)))
}

async fn plan_update(
    State(state): State<ServiceState>,
    Path(plan_id): Path<String>,
    Json(patch): Json<PlanPatch>,
) -> Reply<MenuPlan> {
    let plan_id: MenuPlanId = parse_id(&plan_id, "menu plan")?;
    let plan = state.api.update_plan(plan_id, &patch).map_err(api_error)?;
    Ok(Json(envelope(plan)))
}

async fn plan_delete(
    State(state): State<ServiceState>,
    Path(plan_id): Path<String>,
) -> Reply<Removed> {
    let plan_id: MenuPlanId = parse_id(&plan_id, "menu plan")?;
    state.api.delete_plan(plan_id).map_err(api_error)?;
    Ok(Json(envelope(Removed { removed: true })))
}

async fn plan_add_meal(
    State(state): State<ServiceState>,
    Path(plan_id): Path<String>,
    Json(input): Json<PlannedMealInput>,
) -> Reply<PlannedMeal> {
    let plan_id: MenuPlanId = parse_id(&plan_id, "menu plan")?;
    let meal = state.api.add_meal(plan_id, &input).map_err(api_error)?;
    Ok(Json(envelope(meal)))
}

async fn plan_remove_meal(
    State(state): State<ServiceState>,
    Path((plan_id, meal_id)): Path<(String, String)>,
) -> Reply<Removed> {
    let plan_id: MenuPlanId = parse_id(&plan_id, "menu plan")?;
    let meal_id: PlannedMealId = parse_id(&meal_id, "planned meal")?;
    state.api.remove_meal(plan_id, meal_id).map_err(api_error)?;
    Ok(Json(envelope(Removed { removed: true })))
}

async fn plan_mark_cooked(
    State(state): State<ServiceState>,
    Path((plan_id, meal_id)): Path<(String, String)>,
    Json(request): Json<MarkCookedRequest>,
) -> Reply<CookedMeal> {
    let plan_id: MenuPlanId = parse_id(&plan_id, "menu plan")?;
    let meal_id: PlannedMealId = parse_id(&meal_id, "planned meal")?;
    let cooked = state.api.mark_cooked(plan_id, meal_id, &request).map_err(api_error)?;
    Ok(Json(envelope(cooked)))
}

async fn plan_shopping_list(
    State(state): State<ServiceState>,
    Path(plan_id): Path<String>,
    Query(query): Query<ShoppingListQuery>,
) -> Reply<ShoppingList> {
    let plan_id: MenuPlanId = parse_id(&plan_id, "menu plan")?;
    let list = state.api.shopping_list(plan_id, query.grouped).map_err(api_error)?;
    Ok(Json(envelope(list)))
}

async fn suggestions(
    State(state): State<ServiceState>,
    Json(request): Json<SuggestRequest>,
) -> Reply<Vec<Suggestion>> {
    let suggestions = state.api.suggest(&request).map_err(api_error)?;
    Ok(Json(envelope(suggestions)))
}
