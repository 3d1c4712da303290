use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use pantry_core::{round_quantity, EngineError};
use rusqlite::{params, Connection, ErrorCode, Params, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

mod inventory;
mod plans;
mod ratings;
mod recipes;

pub use inventory::ItemFilter;
pub use plans::PlanFilter;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS recipes (
  recipe_id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  description TEXT,
  source_url TEXT,
  source_type TEXT NOT NULL CHECK (source_type IN ('manual','scraped')),
  created_by TEXT NOT NULL,
  current_version INTEGER NOT NULL CHECK (current_version >= 1),
  times_cooked INTEGER NOT NULL DEFAULT 0 CHECK (times_cooked >= 0),
  last_cooked_date TEXT,
  is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1)),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recipe_versions (
  version_id TEXT PRIMARY KEY,
  recipe_id TEXT NOT NULL,
  version_number INTEGER NOT NULL CHECK (version_number >= 1),
  prep_time_minutes INTEGER CHECK (prep_time_minutes IS NULL OR prep_time_minutes >= 0),
  cook_time_minutes INTEGER CHECK (cook_time_minutes IS NULL OR cook_time_minutes >= 0),
  servings INTEGER CHECK (servings IS NULL OR servings > 0),
  difficulty TEXT CHECK (difficulty IS NULL OR difficulty IN ('easy','medium','hard')),
  instructions TEXT NOT NULL,
  change_description TEXT,
  modified_by TEXT NOT NULL,
  content_digest TEXT NOT NULL,
  created_at TEXT NOT NULL,
  UNIQUE(recipe_id, version_number),
  FOREIGN KEY (recipe_id) REFERENCES recipes(recipe_id)
);

CREATE TABLE IF NOT EXISTS ingredients (
  ingredient_id TEXT PRIMARY KEY,
  version_id TEXT NOT NULL,
  name TEXT NOT NULL,
  quantity TEXT,
  unit TEXT,
  category TEXT,
  is_optional INTEGER NOT NULL DEFAULT 0 CHECK (is_optional IN (0, 1)),
  display_order INTEGER NOT NULL,
  FOREIGN KEY (version_id) REFERENCES recipe_versions(version_id)
);

CREATE TABLE IF NOT EXISTS recipe_tags (
  recipe_id TEXT NOT NULL,
  tag TEXT NOT NULL,
  PRIMARY KEY (recipe_id, tag),
  FOREIGN KEY (recipe_id) REFERENCES recipes(recipe_id)
);

CREATE TABLE IF NOT EXISTS recipe_images (
  image_id TEXT PRIMARY KEY,
  recipe_id TEXT NOT NULL,
  image_path TEXT NOT NULL,
  is_primary INTEGER NOT NULL DEFAULT 0 CHECK (is_primary IN (0, 1)),
  display_order INTEGER NOT NULL,
  uploaded_by TEXT NOT NULL,
  uploaded_at TEXT NOT NULL,
  FOREIGN KEY (recipe_id) REFERENCES recipes(recipe_id)
);

CREATE TABLE IF NOT EXISTS ratings (
  rating_id TEXT PRIMARY KEY,
  recipe_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  thumbs_up INTEGER NOT NULL CHECK (thumbs_up IN (0, 1)),
  feedback TEXT,
  modifications TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  UNIQUE(recipe_id, user_id),
  FOREIGN KEY (recipe_id) REFERENCES recipes(recipe_id)
);

CREATE TABLE IF NOT EXISTS inventory_items (
  item_id TEXT PRIMARY KEY,
  item_name TEXT NOT NULL,
  name_key TEXT NOT NULL,
  quantity TEXT NOT NULL,
  unit TEXT,
  category TEXT,
  location TEXT CHECK (location IS NULL OR location IN ('pantry','fridge','freezer','other')),
  minimum_stock TEXT NOT NULL,
  expiration_date TEXT,
  notes TEXT,
  created_by TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inventory_history (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  entry_id TEXT NOT NULL UNIQUE,
  item_id TEXT NOT NULL,
  change_type TEXT NOT NULL CHECK (change_type IN ('purchased','used','expired','adjusted','auto_deducted')),
  quantity_before TEXT NOT NULL,
  quantity_after TEXT NOT NULL,
  reason TEXT,
  changed_by TEXT,
  changed_at TEXT NOT NULL,
  FOREIGN KEY (item_id) REFERENCES inventory_items(item_id)
);

CREATE TABLE IF NOT EXISTS menu_plans (
  plan_id TEXT PRIMARY KEY,
  week_start_date TEXT NOT NULL,
  name TEXT,
  created_by TEXT NOT NULL,
  is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1)),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS planned_meals (
  meal_id TEXT PRIMARY KEY,
  plan_id TEXT NOT NULL,
  recipe_id TEXT NOT NULL,
  meal_date TEXT NOT NULL,
  meal_type TEXT NOT NULL CHECK (meal_type IN ('breakfast','lunch','dinner','snack')),
  servings_planned INTEGER CHECK (servings_planned IS NULL OR servings_planned > 0),
  notes TEXT,
  cooked INTEGER NOT NULL DEFAULT 0 CHECK (cooked IN (0, 1)),
  cooked_date TEXT,
  cooked_by TEXT,
  FOREIGN KEY (plan_id) REFERENCES menu_plans(plan_id),
  FOREIGN KEY (recipe_id) REFERENCES recipes(recipe_id)
);

CREATE INDEX IF NOT EXISTS idx_recipe_versions_recipe ON recipe_versions(recipe_id, version_number);
CREATE INDEX IF NOT EXISTS idx_ingredients_version ON ingredients(version_id, display_order);
CREATE INDEX IF NOT EXISTS idx_recipe_images_recipe ON recipe_images(recipe_id, display_order);
CREATE INDEX IF NOT EXISTS idx_ratings_recipe ON ratings(recipe_id);
CREATE INDEX IF NOT EXISTS idx_inventory_items_name_key ON inventory_items(name_key);
CREATE INDEX IF NOT EXISTS idx_inventory_history_item ON inventory_history(item_id, seq);
CREATE INDEX IF NOT EXISTS idx_menu_plans_week ON menu_plans(week_start_date);
CREATE INDEX IF NOT EXISTS idx_planned_meals_plan ON planned_meals(plan_id, meal_date);
CREATE INDEX IF NOT EXISTS idx_planned_meals_recipe ON planned_meals(recipe_id);
";

/// `SQLite`-backed household store. Every mutating operation runs in one
/// immediate transaction.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed household store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version == 0 {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
            tracing::info!(version = 1, "applied schema migration");
        }

        let version = current_schema_version(&self.conn)?;
        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    fn write_tx(&mut self) -> Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start write transaction")
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn query_one<T, P>(
    conn: &Connection,
    sql: &str,
    params: P,
    read: fn(&Row<'_>) -> Result<T>,
) -> Result<Option<T>>
where
    P: Params,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(read(row)?)),
        None => Ok(None),
    }
}

fn query_all<T, P>(
    conn: &Connection,
    sql: &str,
    params: P,
    read: fn(&Row<'_>) -> Result<T>,
) -> Result<Vec<T>>
where
    P: Params,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(read(row)?);
    }
    Ok(out)
}

fn not_found(what: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(EngineError::NotFound(what.into()))
}

/// Surfaces unique-constraint races as [`EngineError::Conflict`].
fn map_constraint_violation(err: rusqlite::Error, what: &str) -> anyhow::Error {
    if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
        return anyhow::Error::new(EngineError::Conflict(format!("{what}: {err}")));
    }
    anyhow::Error::new(err).context(format!("failed to write {what}"))
}

/// Fixed-width UTC text, so `ORDER BY` on a timestamp column follows time order.
fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z"
        ))
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn parse_optional_rfc3339(value: Option<String>) -> Result<Option<OffsetDateTime>> {
    value.as_deref().map(parse_rfc3339).transpose()
}

fn date_text(value: Date) -> Result<String> {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .context("failed to format calendar date")
}

fn optional_date_text(value: Option<Date>) -> Result<Option<String>> {
    value.map(date_text).transpose()
}

fn parse_date(value: &str) -> Result<Date> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid calendar date: {value}"))
}

fn parse_optional_date(value: Option<String>) -> Result<Option<Date>> {
    value.as_deref().map(parse_date).transpose()
}

fn decimal_text(value: Decimal) -> String {
    round_quantity(value).to_string()
}

fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("invalid decimal quantity: {value}"))
}

fn parse_id<T>(raw: &str) -> Result<T>
where
    T: FromStr<Err = ulid::DecodeError>,
{
    raw.parse::<T>().with_context(|| format!("invalid ULID: {raw}"))
}

fn parse_optional_id<T>(raw: Option<String>) -> Result<Option<T>>
where
    T: FromStr<Err = ulid::DecodeError>,
{
    raw.as_deref().map(parse_id).transpose()
}

fn parse_enum<T>(raw: &str, field: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    parse(raw).ok_or_else(|| anyhow!("unknown {field}: {raw}"))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::PathBuf;

    use pantry_core::{
        Difficulty, IngredientInput, NewInventoryItem, RecipeDraft, StorageLocation, UserId,
    };
    use time::Duration;
    use ulid::Ulid;

    use super::*;

    pub fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    pub fn memory_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    pub fn temp_db_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pantry-{label}-{}.sqlite3", Ulid::new()))
    }

    pub fn cleanup_db(path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let file = PathBuf::from(format!("{}{}", path.display(), suffix));
            if file.exists() {
                std::fs::remove_file(&file)
                    .with_context(|| format!("failed to cleanup sqlite file {}", file.display()))?;
            }
        }
        Ok(())
    }

    pub fn ingredient(name: &str, quantity: Option<i64>, is_optional: bool) -> IngredientInput {
        IngredientInput {
            name: name.to_string(),
            quantity: quantity.map(Decimal::from),
            unit: Some("g".to_string()),
            category: Some("pantry".to_string()),
            is_optional,
        }
    }

    pub fn draft(title: &str, servings: u32, ingredients: Vec<IngredientInput>) -> RecipeDraft {
        RecipeDraft {
            title: title.to_string(),
            description: Some(format!("{title} for the household")),
            source_url: None,
            prep_time_minutes: Some(10),
            cook_time_minutes: Some(20),
            servings: Some(servings),
            difficulty: Some(Difficulty::Easy),
            instructions: format!("Cook the {title}."),
            ingredients,
            tags: vec!["Dinner".to_string()],
        }
    }

    pub fn new_item(name: &str, quantity: i64) -> NewInventoryItem {
        NewInventoryItem {
            item_name: name.to_string(),
            quantity: Decimal::from(quantity),
            unit: Some("g".to_string()),
            category: Some("pantry".to_string()),
            location: Some(StorageLocation::Pantry),
            minimum_stock: Decimal::from(50),
            expiration_date: None,
            notes: None,
        }
    }

    pub fn user() -> UserId {
        UserId::new()
    }
}
