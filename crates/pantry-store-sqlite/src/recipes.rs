use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use pantry_core::{
    normalize_tags, version_content_digest, Catalog, CatalogEntry, Difficulty, EngineError,
    ImageId, Ingredient, IngredientId, IngredientInput, RatingTally, Recipe, RecipeDetail,
    RecipeDraft, RecipeId, RecipeImage, RecipeVersion, RecipeVersionId, SourceType, UserId,
};
use rusqlite::{params, Connection, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    date_text, decimal_text, map_constraint_violation, not_found, parse_decimal, parse_enum,
    parse_id, parse_optional_date, parse_rfc3339, query_all, query_one, rfc3339, SqliteStore,
};

const RECIPE_COLUMNS: &str = "recipe_id, title, description, source_url, source_type, created_by,
    current_version, times_cooked, last_cooked_date, is_deleted, created_at, updated_at";

const VERSION_COLUMNS: &str = "version_id, recipe_id, version_number, prep_time_minutes,
    cook_time_minutes, servings, difficulty, instructions, change_description, modified_by,
    content_digest, created_at";

/// Scalar fields and ingredients copied into every new version row.
struct VersionContent<'a> {
    prep_time_minutes: Option<u32>,
    cook_time_minutes: Option<u32>,
    servings: Option<u32>,
    difficulty: Option<Difficulty>,
    instructions: &'a str,
    ingredients: Vec<IngredientInput>,
}

impl<'a> VersionContent<'a> {
    fn from_draft(draft: &'a RecipeDraft) -> Self {
        Self {
            prep_time_minutes: draft.prep_time_minutes,
            cook_time_minutes: draft.cook_time_minutes,
            servings: draft.servings,
            difficulty: draft.difficulty,
            instructions: &draft.instructions,
            ingredients: draft.ingredients.clone(),
        }
    }

    fn from_version(version: &'a RecipeVersion) -> Self {
        Self {
            prep_time_minutes: version.prep_time_minutes,
            cook_time_minutes: version.cook_time_minutes,
            servings: version.servings,
            difficulty: version.difficulty,
            instructions: &version.instructions,
            ingredients: version.ingredients.iter().map(Ingredient::to_input).collect(),
        }
    }
}

impl SqliteStore {
    /// Create a recipe together with version 1, its ingredients and tags.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] for a malformed draft, or an error when
    /// any write in the transaction fails.
    pub fn create_recipe(
        &mut self,
        draft: &RecipeDraft,
        actor: UserId,
        now: OffsetDateTime,
    ) -> Result<RecipeDetail> {
        draft.validate()?;
        let mut tags = normalize_tags(&draft.tags);
        tags.sort();
        let recipe = Recipe {
            recipe_id: RecipeId::new(),
            title: draft.title.trim().to_string(),
            description: draft.description.clone(),
            source_url: draft.source_url.clone(),
            source_type: SourceType::for_source_url(draft.source_url.as_deref()),
            created_by: actor,
            current_version: 1,
            times_cooked: 0,
            last_cooked_date: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        let tx = self.write_tx()?;
        tx.execute(
            "INSERT INTO recipes(
                recipe_id, title, description, source_url, source_type, created_by,
                current_version, times_cooked, last_cooked_date, is_deleted, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, 0, ?8, ?8)",
            params![
                recipe.recipe_id.to_string(),
                recipe.title,
                recipe.description,
                recipe.source_url,
                recipe.source_type.as_str(),
                actor.to_string(),
                recipe.current_version,
                rfc3339(now)?,
            ],
        )
        .context("failed to insert recipe")?;

        let version = insert_version(
            &tx,
            recipe.recipe_id,
            1,
            &VersionContent::from_draft(draft),
            None,
            actor,
            now,
        )?;
        replace_tags(&tx, recipe.recipe_id, &tags)?;
        tx.commit().context("failed to commit recipe creation")?;

        info!(recipe_id = %recipe.recipe_id, title = %recipe.title, "recipe created");
        Ok(RecipeDetail { recipe, version, tags })
    }

    /// Append version `current + 1` holding the full submitted snapshot and
    /// advance `current_version`. Title, description and tags are replaced.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing or soft-deleted recipe,
    /// [`EngineError::Validation`] for a malformed draft, and
    /// [`EngineError::Conflict`] when a concurrent writer claimed the version number.
    pub fn update_recipe(
        &mut self,
        recipe_id: RecipeId,
        draft: &RecipeDraft,
        change_description: Option<&str>,
        actor: UserId,
        now: OffsetDateTime,
    ) -> Result<RecipeDetail> {
        draft.validate()?;
        let mut tags = normalize_tags(&draft.tags);
        tags.sort();

        let tx = self.write_tx()?;
        let mut recipe = load_live_recipe(&tx, recipe_id)?;
        let next_version = recipe.current_version + 1;
        let version = insert_version(
            &tx,
            recipe_id,
            next_version,
            &VersionContent::from_draft(draft),
            change_description,
            actor,
            now,
        )?;

        recipe.title = draft.title.trim().to_string();
        recipe.description.clone_from(&draft.description);
        recipe.current_version = next_version;
        recipe.updated_at = now;
        tx.execute(
            "UPDATE recipes SET title = ?2, description = ?3, current_version = ?4, updated_at = ?5
             WHERE recipe_id = ?1",
            params![
                recipe_id.to_string(),
                recipe.title,
                recipe.description,
                next_version,
                rfc3339(now)?,
            ],
        )
        .context("failed to advance recipe version")?;
        replace_tags(&tx, recipe_id, &tags)?;
        tx.commit().context("failed to commit recipe update")?;

        info!(%recipe_id, version = next_version, "recipe version created");
        Ok(RecipeDetail { recipe, version, tags })
    }

    /// Copy version `target_version` into a brand-new version `current + 1`.
    /// `current_version` only ever moves forward.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] when the recipe or target version is absent.
    pub fn revert_recipe(
        &mut self,
        recipe_id: RecipeId,
        target_version: u32,
        actor: UserId,
        now: OffsetDateTime,
    ) -> Result<RecipeDetail> {
        let tx = self.write_tx()?;
        let mut recipe = load_live_recipe(&tx, recipe_id)?;
        let Some(target) = load_version(&tx, recipe_id, target_version)? else {
            return Err(not_found(format!("recipe {recipe_id} version {target_version}")));
        };

        let next_version = recipe.current_version + 1;
        let description = format!("Reverted to version {target_version}");
        let version = insert_version(
            &tx,
            recipe_id,
            next_version,
            &VersionContent::from_version(&target),
            Some(&description),
            actor,
            now,
        )?;

        recipe.current_version = next_version;
        recipe.updated_at = now;
        tx.execute(
            "UPDATE recipes SET current_version = ?2, updated_at = ?3 WHERE recipe_id = ?1",
            params![recipe_id.to_string(), next_version, rfc3339(now)?],
        )
        .context("failed to advance recipe version")?;
        let tags = load_tags(&tx, recipe_id)?;
        tx.commit().context("failed to commit recipe revert")?;

        info!(%recipe_id, target_version, version = next_version, "recipe reverted");
        Ok(RecipeDetail { recipe, version, tags })
    }

    /// Flag a recipe deleted, keeping every row. Returns `false` when no live
    /// recipe matched.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn soft_delete_recipe(&mut self, recipe_id: RecipeId, now: OffsetDateTime) -> Result<bool> {
        let tx = self.write_tx()?;
        let changed = tx
            .execute(
                "UPDATE recipes SET is_deleted = 1, updated_at = ?2
                 WHERE recipe_id = ?1 AND is_deleted = 0",
                params![recipe_id.to_string(), rfc3339(now)?],
            )
            .context("failed to soft-delete recipe")?;
        tx.commit().context("failed to commit soft delete")?;
        if changed > 0 {
            info!(%recipe_id, "recipe soft-deleted");
        }
        Ok(changed > 0)
    }

    /// Remove a recipe and everything it owns: versions, ingredients, tags,
    /// images and ratings.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown recipe and
    /// [`EngineError::InvalidState`] while planned meals still reference it.
    pub fn purge_recipe(&mut self, recipe_id: RecipeId) -> Result<()> {
        let tx = self.write_tx()?;
        let id = recipe_id.to_string();
        if load_recipe(&tx, recipe_id)?.is_none() {
            return Err(not_found(format!("recipe {recipe_id}")));
        }
        let planned: i64 = tx
            .query_row("SELECT COUNT(*) FROM planned_meals WHERE recipe_id = ?1", params![id], |row| {
                row.get(0)
            })
            .context("failed to count planned meals for recipe")?;
        if planned > 0 {
            return Err(EngineError::InvalidState(format!(
                "recipe {recipe_id} is referenced by {planned} planned meal(s)"
            ))
            .into());
        }

        tx.execute(
            "DELETE FROM ingredients WHERE version_id IN
                (SELECT version_id FROM recipe_versions WHERE recipe_id = ?1)",
            params![id],
        )
        .context("failed to delete recipe ingredients")?;
        for table in ["recipe_versions", "recipe_tags", "recipe_images", "ratings", "recipes"] {
            tx.execute(&format!("DELETE FROM {table} WHERE recipe_id = ?1"), params![id])
                .with_context(|| format!("failed to delete from {table}"))?;
        }
        tx.commit().context("failed to commit recipe purge")?;

        info!(%recipe_id, "recipe purged");
        Ok(())
    }

    /// Load a live recipe with the requested version (default current).
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] when the recipe is missing, soft-deleted
    /// or lacks the requested version.
    pub fn get_recipe(&self, recipe_id: RecipeId, version: Option<u32>) -> Result<RecipeDetail> {
        let recipe = load_live_recipe(&self.conn, recipe_id)?;
        let number = version.unwrap_or(recipe.current_version);
        let Some(version) = load_version(&self.conn, recipe_id, number)? else {
            return Err(not_found(format!("recipe {recipe_id} version {number}")));
        };
        let tags = load_tags(&self.conn, recipe_id)?;
        debug!(%recipe_id, version = number, "recipe loaded");
        Ok(RecipeDetail { recipe, version, tags })
    }

    /// Every version of a live recipe, newest first.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing or soft-deleted recipe.
    pub fn recipe_versions(&self, recipe_id: RecipeId) -> Result<Vec<RecipeVersion>> {
        load_live_recipe(&self.conn, recipe_id)?;
        let mut versions = query_all(
            &self.conn,
            &format!(
                "SELECT {VERSION_COLUMNS} FROM recipe_versions
                 WHERE recipe_id = ?1 ORDER BY version_number DESC"
            ),
            params![recipe_id.to_string()],
            read_version,
        )?;
        for version in &mut versions {
            version.ingredients = load_ingredients(&self.conn, version.version_id)?;
        }
        Ok(versions)
    }

    /// Attach an image path to a live recipe. A new primary image demotes the
    /// previous one.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing recipe and
    /// [`EngineError::Validation`] for a blank path.
    pub fn add_recipe_image(
        &mut self,
        recipe_id: RecipeId,
        image_path: &str,
        is_primary: bool,
        actor: UserId,
        now: OffsetDateTime,
    ) -> Result<RecipeImage> {
        if image_path.trim().is_empty() {
            return Err(EngineError::Validation("image_path must be non-empty".to_string()).into());
        }
        let tx = self.write_tx()?;
        load_live_recipe(&tx, recipe_id)?;
        let id = recipe_id.to_string();
        let display_order: u32 = tx
            .query_row(
                "SELECT COUNT(*) FROM recipe_images WHERE recipe_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .context("failed to count recipe images")?;
        if is_primary {
            tx.execute("UPDATE recipe_images SET is_primary = 0 WHERE recipe_id = ?1", params![id])
                .context("failed to demote previous primary image")?;
        }

        let image = RecipeImage {
            image_id: ImageId::new(),
            recipe_id,
            image_path: image_path.trim().to_string(),
            is_primary,
            display_order,
            uploaded_by: actor,
            uploaded_at: now,
        };
        tx.execute(
            "INSERT INTO recipe_images(
                image_id, recipe_id, image_path, is_primary, display_order, uploaded_by, uploaded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                image.image_id.to_string(),
                id,
                image.image_path,
                image.is_primary,
                image.display_order,
                actor.to_string(),
                rfc3339(now)?,
            ],
        )
        .context("failed to insert recipe image")?;
        tx.commit().context("failed to commit recipe image")?;
        Ok(image)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing or soft-deleted recipe.
    pub fn recipe_images(&self, recipe_id: RecipeId) -> Result<Vec<RecipeImage>> {
        load_live_recipe(&self.conn, recipe_id)?;
        query_all(
            &self.conn,
            "SELECT image_id, recipe_id, image_path, is_primary, display_order, uploaded_by, uploaded_at
             FROM recipe_images WHERE recipe_id = ?1 ORDER BY display_order ASC",
            params![recipe_id.to_string()],
            read_image,
        )
    }

    /// Snapshot of every live recipe at its current version plus the stock
    /// index, for listing and suggestion strategies.
    ///
    /// # Errors
    /// Returns an error when any row cannot be read or decoded.
    pub fn load_catalog(&self) -> Result<Catalog> {
        let recipes = query_all(
            &self.conn,
            &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE is_deleted = 0"),
            [],
            read_recipe,
        )?;
        let tallies = self.rating_tallies()?;

        let mut entries = Vec::with_capacity(recipes.len());
        for recipe in recipes {
            let Some(version) = load_version(&self.conn, recipe.recipe_id, recipe.current_version)?
            else {
                return Err(anyhow!(
                    "recipe {} points at missing version {}",
                    recipe.recipe_id,
                    recipe.current_version
                ));
            };
            let tags = load_tags(&self.conn, recipe.recipe_id)?;
            let ratings = tallies.get(&recipe.recipe_id).copied().unwrap_or_default();
            entries.push(CatalogEntry { recipe, version, tags, ratings });
        }

        let stock = self.stock_index()?;
        debug!(recipes = entries.len(), "catalog loaded");
        Ok(Catalog { entries, stock })
    }

    fn rating_tallies(&self) -> Result<BTreeMap<RecipeId, RatingTally>> {
        let rows = query_all(
            &self.conn,
            "SELECT recipe_id, SUM(thumbs_up), SUM(1 - thumbs_up) FROM ratings GROUP BY recipe_id",
            [],
            |row| {
                let recipe_id: RecipeId = parse_id(&row.get::<_, String>(0)?)?;
                let tally = RatingTally { up: row.get(1)?, down: row.get(2)? };
                Ok((recipe_id, tally))
            },
        )?;
        Ok(rows.into_iter().collect())
    }
}

pub(crate) fn read_recipe(row: &Row<'_>) -> Result<Recipe> {
    Ok(Recipe {
        recipe_id: parse_id(&row.get::<_, String>(0)?)?,
        title: row.get(1)?,
        description: row.get(2)?,
        source_url: row.get(3)?,
        source_type: parse_enum(&row.get::<_, String>(4)?, "source_type", SourceType::parse)?,
        created_by: parse_id(&row.get::<_, String>(5)?)?,
        current_version: row.get(6)?,
        times_cooked: row.get(7)?,
        last_cooked_date: parse_optional_date(row.get(8)?)?,
        is_deleted: row.get(9)?,
        created_at: parse_rfc3339(&row.get::<_, String>(10)?)?,
        updated_at: parse_rfc3339(&row.get::<_, String>(11)?)?,
    })
}

fn read_version(row: &Row<'_>) -> Result<RecipeVersion> {
    let difficulty = row
        .get::<_, Option<String>>(6)?
        .map(|raw| parse_enum(&raw, "difficulty", Difficulty::parse))
        .transpose()?;
    Ok(RecipeVersion {
        version_id: parse_id(&row.get::<_, String>(0)?)?,
        recipe_id: parse_id(&row.get::<_, String>(1)?)?,
        version_number: row.get(2)?,
        prep_time_minutes: row.get(3)?,
        cook_time_minutes: row.get(4)?,
        servings: row.get(5)?,
        difficulty,
        instructions: row.get(7)?,
        change_description: row.get(8)?,
        modified_by: parse_id(&row.get::<_, String>(9)?)?,
        content_digest: row.get(10)?,
        created_at: parse_rfc3339(&row.get::<_, String>(11)?)?,
        ingredients: Vec::new(),
    })
}

fn read_ingredient(row: &Row<'_>) -> Result<Ingredient> {
    Ok(Ingredient {
        ingredient_id: parse_id(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        quantity: row.get::<_, Option<String>>(2)?.as_deref().map(parse_decimal).transpose()?,
        unit: row.get(3)?,
        category: row.get(4)?,
        is_optional: row.get(5)?,
        display_order: row.get(6)?,
    })
}

fn read_image(row: &Row<'_>) -> Result<RecipeImage> {
    Ok(RecipeImage {
        image_id: parse_id(&row.get::<_, String>(0)?)?,
        recipe_id: parse_id(&row.get::<_, String>(1)?)?,
        image_path: row.get(2)?,
        is_primary: row.get(3)?,
        display_order: row.get(4)?,
        uploaded_by: parse_id(&row.get::<_, String>(5)?)?,
        uploaded_at: parse_rfc3339(&row.get::<_, String>(6)?)?,
    })
}

/// Loads a recipe regardless of its soft-delete flag.
pub(crate) fn load_recipe(conn: &Connection, recipe_id: RecipeId) -> Result<Option<Recipe>> {
    query_one(
        conn,
        &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE recipe_id = ?1"),
        params![recipe_id.to_string()],
        read_recipe,
    )
}

pub(crate) fn load_live_recipe(conn: &Connection, recipe_id: RecipeId) -> Result<Recipe> {
    match load_recipe(conn, recipe_id)? {
        Some(recipe) if !recipe.is_deleted => Ok(recipe),
        _ => Err(not_found(format!("recipe {recipe_id}"))),
    }
}

pub(crate) fn load_version(
    conn: &Connection,
    recipe_id: RecipeId,
    version_number: u32,
) -> Result<Option<RecipeVersion>> {
    let version = query_one(
        conn,
        &format!(
            "SELECT {VERSION_COLUMNS} FROM recipe_versions
             WHERE recipe_id = ?1 AND version_number = ?2"
        ),
        params![recipe_id.to_string(), version_number],
        read_version,
    )?;
    let Some(mut version) = version else {
        return Ok(None);
    };
    version.ingredients = load_ingredients(conn, version.version_id)?;
    Ok(Some(version))
}

fn load_ingredients(conn: &Connection, version_id: RecipeVersionId) -> Result<Vec<Ingredient>> {
    query_all(
        conn,
        "SELECT ingredient_id, name, quantity, unit, category, is_optional, display_order
         FROM ingredients WHERE version_id = ?1 ORDER BY display_order ASC",
        params![version_id.to_string()],
        read_ingredient,
    )
}

fn load_tags(conn: &Connection, recipe_id: RecipeId) -> Result<Vec<String>> {
    query_all(
        conn,
        "SELECT tag FROM recipe_tags WHERE recipe_id = ?1 ORDER BY tag ASC",
        params![recipe_id.to_string()],
        |row| Ok(row.get::<_, String>(0)?),
    )
}

fn replace_tags(conn: &Connection, recipe_id: RecipeId, tags: &[String]) -> Result<()> {
    let id = recipe_id.to_string();
    conn.execute("DELETE FROM recipe_tags WHERE recipe_id = ?1", params![id])
        .context("failed to clear recipe tags")?;
    for tag in tags {
        conn.execute("INSERT INTO recipe_tags(recipe_id, tag) VALUES (?1, ?2)", params![id, tag])
            .context("failed to insert recipe tag")?;
    }
    Ok(())
}

fn insert_version(
    conn: &Connection,
    recipe_id: RecipeId,
    version_number: u32,
    content: &VersionContent<'_>,
    change_description: Option<&str>,
    actor: UserId,
    now: OffsetDateTime,
) -> Result<RecipeVersion> {
    let version_id = RecipeVersionId::new();
    let inputs = content.ingredients.as_slice();
    let content_digest = version_content_digest(
        content.prep_time_minutes,
        content.cook_time_minutes,
        content.servings,
        content.difficulty,
        content.instructions,
        inputs,
    );

    conn.execute(
        "INSERT INTO recipe_versions(
            version_id, recipe_id, version_number, prep_time_minutes, cook_time_minutes,
            servings, difficulty, instructions, change_description, modified_by,
            content_digest, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            version_id.to_string(),
            recipe_id.to_string(),
            version_number,
            content.prep_time_minutes,
            content.cook_time_minutes,
            content.servings,
            content.difficulty.map(Difficulty::as_str),
            content.instructions,
            change_description,
            actor.to_string(),
            content_digest,
            rfc3339(now)?,
        ],
    )
    .map_err(|err| map_constraint_violation(err, "recipe version"))?;

    let mut ingredients = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let ingredient = Ingredient {
            ingredient_id: IngredientId::new(),
            name: input.name.clone(),
            quantity: input.quantity,
            unit: input.unit.clone(),
            category: input.category.clone(),
            is_optional: input.is_optional,
            display_order: u32::try_from(index).context("too many ingredients")?,
        };
        conn.execute(
            "INSERT INTO ingredients(
                ingredient_id, version_id, name, quantity, unit, category, is_optional, display_order
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                ingredient.ingredient_id.to_string(),
                version_id.to_string(),
                ingredient.name,
                ingredient.quantity.map(decimal_text),
                ingredient.unit,
                ingredient.category,
                ingredient.is_optional,
                ingredient.display_order,
            ],
        )
        .context("failed to insert ingredient")?;
        ingredients.push(ingredient);
    }

    Ok(RecipeVersion {
        version_id,
        recipe_id,
        version_number,
        prep_time_minutes: content.prep_time_minutes,
        cook_time_minutes: content.cook_time_minutes,
        servings: content.servings,
        difficulty: content.difficulty,
        instructions: content.instructions.to_string(),
        change_description: change_description.map(str::to_string),
        modified_by: actor,
        content_digest,
        created_at: now,
        ingredients,
    })
}

pub(crate) fn record_cooked(
    conn: &Connection,
    recipe_id: RecipeId,
    now: OffsetDateTime,
) -> Result<()> {
    conn.execute(
        "UPDATE recipes SET times_cooked = times_cooked + 1, last_cooked_date = ?2, updated_at = ?3
         WHERE recipe_id = ?1",
        params![recipe_id.to_string(), date_text(now.date())?, rfc3339(now)?],
    )
    .context("failed to update recipe cooking statistics")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pantry_core::{RatingInput, StockIndex};
    use rust_decimal::Decimal;
    use time::Duration;

    use super::*;
    use crate::fixtures::{draft, fixture_time, ingredient, memory_store, user};

    #[test]
    fn create_recipe_writes_version_one_with_ingredients_and_tags() -> Result<()> {
        let mut store = memory_store()?;
        let mut submitted = draft("Fried Rice", 4, vec![ingredient("Rice", Some(200), false)]);
        submitted.tags = vec!["Dinner".to_string(), "QUICK".to_string(), "dinner".to_string()];
        let created = store.create_recipe(&submitted, user(), fixture_time())?;

        assert_eq!(created.recipe.current_version, 1);
        assert_eq!(created.recipe.source_type, SourceType::Manual);
        assert_eq!(created.version.version_number, 1);
        assert_eq!(created.tags, vec!["dinner".to_string(), "quick".to_string()]);

        let loaded = store.get_recipe(created.recipe.recipe_id, None)?;
        assert_eq!(loaded.version, created.version);
        assert!(loaded.version.digest_matches());
        assert_eq!(loaded.tags, vec!["dinner".to_string(), "quick".to_string()]);
        Ok(())
    }

    #[test]
    fn scraped_source_url_marks_source_type() -> Result<()> {
        let mut store = memory_store()?;
        let mut submitted = draft("Pho", 2, vec![ingredient("noodles", Some(100), false)]);
        submitted.source_url = Some("https://recipes.example/pho".to_string());
        let created = store.create_recipe(&submitted, user(), fixture_time())?;
        assert_eq!(created.recipe.source_type, SourceType::Scraped);
        Ok(())
    }

    #[test]
    fn invalid_draft_leaves_no_rows() -> Result<()> {
        let mut store = memory_store()?;
        let bad = draft("Broken", 0, vec![ingredient("rice", Some(1), false)]);
        let Err(err) = store.create_recipe(&bad, user(), fixture_time()) else {
            return Err(anyhow!("zero servings must be rejected"));
        };
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::Validation(_))));
        assert!(store.load_catalog()?.entries.is_empty());
        Ok(())
    }

    #[test]
    fn update_keeps_previous_versions_byte_identical() -> Result<()> {
        let mut store = memory_store()?;
        let author = user();
        let v1 = draft(
            "Soup",
            4,
            vec![ingredient("Carrot", Some(3), false), ingredient("Salt", None, true)],
        );
        let created = store.create_recipe(&v1, author, fixture_time())?;
        let recipe_id = created.recipe.recipe_id;

        let mut v2 = draft("Better Soup", 6, vec![ingredient("Leek", Some(2), false)]);
        v2.instructions = "Simmer slowly.".to_string();
        v2.tags = vec!["Winter".to_string()];
        let later = fixture_time() + Duration::hours(1);
        let updated = store.update_recipe(recipe_id, &v2, Some("More servings"), author, later)?;
        assert_eq!(updated.recipe.current_version, 2);
        assert_eq!(updated.recipe.title, "Better Soup");
        assert_eq!(updated.tags, vec!["winter".to_string()]);

        let old = store.get_recipe(recipe_id, Some(1))?;
        assert_eq!(old.version, created.version);
        assert_eq!(old.version.instructions, v1.instructions);
        let old_inputs =
            old.version.ingredients.iter().map(Ingredient::to_input).collect::<Vec<_>>();
        assert_eq!(old_inputs, v1.ingredients);

        let current = store.get_recipe(recipe_id, None)?;
        assert_eq!(current.version.version_number, 2);
        assert_eq!(current.version.change_description.as_deref(), Some("More servings"));

        let versions = store.recipe_versions(recipe_id)?;
        let numbers = versions.iter().map(|v| v.version_number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![2, 1]);
        Ok(())
    }

    #[test]
    fn versions_keep_submitted_names_and_fractional_quantities() -> Result<()> {
        let mut store = memory_store()?;
        let author = user();
        let mut oil = ingredient(" Olive Oil ", None, false);
        oil.quantity = Some(Decimal::new(333, 3));
        let v1 = draft("Dressing", 2, vec![oil]);
        let created = store.create_recipe(&v1, author, fixture_time())?;
        let recipe_id = created.recipe.recipe_id;
        let v2 = draft("Dressing", 2, vec![ingredient("Vinegar", Some(30), false)]);
        store.update_recipe(recipe_id, &v2, None, author, fixture_time())?;

        let old = store.get_recipe(recipe_id, Some(1))?;
        let old_inputs =
            old.version.ingredients.iter().map(Ingredient::to_input).collect::<Vec<_>>();
        assert_eq!(old_inputs, v1.ingredients);
        assert_eq!(old.version.ingredients[0].name, " Olive Oil ");

        let mut too_fine = ingredient("Saffron", None, false);
        too_fine.quantity = Some(Decimal::new(1, 4));
        let rejected = draft("Paella", 4, vec![too_fine]);
        let Err(err) = store.update_recipe(recipe_id, &rejected, None, author, fixture_time())
        else {
            return Err(anyhow!("a quantity below the ledger scale must be rejected"));
        };
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::Validation(_))));
        assert_eq!(store.get_recipe(recipe_id, None)?.recipe.current_version, 2);
        Ok(())
    }

    #[test]
    fn revert_appends_a_copy_and_never_rewinds() -> Result<()> {
        let mut store = memory_store()?;
        let author = user();
        let v1 = draft("Stew", 4, vec![ingredient("Beef", Some(500), false)]);
        let created = store.create_recipe(&v1, author, fixture_time())?;
        let recipe_id = created.recipe.recipe_id;
        let v2 = draft("Stew", 2, vec![ingredient("Lamb", Some(300), false)]);
        store.update_recipe(recipe_id, &v2, None, author, fixture_time())?;

        let reverted = store.revert_recipe(recipe_id, 1, author, fixture_time())?;
        assert_eq!(reverted.recipe.current_version, 3);
        assert_eq!(reverted.version.version_number, 3);
        assert_eq!(reverted.version.servings, created.version.servings);
        assert_eq!(reverted.version.prep_time_minutes, created.version.prep_time_minutes);
        assert_eq!(reverted.version.instructions, created.version.instructions);
        assert_eq!(reverted.version.content_digest, created.version.content_digest);
        assert_eq!(reverted.version.change_description.as_deref(), Some("Reverted to version 1"));
        assert_eq!(reverted.version.ingredients[0].name, "Beef");
        assert_eq!(reverted.version.ingredients[0].quantity, Some(Decimal::from(500)));

        let Err(err) = store.revert_recipe(recipe_id, 9, author, fixture_time()) else {
            return Err(anyhow!("reverting to a missing version must fail"));
        };
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::NotFound(_))));
        assert_eq!(store.get_recipe(recipe_id, None)?.recipe.current_version, 3);
        Ok(())
    }

    #[test]
    fn soft_deleted_recipes_are_hidden_and_not_updatable() -> Result<()> {
        let mut store = memory_store()?;
        let author = user();
        let v1 = draft("Tacos", 4, vec![ingredient("Tortilla", Some(8), false)]);
        let created = store.create_recipe(&v1, author, fixture_time())?;
        let recipe_id = created.recipe.recipe_id;

        assert!(store.soft_delete_recipe(recipe_id, fixture_time())?);
        assert!(!store.soft_delete_recipe(recipe_id, fixture_time())?);

        let Err(err) = store.get_recipe(recipe_id, None) else {
            return Err(anyhow!("soft-deleted recipe must not load"));
        };
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::NotFound(_))));
        let Err(err) = store.update_recipe(recipe_id, &v1, None, author, fixture_time()) else {
            return Err(anyhow!("soft-deleted recipe must not update"));
        };
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::NotFound(_))));
        assert!(store.load_catalog()?.entries.is_empty());

        let versions: i64 = store.conn.query_row(
            "SELECT COUNT(*) FROM recipe_versions WHERE recipe_id = ?1",
            params![recipe_id.to_string()],
            |row| row.get(0),
        )?;
        assert_eq!(versions, 1);
        Ok(())
    }

    #[test]
    fn purge_cascades_owned_rows() -> Result<()> {
        let mut store = memory_store()?;
        let author = user();
        let created = store.create_recipe(
            &draft("Pie", 8, vec![ingredient("Apple", Some(6), false)]),
            author,
            fixture_time(),
        )?;
        let recipe_id = created.recipe.recipe_id;
        store.add_recipe_image(recipe_id, "images/pie.jpg", true, author, fixture_time())?;
        store.rate_recipe(
            recipe_id,
            author,
            &RatingInput { thumbs_up: true, feedback: None, modifications: None },
            fixture_time(),
        )?;

        store.purge_recipe(recipe_id)?;
        for table in ["recipes", "recipe_versions", "recipe_tags", "recipe_images", "ratings"] {
            let count: i64 = store.conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE recipe_id = ?1"),
                params![recipe_id.to_string()],
                |row| row.get(0),
            )?;
            assert_eq!(count, 0, "{table} still has rows");
        }
        let ingredients: i64 =
            store.conn.query_row("SELECT COUNT(*) FROM ingredients", [], |row| row.get(0))?;
        assert_eq!(ingredients, 0);

        let Err(err) = store.purge_recipe(recipe_id) else {
            return Err(anyhow!("purging twice must fail"));
        };
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn new_primary_image_demotes_previous() -> Result<()> {
        let mut store = memory_store()?;
        let author = user();
        let created = store.create_recipe(
            &draft("Cake", 8, vec![ingredient("Flour", Some(300), false)]),
            author,
            fixture_time(),
        )?;
        let recipe_id = created.recipe.recipe_id;
        store.add_recipe_image(recipe_id, "a.jpg", true, author, fixture_time())?;
        store.add_recipe_image(recipe_id, "b.jpg", false, author, fixture_time())?;
        store.add_recipe_image(recipe_id, "c.jpg", true, author, fixture_time())?;

        let images = store.recipe_images(recipe_id)?;
        let primaries = images
            .iter()
            .filter(|image| image.is_primary)
            .map(|image| image.image_path.as_str())
            .collect::<Vec<_>>();
        assert_eq!(primaries, vec!["c.jpg"]);
        let orders = images.iter().map(|image| image.display_order).collect::<Vec<_>>();
        assert_eq!(orders, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn catalog_carries_current_version_tags_and_tallies() -> Result<()> {
        let mut store = memory_store()?;
        let author = user();
        let created = store.create_recipe(
            &draft("Curry", 4, vec![ingredient("Chicken", Some(400), false)]),
            author,
            fixture_time(),
        )?;
        let recipe_id = created.recipe.recipe_id;
        store.update_recipe(
            recipe_id,
            &draft("Curry", 4, vec![ingredient("Tofu", Some(400), false)]),
            None,
            author,
            fixture_time(),
        )?;
        store.rate_recipe(
            recipe_id,
            user(),
            &RatingInput { thumbs_up: false, feedback: None, modifications: None },
            fixture_time(),
        )?;

        let catalog = store.load_catalog()?;
        assert_eq!(catalog.entries.len(), 1);
        let entry = &catalog.entries[0];
        assert_eq!(entry.version.version_number, 2);
        assert_eq!(entry.version.ingredients[0].name, "Tofu");
        assert_eq!(entry.ratings, RatingTally { up: 0, down: 1 });
        assert_eq!(catalog.stock, StockIndex::default());
        Ok(())
    }
}
