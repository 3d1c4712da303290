use anyhow::{Context, Result};
use pantry_core::{EngineError, Rating, RatingId, RatingInput, RatingTally, RecipeId, UserId};
use rusqlite::{params, Connection, Row};
use time::OffsetDateTime;
use tracing::info;

use crate::recipes::{load_live_recipe, load_recipe};
use crate::{not_found, parse_id, parse_rfc3339, query_all, query_one, rfc3339, SqliteStore};

const RATING_COLUMNS: &str =
    "rating_id, recipe_id, user_id, thumbs_up, feedback, modifications, created_at, updated_at";

impl SqliteStore {
    /// Record `user_id`'s rating of a live recipe, replacing any earlier one.
    /// At most one rating exists per (recipe, user).
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for a missing or soft-deleted recipe.
    pub fn rate_recipe(
        &mut self,
        recipe_id: RecipeId,
        user_id: UserId,
        input: &RatingInput,
        now: OffsetDateTime,
    ) -> Result<Rating> {
        let tx = self.write_tx()?;
        load_live_recipe(&tx, recipe_id)?;
        let timestamp = rfc3339(now)?;
        tx.execute(
            "INSERT INTO ratings(
                rating_id, recipe_id, user_id, thumbs_up, feedback, modifications, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(recipe_id, user_id) DO UPDATE SET
                thumbs_up = excluded.thumbs_up,
                feedback = excluded.feedback,
                modifications = excluded.modifications,
                updated_at = excluded.updated_at",
            params![
                RatingId::new().to_string(),
                recipe_id.to_string(),
                user_id.to_string(),
                input.thumbs_up,
                input.feedback,
                input.modifications,
                timestamp,
            ],
        )
        .context("failed to upsert rating")?;
        let Some(rating) = load_user_rating(&tx, recipe_id, user_id)? else {
            return Err(not_found(format!("rating for recipe {recipe_id}")));
        };
        tx.commit().context("failed to commit rating")?;

        info!(%recipe_id, %user_id, thumbs_up = input.thumbs_up, "recipe rated");
        Ok(rating)
    }

    /// All ratings of a recipe, newest first.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown recipe.
    pub fn ratings(&self, recipe_id: RecipeId) -> Result<Vec<Rating>> {
        ensure_recipe_exists(&self.conn, recipe_id)?;
        query_all(
            &self.conn,
            &format!(
                "SELECT {RATING_COLUMNS} FROM ratings
                 WHERE recipe_id = ?1 ORDER BY updated_at DESC, rating_id DESC"
            ),
            params![recipe_id.to_string()],
            read_rating,
        )
    }

    /// # Errors
    /// Returns an error when the rating row cannot be read.
    pub fn user_rating(&self, recipe_id: RecipeId, user_id: UserId) -> Result<Option<Rating>> {
        load_user_rating(&self.conn, recipe_id, user_id)
    }

    /// Edit a rating in place. Only its author may change it.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown rating and
    /// [`EngineError::Unauthorized`] when `user_id` is not the author.
    pub fn update_rating(
        &mut self,
        rating_id: RatingId,
        user_id: UserId,
        input: &RatingInput,
        now: OffsetDateTime,
    ) -> Result<Rating> {
        let tx = self.write_tx()?;
        let mut rating = load_owned_rating(&tx, rating_id, user_id)?;
        tx.execute(
            "UPDATE ratings SET thumbs_up = ?2, feedback = ?3, modifications = ?4, updated_at = ?5
             WHERE rating_id = ?1",
            params![
                rating_id.to_string(),
                input.thumbs_up,
                input.feedback,
                input.modifications,
                rfc3339(now)?,
            ],
        )
        .context("failed to update rating")?;
        tx.commit().context("failed to commit rating update")?;

        rating.thumbs_up = input.thumbs_up;
        rating.feedback.clone_from(&input.feedback);
        rating.modifications.clone_from(&input.modifications);
        rating.updated_at = now;
        Ok(rating)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown rating and
    /// [`EngineError::Unauthorized`] when `user_id` is not the author.
    pub fn delete_rating(&mut self, rating_id: RatingId, user_id: UserId) -> Result<()> {
        let tx = self.write_tx()?;
        load_owned_rating(&tx, rating_id, user_id)?;
        tx.execute("DELETE FROM ratings WHERE rating_id = ?1", params![rating_id.to_string()])
            .context("failed to delete rating")?;
        tx.commit().context("failed to commit rating delete")?;
        info!(%rating_id, "rating deleted");
        Ok(())
    }

    /// Thumbs counts for one recipe.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown recipe.
    pub fn rating_tally(&self, recipe_id: RecipeId) -> Result<RatingTally> {
        ensure_recipe_exists(&self.conn, recipe_id)?;
        let (up, total): (u32, u32) = self
            .conn
            .query_row(
                "SELECT COALESCE(SUM(thumbs_up), 0), COUNT(*) FROM ratings WHERE recipe_id = ?1",
                params![recipe_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("failed to count ratings")?;
        Ok(RatingTally { up, down: total - up })
    }
}

fn read_rating(row: &Row<'_>) -> Result<Rating> {
    Ok(Rating {
        rating_id: parse_id(&row.get::<_, String>(0)?)?,
        recipe_id: parse_id(&row.get::<_, String>(1)?)?,
        user_id: parse_id(&row.get::<_, String>(2)?)?,
        thumbs_up: row.get(3)?,
        feedback: row.get(4)?,
        modifications: row.get(5)?,
        created_at: parse_rfc3339(&row.get::<_, String>(6)?)?,
        updated_at: parse_rfc3339(&row.get::<_, String>(7)?)?,
    })
}

fn ensure_recipe_exists(conn: &Connection, recipe_id: RecipeId) -> Result<()> {
    if load_recipe(conn, recipe_id)?.is_none() {
        return Err(not_found(format!("recipe {recipe_id}")));
    }
    Ok(())
}

fn load_user_rating(
    conn: &Connection,
    recipe_id: RecipeId,
    user_id: UserId,
) -> Result<Option<Rating>> {
    query_one(
        conn,
        &format!("SELECT {RATING_COLUMNS} FROM ratings WHERE recipe_id = ?1 AND user_id = ?2"),
        params![recipe_id.to_string(), user_id.to_string()],
        read_rating,
    )
}

fn load_owned_rating(conn: &Connection, rating_id: RatingId, user_id: UserId) -> Result<Rating> {
    let rating = query_one(
        conn,
        &format!("SELECT {RATING_COLUMNS} FROM ratings WHERE rating_id = ?1"),
        params![rating_id.to_string()],
        read_rating,
    )?;
    let Some(rating) = rating else {
        return Err(not_found(format!("rating {rating_id}")));
    };
    if rating.user_id != user_id {
        return Err(EngineError::Unauthorized(format!(
            "rating {rating_id} belongs to another user"
        ))
        .into());
    }
    Ok(rating)
}
