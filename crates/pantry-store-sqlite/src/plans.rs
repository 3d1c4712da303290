use anyhow::{anyhow, Context, Result};
use pantry_core::{
    round_quantity, servings_ratio, validate_week_start, CookedMeal, EngineError, MealType,
    MenuPlan, MenuPlanId, PlanPatch, PlannedCooking, PlannedMeal, PlannedMealId, PlannedMealInput,
    UserId,
};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::inventory::{deduct_in, find_item_by_name};
use crate::recipes::{load_live_recipe, load_recipe, load_version, record_cooked};
use crate::{
    date_text, not_found, optional_date_text, parse_date, parse_enum, parse_id,
    parse_optional_id, parse_optional_rfc3339, parse_rfc3339, query_all, query_one, rfc3339,
    SqliteStore,
};

const PLAN_COLUMNS: &str =
    "plan_id, week_start_date, name, created_by, is_active, created_at, updated_at";

const MEAL_COLUMNS: &str = "meal_id, plan_id, recipe_id, meal_date, meal_type, servings_planned,
    notes, cooked, cooked_date, cooked_by";

const MEAL_ORDER: &str = "meal_date ASC,
    CASE meal_type WHEN 'breakfast' THEN 0 WHEN 'lunch' THEN 1 WHEN 'dinner' THEN 2 ELSE 3 END,
    meal_id ASC";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanFilter {
    #[serde(default)]
    pub week_start: Option<Date>,
    #[serde(default)]
    pub active_only: bool,
}

impl SqliteStore {
    /// Create a weekly plan, optionally seeded with meals.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] when `week_start_date` is not a
    /// Monday and [`EngineError::NotFound`] when a meal names an unknown recipe.
    pub fn create_plan(
        &mut self,
        week_start_date: Date,
        name: Option<&str>,
        meals: &[PlannedMealInput],
        actor: UserId,
        now: OffsetDateTime,
    ) -> Result<MenuPlan> {
        validate_week_start(week_start_date)?;
        let plan_id = MenuPlanId::new();

        let tx = self.write_tx()?;
        tx.execute(
            "INSERT INTO menu_plans(
                plan_id, week_start_date, name, created_by, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
            params![
                plan_id.to_string(),
                date_text(week_start_date)?,
                name,
                actor.to_string(),
                rfc3339(now)?,
            ],
        )
        .context("failed to insert menu plan")?;
        let mut planned = Vec::with_capacity(meals.len());
        for input in meals {
            planned.push(insert_meal(&tx, plan_id, input)?);
        }
        tx.commit().context("failed to commit menu plan")?;

        info!(%plan_id, %week_start_date, meals = planned.len(), "menu plan created");
        Ok(MenuPlan {
            plan_id,
            week_start_date,
            name: name.map(str::to_string),
            created_by: actor,
            is_active: true,
            created_at: now,
            updated_at: now,
            meals: sorted_meals(planned),
        })
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown plan.
    pub fn get_plan(&self, plan_id: MenuPlanId) -> Result<MenuPlan> {
        load_plan(&self.conn, plan_id)
    }

    /// Plans matching `filter`, most recent week first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_plans(&self, filter: &PlanFilter) -> Result<Vec<MenuPlan>> {
        let mut plans = query_all(
            &self.conn,
            &format!(
                "SELECT {PLAN_COLUMNS} FROM menu_plans
                 WHERE (?1 IS NULL OR week_start_date = ?1) AND (?2 = 0 OR is_active = 1)
                 ORDER BY week_start_date DESC, created_at DESC"
            ),
            params![optional_date_text(filter.week_start)?, filter.active_only],
            read_plan,
        )?;
        for plan in &mut plans {
            plan.meals = load_meals(&self.conn, plan.plan_id)?;
        }
        Ok(plans)
    }

    /// Rename, toggle or re-seed a plan. Supplied meals replace the whole set.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown plan or recipe.
    pub fn update_plan(
        &mut self,
        plan_id: MenuPlanId,
        patch: &PlanPatch,
        now: OffsetDateTime,
    ) -> Result<MenuPlan> {
        let tx = self.write_tx()?;
        let mut plan = load_plan(&tx, plan_id)?;
        if patch.name.is_some() {
            plan.name.clone_from(&patch.name);
        }
        if let Some(is_active) = patch.is_active {
            plan.is_active = is_active;
        }
        plan.updated_at = now;
        tx.execute(
            "UPDATE menu_plans SET name = ?2, is_active = ?3, updated_at = ?4 WHERE plan_id = ?1",
            params![plan_id.to_string(), plan.name, plan.is_active, rfc3339(now)?],
        )
        .context("failed to update menu plan")?;

        if let Some(meals) = &patch.meals {
            tx.execute("DELETE FROM planned_meals WHERE plan_id = ?1", params![plan_id.to_string()])
                .context("failed to clear planned meals")?;
            let mut planned = Vec::with_capacity(meals.len());
            for input in meals {
                planned.push(insert_meal(&tx, plan_id, input)?);
            }
            plan.meals = sorted_meals(planned);
        }
        tx.commit().context("failed to commit menu plan update")?;
        Ok(plan)
    }

    /// Delete a plan and its meals.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown plan.
    pub fn delete_plan(&mut self, plan_id: MenuPlanId) -> Result<()> {
        let tx = self.write_tx()?;
        let id = plan_id.to_string();
        tx.execute("DELETE FROM planned_meals WHERE plan_id = ?1", params![id])
            .context("failed to delete planned meals")?;
        let removed = tx
            .execute("DELETE FROM menu_plans WHERE plan_id = ?1", params![id])
            .context("failed to delete menu plan")?;
        if removed == 0 {
            return Err(not_found(format!("menu plan {plan_id}")));
        }
        tx.commit().context("failed to commit menu plan delete")?;
        info!(%plan_id, "menu plan deleted");
        Ok(())
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown plan or recipe and
    /// [`EngineError::Validation`] for zero planned servings.
    pub fn add_meal(&mut self, plan_id: MenuPlanId, input: &PlannedMealInput) -> Result<PlannedMeal> {
        let tx = self.write_tx()?;
        ensure_plan_exists(&tx, plan_id)?;
        let meal = insert_meal(&tx, plan_id, input)?;
        tx.commit().context("failed to commit planned meal")?;
        Ok(meal)
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] when the meal is not part of the plan.
    pub fn remove_meal(&mut self, plan_id: MenuPlanId, meal_id: PlannedMealId) -> Result<()> {
        let tx = self.write_tx()?;
        let removed = tx
            .execute(
                "DELETE FROM planned_meals WHERE meal_id = ?1 AND plan_id = ?2",
                params![meal_id.to_string(), plan_id.to_string()],
            )
            .context("failed to delete planned meal")?;
        if removed == 0 {
            return Err(not_found(format!("meal {meal_id} in plan {plan_id}")));
        }
        tx.commit().context("failed to commit planned meal delete")?;
        Ok(())
    }

    /// Mark a planned meal cooked, bump the recipe's cooking statistics and
    /// deduct each required ingredient scaled to the planned servings, all in
    /// one transaction. Ingredients without a quantity or a matching inventory
    /// item are skipped.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] when the meal is not part of the plan
    /// and [`EngineError::InvalidState`] when it was already cooked.
    pub fn mark_cooked(
        &mut self,
        plan_id: MenuPlanId,
        meal_id: PlannedMealId,
        actor: UserId,
        now: OffsetDateTime,
    ) -> Result<CookedMeal> {
        let tx = self.write_tx()?;
        let meal = query_one(
            &tx,
            &format!("SELECT {MEAL_COLUMNS} FROM planned_meals WHERE meal_id = ?1 AND plan_id = ?2"),
            params![meal_id.to_string(), plan_id.to_string()],
            read_meal,
        )?;
        let Some(mut meal) = meal else {
            return Err(not_found(format!("meal {meal_id} in plan {plan_id}")));
        };
        if meal.cooked {
            return Err(
                EngineError::InvalidState(format!("meal {meal_id} is already cooked")).into()
            );
        }
        let Some(recipe) = load_recipe(&tx, meal.recipe_id)? else {
            return Err(not_found(format!("recipe {}", meal.recipe_id)));
        };
        let Some(version) = load_version(&tx, recipe.recipe_id, recipe.current_version)? else {
            return Err(anyhow!(
                "recipe {} points at missing version {}",
                recipe.recipe_id,
                recipe.current_version
            ));
        };

        tx.execute(
            "UPDATE planned_meals SET cooked = 1, cooked_date = ?2, cooked_by = ?3
             WHERE meal_id = ?1",
            params![meal_id.to_string(), rfc3339(now)?, actor.to_string()],
        )
        .context("failed to mark meal cooked")?;
        record_cooked(&tx, recipe.recipe_id, now)?;

        let ratio = servings_ratio(meal.servings_planned, version.servings);
        let reason = format!("Used for {}", recipe.title);
        let mut deductions = Vec::new();
        for ingredient in version.required_ingredients() {
            let Some(quantity) = ingredient.quantity else {
                debug!(ingredient = %ingredient.name, "ingredient has no quantity; nothing to deduct");
                continue;
            };
            let Some(item) = find_item_by_name(&tx, &ingredient.name)? else {
                warn!(
                    %meal_id,
                    ingredient = %ingredient.name,
                    "no inventory item matches ingredient; skipping deduction"
                );
                continue;
            };
            let amount = round_quantity(quantity * ratio);
            deductions.push(deduct_in(&tx, &item, amount, &reason, Some(actor), now)?);
        }
        tx.commit().context("failed to commit cooked meal")?;

        meal.cooked = true;
        meal.cooked_date = Some(now);
        meal.cooked_by = Some(actor);
        info!(
            %plan_id,
            %meal_id,
            recipe_id = %recipe.recipe_id,
            deductions = deductions.len(),
            "meal marked cooked"
        );
        Ok(CookedMeal { meal, deductions })
    }

    /// Uncooked meals of a plan resolved to their recipes' current versions,
    /// ready for shopping-list aggregation.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown plan.
    pub fn shopping_inputs(&self, plan_id: MenuPlanId) -> Result<Vec<PlannedCooking>> {
        let plan = load_plan(&self.conn, plan_id)?;
        let mut inputs = Vec::new();
        for meal in plan.meals.into_iter().filter(|meal| !meal.cooked) {
            let Some(recipe) = load_recipe(&self.conn, meal.recipe_id)? else {
                warn!(%plan_id, recipe_id = %meal.recipe_id, "planned recipe no longer exists");
                continue;
            };
            let Some(version) =
                load_version(&self.conn, recipe.recipe_id, recipe.current_version)?
            else {
                return Err(anyhow!(
                    "recipe {} points at missing version {}",
                    recipe.recipe_id,
                    recipe.current_version
                ));
            };
            inputs.push(PlannedCooking {
                recipe_title: recipe.title,
                servings_planned: meal.servings_planned,
                version,
            });
        }
        Ok(inputs)
    }
}

fn read_plan(row: &Row<'_>) -> Result<MenuPlan> {
    Ok(MenuPlan {
        plan_id: parse_id(&row.get::<_, String>(0)?)?,
        week_start_date: parse_date(&row.get::<_, String>(1)?)?,
        name: row.get(2)?,
        created_by: parse_id(&row.get::<_, String>(3)?)?,
        is_active: row.get(4)?,
        created_at: parse_rfc3339(&row.get::<_, String>(5)?)?,
        updated_at: parse_rfc3339(&row.get::<_, String>(6)?)?,
        meals: Vec::new(),
    })
}

fn read_meal(row: &Row<'_>) -> Result<PlannedMeal> {
    Ok(PlannedMeal {
        meal_id: parse_id(&row.get::<_, String>(0)?)?,
        plan_id: parse_id(&row.get::<_, String>(1)?)?,
        recipe_id: parse_id(&row.get::<_, String>(2)?)?,
        meal_date: parse_date(&row.get::<_, String>(3)?)?,
        meal_type: parse_enum(&row.get::<_, String>(4)?, "meal_type", MealType::parse)?,
        servings_planned: row.get(5)?,
        notes: row.get(6)?,
        cooked: row.get(7)?,
        cooked_date: parse_optional_rfc3339(row.get(8)?)?,
        cooked_by: parse_optional_id(row.get(9)?)?,
    })
}

fn load_plan(conn: &Connection, plan_id: MenuPlanId) -> Result<MenuPlan> {
    let plan = query_one(
        conn,
        &format!("SELECT {PLAN_COLUMNS} FROM menu_plans WHERE plan_id = ?1"),
        params![plan_id.to_string()],
        read_plan,
    )?;
    let Some(mut plan) = plan else {
        return Err(not_found(format!("menu plan {plan_id}")));
    };
    plan.meals = load_meals(conn, plan_id)?;
    Ok(plan)
}

fn ensure_plan_exists(conn: &Connection, plan_id: MenuPlanId) -> Result<()> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM menu_plans WHERE plan_id = ?1)",
            params![plan_id.to_string()],
            |row| row.get(0),
        )
        .context("failed to look up menu plan")?;
    if !exists {
        return Err(not_found(format!("menu plan {plan_id}")));
    }
    Ok(())
}

fn load_meals(conn: &Connection, plan_id: MenuPlanId) -> Result<Vec<PlannedMeal>> {
    query_all(
        conn,
        &format!("SELECT {MEAL_COLUMNS} FROM planned_meals WHERE plan_id = ?1 ORDER BY {MEAL_ORDER}"),
        params![plan_id.to_string()],
        read_meal,
    )
}

fn insert_meal(
    conn: &Connection,
    plan_id: MenuPlanId,
    input: &PlannedMealInput,
) -> Result<PlannedMeal> {
    input.validate()?;
    load_live_recipe(conn, input.recipe_id)?;
    let meal = PlannedMeal {
        meal_id: PlannedMealId::new(),
        plan_id,
        recipe_id: input.recipe_id,
        meal_date: input.meal_date,
        meal_type: input.meal_type,
        servings_planned: input.servings_planned,
        notes: input.notes.clone(),
        cooked: false,
        cooked_date: None,
        cooked_by: None,
    };
    conn.execute(
        "INSERT INTO planned_meals(
            meal_id, plan_id, recipe_id, meal_date, meal_type, servings_planned, notes, cooked
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
        params![
            meal.meal_id.to_string(),
            plan_id.to_string(),
            meal.recipe_id.to_string(),
            date_text(meal.meal_date)?,
            meal.meal_type.as_str(),
            meal.servings_planned,
            meal.notes,
        ],
    )
    .context("failed to insert planned meal")?;
    Ok(meal)
}

fn sorted_meals(mut meals: Vec<PlannedMeal>) -> Vec<PlannedMeal> {
    meals.sort_by(|a, b| {
        a.meal_date
            .cmp(&b.meal_date)
            .then_with(|| a.meal_type.cmp(&b.meal_type))
            .then_with(|| a.meal_id.cmp(&b.meal_id))
    });
    meals
}
