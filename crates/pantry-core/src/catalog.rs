use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use crate::ledger::StockIndex;
use crate::rating::{is_favorite, RatingTally};
use crate::recipe::{ListFilter, Recipe, RecipePage, RecipeQuery, RecipeSummary, RecipeVersion};
use crate::Settings;

/// Missing ingredient names reported per availability check.
pub const MAX_MISSING_REPORTED: usize = 3;

/// A live recipe with its current version, tags and rating counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub recipe: Recipe,
    pub version: RecipeVersion,
    pub tags: Vec<String>,
    pub ratings: RatingTally,
}

/// Read-only snapshot consumed by listing and suggestion strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
    pub stock: StockIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Availability {
    pub matched: usize,
    pub total: usize,
    pub fraction: Decimal,
    pub missing: Vec<String>,
}

impl CatalogEntry {
    /// Share of required ingredients present in stock, ignoring quantities.
    ///
    /// Returns `None` for recipes without required ingredients.
    #[must_use]
    pub fn availability(&self, stock: &StockIndex) -> Option<Availability> {
        let mut matched = 0_usize;
        let mut total = 0_usize;
        let mut missing = Vec::new();

        for ingredient in self.version.required_ingredients() {
            total += 1;
            if stock.is_available(&ingredient.name) {
                matched += 1;
            } else if missing.len() < MAX_MISSING_REPORTED {
                missing.push(ingredient.name.clone());
            }
        }

        if total == 0 {
            return None;
        }
        let fraction = Decimal::from(matched) / Decimal::from(total);
        Some(Availability { matched, total, fraction, missing })
    }

    #[must_use]
    pub fn is_never_tried(&self) -> bool {
        self.recipe.times_cooked == 0
    }

    /// Never cooked, or last cooked at least one rotation period ago.
    #[must_use]
    pub fn is_due_for_rotation(&self, today: Date, rotation_period_days: u32) -> bool {
        let cutoff = today.saturating_sub(Duration::days(i64::from(rotation_period_days)));
        self.recipe.last_cooked_date.map_or(true, |cooked| cooked <= cutoff)
    }

    #[must_use]
    pub fn days_since_cooked(&self, today: Date) -> Option<i64> {
        self.recipe.last_cooked_date.map(|cooked| (today - cooked).whole_days())
    }

    #[must_use]
    pub fn summary(&self, settings: &Settings) -> RecipeSummary {
        RecipeSummary {
            recipe_id: self.recipe.recipe_id,
            title: self.recipe.title.clone(),
            description: self.recipe.description.clone(),
            prep_time_minutes: self.version.prep_time_minutes,
            cook_time_minutes: self.version.cook_time_minutes,
            servings: self.version.servings,
            difficulty: self.version.difficulty,
            tags: self.tags.clone(),
            is_favorite: is_favorite(self.ratings, settings),
            times_cooked: self.recipe.times_cooked,
            last_cooked_date: self.recipe.last_cooked_date,
        }
    }

    fn matches_search(&self, needle: &str) -> bool {
        self.recipe.title.to_lowercase().contains(needle)
            || self
                .recipe
                .description
                .as_deref()
                .is_some_and(|description| description.to_lowercase().contains(needle))
    }
}

/// Filters, orders and pages the catalog for recipe browsing.
///
/// Every filter evaluates the current version and the current rating
/// counts. Results are ordered by title.
#[must_use]
pub fn list_recipes(
    catalog: &Catalog,
    query: &RecipeQuery,
    settings: &Settings,
    today: Date,
    min_match_fraction: Decimal,
) -> RecipePage {
    let needle = query
        .search
        .as_deref()
        .map(|search| search.trim().to_lowercase())
        .filter(|search| !search.is_empty());
    let wanted_tags = crate::normalize_tags(&query.tags);

    let mut matching = catalog
        .entries
        .iter()
        .filter(|entry| !entry.recipe.is_deleted)
        .filter(|entry| needle.as_deref().map_or(true, |needle| entry.matches_search(needle)))
        .filter(|entry| wanted_tags.iter().all(|tag| entry.tags.contains(tag)))
        .filter(|entry| {
            query.difficulty.map_or(true, |difficulty| entry.version.difficulty == Some(difficulty))
        })
        .filter(|entry| match query.filter {
            None => true,
            Some(ListFilter::Favorites) => is_favorite(entry.ratings, settings),
            Some(ListFilter::NotRecent) => {
                entry.is_due_for_rotation(today, settings.rotation_period_days)
            }
            Some(ListFilter::NeverTried) => entry.is_never_tried(),
            Some(ListFilter::AvailableInventory) => entry
                .availability(&catalog.stock)
                .is_some_and(|availability| availability.fraction >= min_match_fraction),
        })
        .collect::<Vec<_>>();

    matching.sort_by(|a, b| {
        a.recipe
            .title
            .to_lowercase()
            .cmp(&b.recipe.title.to_lowercase())
            .then_with(|| a.recipe.recipe_id.cmp(&b.recipe.recipe_id))
    });

    let total = matching.len();
    let limit = usize::try_from(query.limit).unwrap_or(usize::MAX);
    let offset = usize::try_from(query.page.saturating_sub(1))
        .unwrap_or(usize::MAX)
        .saturating_mul(limit);
    let items = matching
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|entry| entry.summary(settings))
        .collect();

    RecipePage { items, total, page: query.page, limit: query.limit }
}


#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::fixtures::{cooked, entry, in_stock, ingredient};
    use super::*;
    use crate::Difficulty;

    const TODAY: Date = date!(2026 - 10 - 18);

    fn titles(page: &RecipePage) -> Vec<&str> {
        page.items.iter().map(|item| item.title.as_str()).collect()
    }

    fn list(catalog: &Catalog, query: &RecipeQuery) -> RecipePage {
        list_recipes(catalog, query, &Settings::default(), TODAY, Decimal::new(7, 1))
    }

    #[test]
    fn search_tags_and_difficulty_combine() {
        let mut soup = entry("Tomato Soup");
        soup.recipe.description = Some("A warming bowl".to_string());
        soup.tags = vec!["winter".to_string(), "vegetarian".to_string()];
        let mut salad = entry("Summer Salad");
        salad.tags = vec!["summer".to_string(), "vegetarian".to_string()];
        salad.version.difficulty = Some(Difficulty::Medium);
        let catalog = Catalog { entries: vec![soup, salad], stock: StockIndex::default() };

        let query = RecipeQuery { search: Some("WARMING".to_string()), ..RecipeQuery::default() };
        assert_eq!(titles(&list(&catalog, &query)), vec!["Tomato Soup"]);

        let query = RecipeQuery {
            tags: vec!["Vegetarian".to_string(), "summer".to_string()],
            ..RecipeQuery::default()
        };
        assert_eq!(titles(&list(&catalog, &query)), vec!["Summer Salad"]);

        let query = RecipeQuery { difficulty: Some(Difficulty::Easy), ..RecipeQuery::default() };
        assert_eq!(titles(&list(&catalog, &query)), vec!["Tomato Soup"]);
    }

    #[test]
    fn special_filters_use_current_state() {
        let never = entry("Never");
        let recent = cooked(entry("Recent"), 3, Some(date!(2026 - 10 - 10)));
        let stale = cooked(entry("Stale"), 1, Some(date!(2026 - 10 - 04)));
        let mut loved = cooked(entry("Loved"), 5, Some(date!(2026 - 10 - 17)));
        loved.ratings = RatingTally { up: 3, down: 0 };
        let catalog =
            Catalog { entries: vec![never, recent, stale, loved], stock: StockIndex::default() };

        let query = RecipeQuery { filter: Some(ListFilter::NotRecent), ..RecipeQuery::default() };
        assert_eq!(titles(&list(&catalog, &query)), vec!["Never", "Stale"]);

        let query = RecipeQuery { filter: Some(ListFilter::NeverTried), ..RecipeQuery::default() };
        assert_eq!(titles(&list(&catalog, &query)), vec!["Never"]);

        let query = RecipeQuery { filter: Some(ListFilter::Favorites), ..RecipeQuery::default() };
        let page = list(&catalog, &query);
        assert_eq!(titles(&page), vec!["Loved"]);
        assert!(page.items[0].is_favorite);
    }

    #[test]
    fn available_inventory_filter_uses_match_fraction() {
        let mut pasta = entry("Pasta");
        pasta.version.ingredients = vec![
            ingredient("pasta", false),
            ingredient("Tomato", false),
            ingredient("basil", true),
        ];
        let mut curry = entry("Curry");
        curry.version.ingredients = vec![ingredient("chicken", false), ingredient("rice", false)];
        let stock_items = [in_stock("PASTA"), in_stock("tomato"), in_stock("rice")];
        let catalog = Catalog {
            entries: vec![pasta, curry],
            stock: StockIndex::from_items(stock_items.iter()),
        };

        let query =
            RecipeQuery { filter: Some(ListFilter::AvailableInventory), ..RecipeQuery::default() };
        assert_eq!(titles(&list(&catalog, &query)), vec!["Pasta"]);
    }

    #[test]
    fn pagination_reports_total() {
        let entries = ["C", "A", "B", "D", "E"].iter().map(|title| entry(title)).collect();
        let catalog = Catalog { entries, stock: StockIndex::default() };
        let query = RecipeQuery { page: 2, limit: 2, ..RecipeQuery::default() };
        let page = list(&catalog, &query);
        assert_eq!(page.total, 5);
        assert_eq!(titles(&page), vec!["C", "D"]);
    }

    #[test]
    fn availability_reports_up_to_three_missing() {
        let mut big = entry("Big");
        big.version.ingredients =
            ["a", "b", "c", "d", "e"].iter().map(|name| ingredient(name, false)).collect();
        let stock_items = [in_stock("a")];
        let stock = StockIndex::from_items(stock_items.iter());
        let Some(availability) = big.availability(&stock) else {
            panic!("availability expected for recipe with ingredients");
        };
        assert_eq!(availability.matched, 1);
        assert_eq!(availability.total, 5);
        assert_eq!(availability.missing, vec!["b", "c", "d"]);
        assert_eq!(availability.fraction, Decimal::new(2, 1));
        assert!(entry("Empty").availability(&stock).is_none());
    }
}
