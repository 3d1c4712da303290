use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ledger::{normalize_name, round_quantity, StockIndex};
use crate::menu::servings_ratio;
use crate::{MenuPlanId, RecipeVersion, ShoppingItemId};

const DEFAULT_CATEGORY: &str = "other";

/// One uncooked meal resolved to its recipe's current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCooking {
    pub recipe_title: String,
    pub servings_planned: Option<u32>,
    pub version: RecipeVersion,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregatedIngredient {
    pub name_key: String,
    /// `None` when no contributing ingredient carried a quantity.
    pub quantity: Option<Decimal>,
    pub unit: Option<String>,
    pub category: String,
    pub recipes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShoppingListItem {
    pub item_id: ShoppingItemId,
    pub name: String,
    pub quantity: Option<Decimal>,
    pub unit: Option<String>,
    pub category: String,
    pub needed_for_recipes: Vec<String>,
    pub in_stock: bool,
    pub checked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShoppingList {
    pub menu_plan_id: MenuPlanId,
    pub grouped: bool,
    pub items: Vec<ShoppingListItem>,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

/// Sums scaled, non-optional ingredient quantities across meals keyed by
/// normalized name. Unit and category come from the first occurrence.
#[must_use]
pub fn aggregate_requirements(meals: &[PlannedCooking]) -> Vec<AggregatedIngredient> {
    let mut positions: BTreeMap<String, usize> = BTreeMap::new();
    let mut aggregated: Vec<AggregatedIngredient> = Vec::new();

    for meal in meals {
        let ratio = servings_ratio(meal.servings_planned, meal.version.servings);
        for ingredient in meal.version.required_ingredients() {
            let key = normalize_name(&ingredient.name);
            let scaled = ingredient.quantity.map(|quantity| quantity * ratio);

            let position = *positions.entry(key.clone()).or_insert_with(|| {
                aggregated.push(AggregatedIngredient {
                    name_key: key.clone(),
                    quantity: None,
                    unit: ingredient.unit.clone(),
                    category: ingredient
                        .category
                        .clone()
                        .filter(|category| !category.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
                    recipes: Vec::new(),
                });
                aggregated.len() - 1
            });

            let entry = &mut aggregated[position];
            if let Some(scaled) = scaled {
                entry.quantity = Some(entry.quantity.unwrap_or(Decimal::ZERO) + scaled);
            }
            if !entry.recipes.contains(&meal.recipe_title) {
                entry.recipes.push(meal.recipe_title.clone());
            }
        }
    }

    for entry in &mut aggregated {
        entry.quantity = entry.quantity.map(round_quantity);
    }
    aggregated
}

/// Subtracts on-hand stock from each requirement.
///
/// Fully covered needs are dropped, partially covered ones keep only the
/// deficit and unknown items keep the whole requirement.
#[must_use]
pub fn reconcile_with_stock(
    aggregated: Vec<AggregatedIngredient>,
    stock: &StockIndex,
    grouped: bool,
) -> Vec<ShoppingListItem> {
    let mut items = Vec::with_capacity(aggregated.len());

    for entry in aggregated {
        let required = entry.quantity.unwrap_or(Decimal::ZERO);
        let quantity = match stock.quantity_of(&entry.name_key) {
            Some(on_hand) if on_hand >= required => continue,
            Some(on_hand) => Some(round_quantity(required - on_hand)),
            None => entry.quantity,
        };

        items.push(ShoppingListItem {
            item_id: ShoppingItemId::new(),
            name: display_name(&entry.name_key),
            quantity,
            unit: entry.unit,
            category: entry.category,
            needed_for_recipes: entry.recipes,
            in_stock: false,
            checked: false,
        });
    }

    if grouped {
        items.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
    } else {
        items.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    }
    items
}

fn display_name(name_key: &str) -> String {
    name_key
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::{
        Ingredient, IngredientId, InventoryItem, InventoryItemId, RecipeId, RecipeVersionId,
        StorageLocation, UserId,
    };

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn ingredient(
        name: &str,
        grams: Option<i64>,
        category: Option<&str>,
        optional: bool,
    ) -> Ingredient {
        Ingredient {
            ingredient_id: IngredientId::new(),
            name: name.to_string(),
            quantity: grams.map(Decimal::from),
            unit: Some("g".to_string()),
            category: category.map(str::to_string),
            is_optional: optional,
            display_order: 0,
        }
    }

    fn version(servings: u32, ingredients: Vec<Ingredient>) -> RecipeVersion {
        RecipeVersion {
            version_id: RecipeVersionId::new(),
            recipe_id: RecipeId::new(),
            version_number: 1,
            prep_time_minutes: None,
            cook_time_minutes: None,
            servings: Some(servings),
            difficulty: None,
            instructions: "Cook.".to_string(),
            change_description: None,
            modified_by: UserId::new(),
            content_digest: String::new(),
            created_at: fixture_time(),
            ingredients,
        }
    }

    fn meal(title: &str, servings_planned: Option<u32>, version: RecipeVersion) -> PlannedCooking {
        PlannedCooking { recipe_title: title.to_string(), servings_planned, version }
    }

    fn stock(name: &str, grams: i64) -> InventoryItem {
        InventoryItem {
            item_id: InventoryItemId::new(),
            item_name: name.to_string(),
            quantity: Decimal::from(grams),
            unit: Some("g".to_string()),
            category: None,
            location: Some(StorageLocation::Pantry),
            minimum_stock: Decimal::ZERO,
            expiration_date: None,
            notes: None,
            created_by: None,
            created_at: fixture_time(),
            updated_at: fixture_time(),
        }
    }

    fn rice_meal(title: &str) -> PlannedCooking {
        meal(title, Some(4), version(4, vec![ingredient("rice", Some(200), Some("grains"), false)]))
    }

    #[test]
    fn partial_stock_leaves_only_the_deficit() {
        let rice = stock("Rice", 100);
        let index = StockIndex::from_items([&rice]);
        let items = reconcile_with_stock(aggregate_requirements(&[rice_meal("Fried Rice")]), &index, true);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Rice");
        assert_eq!(items[0].quantity, Some(Decimal::from(100)));
        assert!(!items[0].in_stock);
        assert!(!items[0].checked);
    }

    #[test]
    fn covered_need_is_omitted() {
        let rice = stock("rice", 500);
        let index = StockIndex::from_items([&rice]);
        let items = reconcile_with_stock(aggregate_requirements(&[rice_meal("Fried Rice")]), &index, true);
        assert!(items.is_empty());
    }

    #[test]
    fn same_recipe_twice_aggregates_into_one_line() {
        let meals = [rice_meal("Fried Rice"), rice_meal("Fried Rice")];
        let items = reconcile_with_stock(aggregate_requirements(&meals), &StockIndex::default(), false);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, Some(Decimal::from(400)));
        assert_eq!(items[0].needed_for_recipes, vec!["Fried Rice".to_string()]);
    }

    #[test]
    fn scaling_and_optional_ingredients() {
        let doubled = meal(
            "Curry",
            Some(4),
            version(
                2,
                vec![
                    ingredient("Chicken ", Some(300), Some("meat"), false),
                    ingredient("cilantro", Some(10), Some("produce"), true),
                ],
            ),
        );
        let aggregated = aggregate_requirements(&[doubled]);
        assert_eq!(aggregated.len(), 1);
        assert_eq!(aggregated[0].name_key, "chicken");
        assert_eq!(aggregated[0].quantity, Some(Decimal::from(600)));
    }

    #[test]
    fn first_seen_unit_and_category_win() {
        let first = meal("A", None, version(1, vec![ingredient("salt", None, None, false)]));
        let mut second_ingredient = ingredient("SALT", Some(5), Some("spices"), false);
        second_ingredient.unit = Some("tsp".to_string());
        let second = meal("B", None, version(1, vec![second_ingredient]));
        let aggregated = aggregate_requirements(&[first, second]);
        assert_eq!(aggregated.len(), 1);
        assert_eq!(aggregated[0].unit.as_deref(), Some("g"));
        assert_eq!(aggregated[0].category, "other");
        assert_eq!(aggregated[0].quantity, Some(Decimal::from(5)));
        assert_eq!(aggregated[0].recipes, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn grouped_sort_orders_by_category_then_name() {
        let meals = [meal(
            "Stew",
            None,
            version(
                1,
                vec![
                    ingredient("apple", Some(1), Some("produce"), false),
                    ingredient("beef", Some(500), Some("meat"), false),
                    ingredient("carrot", Some(2), Some("produce"), false),
                ],
            ),
        )];
        let grouped = reconcile_with_stock(aggregate_requirements(&meals), &StockIndex::default(), true);
        let names = grouped.iter().map(|item| item.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Beef", "Apple", "Carrot"]);

        let flat = reconcile_with_stock(aggregate_requirements(&meals), &StockIndex::default(), false);
        let names = flat.iter().map(|item| item.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Apple", "Beef", "Carrot"]);
    }

    #[test]
    fn display_name_capitalizes_each_word() {
        assert_eq!(display_name("green onion"), "Green Onion");
        assert_eq!(display_name("rice"), "Rice");
    }
}
