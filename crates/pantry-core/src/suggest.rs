use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, Month};

use crate::catalog::{Catalog, CatalogEntry};
use crate::rating::is_favorite;
use crate::{RecipeId, Settings};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Rotation,
    Favorites,
    NeverTried,
    AvailableInventory,
    Seasonal,
    QuickMeals,
    Balanced,
}

impl Strategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rotation => "rotation",
            Self::Favorites => "favorites",
            Self::NeverTried => "never_tried",
            Self::AvailableInventory => "available_inventory",
            Self::Seasonal => "seasonal",
            Self::QuickMeals => "quick_meals",
            Self::Balanced => "balanced",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rotation" => Some(Self::Rotation),
            "favorites" => Some(Self::Favorites),
            "never_tried" => Some(Self::NeverTried),
            "available_inventory" => Some(Self::AvailableInventory),
            "seasonal" => Some(Self::Seasonal),
            "quick_meals" => Some(Self::QuickMeals),
            "balanced" => Some(Self::Balanced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl Season {
    #[must_use]
    pub fn for_month(month: Month) -> Self {
        match month {
            Month::March | Month::April | Month::May => Self::Spring,
            Month::June | Month::July | Month::August => Self::Summer,
            Month::September | Month::October | Month::November => Self::Fall,
            Month::December | Month::January | Month::February => Self::Winter,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spring => "spring",
            Self::Summer => "summer",
            Self::Fall => "fall",
            Self::Winter => "winter",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuggestionOptions {
    pub min_match_fraction: Decimal,
    pub max_total_minutes: u32,
}

impl Default for SuggestionOptions {
    fn default() -> Self {
        Self { min_match_fraction: Decimal::new(7, 1), max_total_minutes: 30 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuggestionMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times_cooked: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cooked_date: Option<Date>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_since_cooked: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_percent: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_ingredients: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ingredients: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_ingredients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<Season>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prep_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cook_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Suggestion {
    pub recipe_id: RecipeId,
    pub title: String,
    pub description: Option<String>,
    pub reason: String,
    pub strategy: Strategy,
    #[serde(flatten)]
    pub metrics: SuggestionMetrics,
}

impl Suggestion {
    fn new(
        entry: &CatalogEntry,
        strategy: Strategy,
        reason: String,
        metrics: SuggestionMetrics,
    ) -> Self {
        Self {
            recipe_id: entry.recipe.recipe_id,
            title: entry.recipe.title.clone(),
            description: entry.recipe.description.clone(),
            reason,
            strategy,
            metrics,
        }
    }
}

/// Ranks live catalog entries with one strategy. Never fails; an empty
/// catalog yields an empty list.
#[must_use]
pub fn suggest(
    strategy: Strategy,
    catalog: &Catalog,
    settings: &Settings,
    today: Date,
    limit: usize,
    options: &SuggestionOptions,
) -> Vec<Suggestion> {
    let live = catalog.entries.iter().filter(|entry| !entry.recipe.is_deleted);
    let mut suggestions = match strategy {
        Strategy::Rotation => rotation(live, today),
        Strategy::Favorites => favorites(live),
        Strategy::NeverTried => never_tried(live),
        Strategy::AvailableInventory => available_inventory(live, catalog, options),
        Strategy::Seasonal => seasonal(live, today),
        Strategy::QuickMeals => quick_meals(live, options),
        Strategy::Balanced => balanced(live, settings, today),
    };
    suggestions.truncate(limit);
    suggestions
}

fn by_title(a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
    a.recipe.title.cmp(&b.recipe.title)
}

fn rotation<'a>(entries: impl Iterator<Item = &'a CatalogEntry>, today: Date) -> Vec<Suggestion> {
    let mut ranked = entries.collect::<Vec<_>>();
    ranked.sort_by(|a, b| {
        // `None` sorts first, which keeps never-cooked recipes on top.
        a.recipe
            .last_cooked_date
            .cmp(&b.recipe.last_cooked_date)
            .then_with(|| a.recipe.times_cooked.cmp(&b.recipe.times_cooked))
            .then_with(|| by_title(a, b))
    });

    ranked
        .into_iter()
        .map(|entry| {
            let days_since_cooked = entry.days_since_cooked(today);
            let reason = match days_since_cooked {
                _ if entry.is_never_tried() => "Never tried before".to_string(),
                Some(days) if days > 0 => format!("Not cooked in {days} days"),
                _ => "Due for rotation".to_string(),
            };
            Suggestion::new(
                entry,
                Strategy::Rotation,
                reason,
                SuggestionMetrics {
                    times_cooked: Some(entry.recipe.times_cooked),
                    last_cooked_date: entry.recipe.last_cooked_date,
                    days_since_cooked,
                    ..SuggestionMetrics::default()
                },
            )
        })
        .collect()
}

fn favorites<'a>(entries: impl Iterator<Item = &'a CatalogEntry>) -> Vec<Suggestion> {
    let mut ranked = entries
        .filter_map(|entry| entry.ratings.approval().map(|approval| (entry, approval)))
        .collect::<Vec<_>>();
    ranked.sort_by(|(a, a_approval), (b, b_approval)| {
        b_approval
            .cmp(a_approval)
            .then_with(|| b.ratings.total().cmp(&a.ratings.total()))
            .then_with(|| by_title(a, b))
    });

    ranked
        .into_iter()
        .map(|(entry, approval)| {
            let count = entry.ratings.total();
            Suggestion::new(
                entry,
                Strategy::Favorites,
                format!(
                    "Household favorite ({} of {count} thumbs up)",
                    entry.ratings.up
                ),
                SuggestionMetrics {
                    average_rating: Some(approval.round_dp(2)),
                    rating_count: Some(count),
                    ..SuggestionMetrics::default()
                },
            )
        })
        .collect()
}

fn never_tried<'a>(entries: impl Iterator<Item = &'a CatalogEntry>) -> Vec<Suggestion> {
    let mut ranked = entries.filter(|entry| entry.is_never_tried()).collect::<Vec<_>>();
    ranked.sort_by(|a, b| {
        b.recipe.created_at.cmp(&a.recipe.created_at).then_with(|| by_title(a, b))
    });

    ranked
        .into_iter()
        .map(|entry| {
            Suggestion::new(
                entry,
                Strategy::NeverTried,
                "Never tried - give it a try!".to_string(),
                SuggestionMetrics { times_cooked: Some(0), ..SuggestionMetrics::default() },
            )
        })
        .collect()
}

fn available_inventory<'a>(
    entries: impl Iterator<Item = &'a CatalogEntry>,
    catalog: &Catalog,
    options: &SuggestionOptions,
) -> Vec<Suggestion> {
    let mut ranked = entries
        .filter_map(|entry| {
            let availability = entry.availability(&catalog.stock)?;
            (availability.fraction >= options.min_match_fraction).then_some((entry, availability))
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|(a, a_avail), (b, b_avail)| {
        b_avail.fraction.cmp(&a_avail.fraction).then_with(|| by_title(a, b))
    });

    ranked
        .into_iter()
        .map(|(entry, availability)| {
            let percent = availability.fraction * Decimal::ONE_HUNDRED;
            Suggestion::new(
                entry,
                Strategy::AvailableInventory,
                format!("{}% ingredients available", percent.round_dp(0).normalize()),
                SuggestionMetrics {
                    match_percent: Some(percent.round_dp(1).normalize()),
                    matched_ingredients: Some(availability.matched),
                    total_ingredients: Some(availability.total),
                    missing_ingredients: availability.missing,
                    ..SuggestionMetrics::default()
                },
            )
        })
        .collect()
}

fn seasonal<'a>(entries: impl Iterator<Item = &'a CatalogEntry>, today: Date) -> Vec<Suggestion> {
    let season = Season::for_month(today.month());
    let mut ranked = entries
        .filter(|entry| {
            entry.tags.iter().any(|tag| tag.to_lowercase().contains(season.as_str()))
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| by_title(a, b));

    ranked
        .into_iter()
        .map(|entry| {
            Suggestion::new(
                entry,
                Strategy::Seasonal,
                format!("Perfect for {}!", season.as_str()),
                SuggestionMetrics { season: Some(season), ..SuggestionMetrics::default() },
            )
        })
        .collect()
}

fn quick_meals<'a>(
    entries: impl Iterator<Item = &'a CatalogEntry>,
    options: &SuggestionOptions,
) -> Vec<Suggestion> {
    let mut ranked = entries
        .filter(|entry| {
            let total = entry.version.total_time_minutes();
            total > 0 && total <= options.max_total_minutes
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| {
        a.version
            .total_time_minutes()
            .cmp(&b.version.total_time_minutes())
            .then_with(|| by_title(a, b))
    });

    ranked
        .into_iter()
        .map(|entry| {
            let total = entry.version.total_time_minutes();
            Suggestion::new(
                entry,
                Strategy::QuickMeals,
                format!("Ready in {total} minutes"),
                SuggestionMetrics {
                    prep_time_minutes: Some(entry.version.prep_time_minutes.unwrap_or(0)),
                    cook_time_minutes: Some(entry.version.cook_time_minutes.unwrap_or(0)),
                    total_time_minutes: Some(total),
                    ..SuggestionMetrics::default()
                },
            )
        })
        .collect()
}

fn balanced<'a>(
    entries: impl Iterator<Item = &'a CatalogEntry>,
    settings: &Settings,
    today: Date,
) -> Vec<Suggestion> {
    let mut scored = entries
        .filter_map(|entry| {
            let mut score = 0_u32;
            let mut signals = Vec::new();
            if entry.is_due_for_rotation(today, settings.rotation_period_days) {
                score += 3;
                signals.push("not_cooked_recently".to_string());
            }
            if is_favorite(entry.ratings, settings) {
                score += 2;
                signals.push("household_favorite".to_string());
            }
            if entry.is_never_tried() {
                score += 1;
                signals.push("never_tried".to_string());
            }
            (score > 0).then_some((entry, score, signals))
        })
        .collect::<Vec<_>>();
    scored.sort_by(|(a, a_score, _), (b, b_score, _)| {
        b_score.cmp(a_score).then_with(|| by_title(a, b))
    });

    scored
        .into_iter()
        .map(|(entry, score, signals)| {
            Suggestion::new(
                entry,
                Strategy::Balanced,
                format!("Scored {score} ({})", signals.join(", ")),
                SuggestionMetrics {
                    score: Some(score),
                    signals,
                    ..SuggestionMetrics::default()
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use time::macros::date;
    use time::Duration;

    use super::*;
    use crate::catalog::fixtures::{cooked, entry, fixture_time, in_stock, ingredient};
    use crate::{RatingTally, StockIndex};

    const TODAY: Date = date!(2026 - 10 - 18);

    fn titles(suggestions: &[Suggestion]) -> Vec<&str> {
        suggestions.iter().map(|suggestion| suggestion.title.as_str()).collect()
    }

    fn run(strategy: Strategy, catalog: &Catalog) -> Vec<Suggestion> {
        suggest(strategy, catalog, &Settings::default(), TODAY, 10, &SuggestionOptions::default())
    }

    fn catalog(entries: Vec<CatalogEntry>) -> Catalog {
        Catalog { entries, stock: StockIndex::default() }
    }

    #[test]
    fn rotation_puts_never_cooked_first_then_oldest() {
        let a = entry("A");
        let b = cooked(entry("B"), 1, Some(TODAY - Duration::days(10)));
        let c = cooked(entry("C"), 1, Some(TODAY - Duration::days(60)));
        let suggestions = run(Strategy::Rotation, &catalog(vec![b, c, a]));
        assert_eq!(titles(&suggestions), vec!["A", "C", "B"]);
        assert_eq!(suggestions[0].reason, "Never tried before");
        assert_eq!(suggestions[1].reason, "Not cooked in 60 days");
        assert_eq!(suggestions[1].metrics.days_since_cooked, Some(60));
    }

    #[test]
    fn rotation_breaks_date_ties_by_times_cooked_then_title() {
        let day = Some(TODAY - Duration::days(20));
        let often = cooked(entry("Often"), 9, day);
        let rarely = cooked(entry("Rarely"), 2, day);
        let also_rare = cooked(entry("Also Rare"), 2, day);
        let suggestions = run(Strategy::Rotation, &catalog(vec![often, rarely, also_rare]));
        assert_eq!(titles(&suggestions), vec!["Also Rare", "Rarely", "Often"]);
    }

    #[test]
    fn favorites_rank_by_approval_then_count() {
        let mut small = entry("Small");
        small.ratings = RatingTally { up: 1, down: 0 };
        let mut large = entry("Large");
        large.ratings = RatingTally { up: 4, down: 0 };
        let mut mixed = entry("Mixed");
        mixed.ratings = RatingTally { up: 1, down: 1 };
        let unrated = entry("Unrated");
        let suggestions = run(Strategy::Favorites, &catalog(vec![small, mixed, unrated, large]));
        assert_eq!(titles(&suggestions), vec!["Large", "Small", "Mixed"]);
        assert_eq!(suggestions[2].metrics.average_rating, Some(Decimal::new(50, 2)));
        assert_eq!(suggestions[0].metrics.rating_count, Some(4));
    }

    #[test]
    fn never_tried_lists_newest_first() {
        let mut old = entry("Old");
        old.recipe.created_at = fixture_time();
        let mut new = entry("New");
        new.recipe.created_at = fixture_time() + Duration::days(3);
        let tried = cooked(entry("Tried"), 1, Some(TODAY));
        let suggestions = run(Strategy::NeverTried, &catalog(vec![old, tried, new]));
        assert_eq!(titles(&suggestions), vec!["New", "Old"]);
    }

    #[test]
    fn available_inventory_requires_threshold_and_reports_missing() {
        let mut full = entry("Full");
        full.version.ingredients = vec![ingredient("rice", false), ingredient("egg", false)];
        let mut mostly = entry("Mostly");
        mostly.version.ingredients = vec![
            ingredient("rice", false),
            ingredient("egg", false),
            ingredient("Soy Sauce", false),
            ingredient("scallion", true),
        ];
        let mut sparse = entry("Sparse");
        sparse.version.ingredients = vec![ingredient("rice", false), ingredient("lamb", false)];
        let stock_items = [in_stock("Rice"), in_stock("egg ")];
        let catalog = Catalog {
            entries: vec![sparse, mostly, full],
            stock: StockIndex::from_items(stock_items.iter()),
        };
        let options = SuggestionOptions {
            min_match_fraction: Decimal::new(6, 1),
            ..SuggestionOptions::default()
        };
        let suggestions = suggest(
            Strategy::AvailableInventory,
            &catalog,
            &Settings::default(),
            TODAY,
            10,
            &options,
        );
        assert_eq!(titles(&suggestions), vec!["Full", "Mostly"]);
        assert_eq!(suggestions[0].reason, "100% ingredients available");
        assert_eq!(suggestions[1].metrics.missing_ingredients, vec!["Soy Sauce".to_string()]);
        assert_eq!(suggestions[1].metrics.matched_ingredients, Some(2));
        assert_eq!(suggestions[1].metrics.total_ingredients, Some(3));

        let default_threshold = run(Strategy::AvailableInventory, &catalog);
        assert_eq!(titles(&default_threshold), vec!["Full"]);
    }

    #[test]
    fn seasonal_matches_tag_substrings() {
        let mut stew = entry("Stew");
        stew.tags = vec!["fall-favorite".to_string()];
        let mut salad = entry("Salad");
        salad.tags = vec!["summer".to_string()];
        let suggestions = run(Strategy::Seasonal, &catalog(vec![salad, stew]));
        assert_eq!(titles(&suggestions), vec!["Stew"]);
        assert_eq!(suggestions[0].metrics.season, Some(Season::Fall));
        assert_eq!(Season::for_month(Month::January), Season::Winter);
        assert_eq!(Season::for_month(Month::April), Season::Spring);
    }

    #[test]
    fn quick_meals_skip_untimed_and_slow_recipes() {
        let mut fast = entry("Fast");
        fast.version.prep_time_minutes = Some(5);
        fast.version.cook_time_minutes = Some(5);
        let mut medium = entry("Medium");
        medium.version.cook_time_minutes = Some(30);
        let mut slow = entry("Slow");
        slow.version.prep_time_minutes = Some(20);
        slow.version.cook_time_minutes = Some(40);
        let untimed = entry("Untimed");
        let suggestions = run(Strategy::QuickMeals, &catalog(vec![slow, medium, untimed, fast]));
        assert_eq!(titles(&suggestions), vec!["Fast", "Medium"]);
        assert_eq!(suggestions[0].metrics.total_time_minutes, Some(10));
    }

    #[test]
    fn balanced_scores_rotation_favorites_and_novelty() {
        let fresh = entry("Fresh");
        let mut loved_stale = cooked(entry("Loved Stale"), 4, Some(TODAY - Duration::days(30)));
        loved_stale.ratings = RatingTally { up: 3, down: 0 };
        let recent = cooked(entry("Recent"), 2, Some(TODAY - Duration::days(2)));
        let suggestions = run(Strategy::Balanced, &catalog(vec![recent, fresh, loved_stale]));
        assert_eq!(titles(&suggestions), vec!["Loved Stale", "Fresh"]);
        assert_eq!(suggestions[0].metrics.score, Some(5));
        assert_eq!(suggestions[1].metrics.score, Some(4));
    }

    #[test]
    fn limit_caps_results_and_empty_catalog_is_empty() {
        let entries = ["A", "B", "C"].iter().map(|title| entry(title)).collect();
        let suggestions = suggest(
            Strategy::Rotation,
            &catalog(entries),
            &Settings::default(),
            TODAY,
            2,
            &SuggestionOptions::default(),
        );
        assert_eq!(suggestions.len(), 2);
        assert!(run(Strategy::Seasonal, &Catalog::default()).is_empty());
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!(Strategy::parse("quick_meals"), Some(Strategy::QuickMeals));
        assert_eq!(Strategy::parse("mystery"), None);
        assert_eq!(Strategy::AvailableInventory.as_str(), "available_inventory");
    }
}
