use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};

use crate::{require_text, EngineError, HistoryEntryId, InventoryItemId, UserId};

/// Decimal places kept for stored and computed quantities.
pub const QUANTITY_SCALE: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Purchased,
    Used,
    Expired,
    Adjusted,
    AutoDeducted,
}

impl ChangeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purchased => "purchased",
            Self::Used => "used",
            Self::Expired => "expired",
            Self::Adjusted => "adjusted",
            Self::AutoDeducted => "auto_deducted",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "purchased" => Some(Self::Purchased),
            "used" => Some(Self::Used),
            "expired" => Some(Self::Expired),
            "adjusted" => Some(Self::Adjusted),
            "auto_deducted" => Some(Self::AutoDeducted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    Pantry,
    Fridge,
    Freezer,
    Other,
}

impl StorageLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pantry => "pantry",
            Self::Fridge => "fridge",
            Self::Freezer => "freezer",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pantry" => Some(Self::Pantry),
            "fridge" => Some(Self::Fridge),
            "freezer" => Some(Self::Freezer),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryItem {
    pub item_id: InventoryItemId,
    pub item_name: String,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub location: Option<StorageLocation>,
    pub minimum_stock: Decimal,
    pub expiration_date: Option<Date>,
    pub notes: Option<String>,
    pub created_by: Option<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl InventoryItem {
    #[must_use]
    pub fn name_key(&self) -> String {
        normalize_name(&self.item_name)
    }

    #[must_use]
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.minimum_stock
    }

    #[must_use]
    pub fn days_until_expiration(&self, today: Date) -> Option<i64> {
        self.expiration_date.map(|expiration| (expiration - today).whole_days())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewInventoryItem {
    pub item_name: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<StorageLocation>,
    #[serde(default)]
    pub minimum_stock: Decimal,
    #[serde(default)]
    pub expiration_date: Option<Date>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewInventoryItem {
    /// # Errors
    /// Returns [`EngineError::Validation`] for a blank name or negative quantities.
    pub fn validate(&self) -> Result<(), EngineError> {
        require_text("item_name", &self.item_name)?;
        require_non_negative("quantity", self.quantity)?;
        require_non_negative("minimum_stock", self.minimum_stock)
    }
}

/// Partial edit; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryPatch {
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<StorageLocation>,
    #[serde(default)]
    pub minimum_stock: Option<Decimal>,
    #[serde(default)]
    pub expiration_date: Option<Date>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl InventoryPatch {
    /// # Errors
    /// Returns [`EngineError::Validation`] for a blank name or negative quantities.
    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(name) = &self.item_name {
            require_text("item_name", name)?;
        }
        if let Some(quantity) = self.quantity {
            require_non_negative("quantity", quantity)?;
        }
        if let Some(minimum_stock) = self.minimum_stock {
            require_non_negative("minimum_stock", minimum_stock)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub entry_id: HistoryEntryId,
    pub item_id: InventoryItemId,
    pub change_type: ChangeType,
    pub quantity_before: Decimal,
    pub quantity_after: Decimal,
    pub reason: Option<String>,
    pub changed_by: Option<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub changed_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpiringItem {
    #[serde(flatten)]
    pub item: InventoryItem,
    pub days_until: i64,
}

/// Ingredient and inventory names match on their trimmed, lowercased form.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[must_use]
pub fn round_quantity(quantity: Decimal) -> Decimal {
    quantity.round_dp(QUANTITY_SCALE).normalize()
}

/// Quantity left after removing `amount`, floored at zero.
#[must_use]
pub fn clamp_deduction(current: Decimal, amount: Decimal) -> Decimal {
    round_quantity((current - amount).max(Decimal::ZERO))
}

/// Replays history rows in chronological order from a zero baseline.
///
/// # Errors
/// Returns [`EngineError::InvalidState`] when a row's `quantity_before` does not
/// continue from the previous row's `quantity_after`.
pub fn replay_history(entries: &[HistoryEntry]) -> Result<Decimal, EngineError> {
    let mut running = Decimal::ZERO;
    for entry in entries {
        if entry.quantity_before != running {
            return Err(EngineError::InvalidState(format!(
                "ledger chain broken at entry {}: expected quantity_before {running}, found {}",
                entry.entry_id, entry.quantity_before
            )));
        }
        running = entry.quantity_after;
    }
    Ok(running)
}

/// Items expiring on or before `today + within_days`, soonest first.
#[must_use]
pub fn expiring_items(
    items: Vec<InventoryItem>,
    today: Date,
    within_days: u32,
) -> Vec<ExpiringItem> {
    let cutoff = today.saturating_add(Duration::days(i64::from(within_days)));
    let mut out = items
        .into_iter()
        .filter_map(|item| {
            let expiration = item.expiration_date?;
            if expiration > cutoff {
                return None;
            }
            let days_until = (expiration - today).whole_days();
            Some(ExpiringItem { item, days_until })
        })
        .collect::<Vec<_>>();
    out.sort_by(|a, b| {
        a.item
            .expiration_date
            .cmp(&b.item.expiration_date)
            .then_with(|| a.item.item_name.cmp(&b.item.item_name))
    });
    out
}

/// Name-keyed view of inventory used by shopping reconciliation and
/// availability matching.
///
/// When several items share a name, the first one supplied wins for
/// quantity lookups, so callers pass items in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockIndex {
    first_by_name: BTreeMap<String, (InventoryItemId, Decimal)>,
    available: BTreeSet<String>,
}

impl StockIndex {
    #[must_use]
    pub fn from_items<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = &'a InventoryItem>,
    {
        let mut index = Self::default();
        for item in items {
            let key = item.name_key();
            if item.quantity > Decimal::ZERO {
                index.available.insert(key.clone());
            }
            index.first_by_name.entry(key).or_insert((item.item_id, item.quantity));
        }
        index
    }

    #[must_use]
    pub fn quantity_of(&self, name: &str) -> Option<Decimal> {
        self.first_by_name.get(&normalize_name(name)).map(|(_, quantity)| *quantity)
    }

    /// True when any item with this name holds a positive quantity.
    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.available.contains(&normalize_name(name))
    }
}

fn require_non_negative(field: &str, value: Decimal) -> Result<(), EngineError> {
    if value < Decimal::ZERO {
        return Err(EngineError::Validation(format!("{field} must be zero or greater")));
    }
    Ok(())
}
