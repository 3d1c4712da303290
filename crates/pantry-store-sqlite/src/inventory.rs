use anyhow::{Context, Result};
use pantry_core::{
    clamp_deduction, expiring_items, normalize_name, replay_history, round_quantity, ChangeType,
    Deduction, EngineError, ExpiringItem, HistoryEntry, HistoryEntryId, InventoryItem,
    InventoryItemId, InventoryPatch, NewInventoryItem, StockIndex, StorageLocation, UserId,
};
use rust_decimal::Decimal;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tracing::{debug, info};

use crate::{
    decimal_text, not_found, optional_date_text, parse_decimal, parse_enum, parse_id,
    parse_optional_date, parse_optional_id, parse_rfc3339, query_all, query_one, rfc3339,
    SqliteStore,
};

const ITEM_COLUMNS: &str = "item_id, item_name, quantity, unit, category, location, minimum_stock,
    expiration_date, notes, created_by, created_at, updated_at";

const HISTORY_COLUMNS: &str = "entry_id, item_id, change_type, quantity_before, quantity_after,
    reason, changed_by, changed_at";

const INITIAL_INVENTORY: &str = "Initial inventory";
const MANUAL_ADJUSTMENT: &str = "Manual adjustment";
const SHOPPING_PURCHASE: &str = "Shopping list purchase";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemFilter {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<StorageLocation>,
    #[serde(default)]
    pub low_stock_only: bool,
}

/// One ledger row about to be appended.
struct LedgerChange<'a> {
    change_type: ChangeType,
    quantity_before: Decimal,
    quantity_after: Decimal,
    reason: Option<&'a str>,
    changed_by: Option<UserId>,
}

impl SqliteStore {
    /// Create an item and its opening `purchased` ledger row.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] for a blank name or negative quantities.
    pub fn create_item(
        &mut self,
        new: &NewInventoryItem,
        actor: UserId,
        now: OffsetDateTime,
    ) -> Result<InventoryItem> {
        new.validate()?;
        let tx = self.write_tx()?;
        let item = insert_item(&tx, new, Some(actor), now)?;
        append_history(
            &tx,
            item.item_id,
            &LedgerChange {
                change_type: ChangeType::Purchased,
                quantity_before: Decimal::ZERO,
                quantity_after: item.quantity,
                reason: Some(INITIAL_INVENTORY),
                changed_by: Some(actor),
            },
            now,
        )?;
        tx.commit().context("failed to commit inventory item")?;

        info!(
            item_id = %item.item_id,
            item_name = %item.item_name,
            quantity = %item.quantity,
            "inventory item created"
        );
        Ok(item)
    }

    /// # Errors
    /// Returns an error when the item row cannot be read.
    pub fn get_item(&self, item_id: InventoryItemId) -> Result<Option<InventoryItem>> {
        load_item(&self.conn, item_id)
    }

    /// Items matching `filter`, ordered by name.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_items(&self, filter: &ItemFilter) -> Result<Vec<InventoryItem>> {
        let items = query_all(
            &self.conn,
            &format!(
                "SELECT {ITEM_COLUMNS} FROM inventory_items
                 WHERE (?1 IS NULL OR category = ?1) AND (?2 IS NULL OR location = ?2)
                 ORDER BY name_key ASC, created_at ASC, item_id ASC"
            ),
            params![filter.category, filter.location.map(StorageLocation::as_str)],
            read_item,
        )?;
        if filter.low_stock_only {
            return Ok(items.into_iter().filter(InventoryItem::is_low_stock).collect());
        }
        Ok(items)
    }

    /// Apply a partial edit. A quantity change goes through the ledger as a
    /// manual adjustment.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown item and
    /// [`EngineError::Validation`] for an invalid patch.
    pub fn update_item(
        &mut self,
        item_id: InventoryItemId,
        patch: &InventoryPatch,
        actor: UserId,
        now: OffsetDateTime,
    ) -> Result<InventoryItem> {
        patch.validate()?;
        let tx = self.write_tx()?;
        let Some(mut item) = load_item(&tx, item_id)? else {
            return Err(not_found(format!("inventory item {item_id}")));
        };

        if let Some(name) = &patch.item_name {
            item.item_name = name.trim().to_string();
        }
        if patch.unit.is_some() {
            item.unit.clone_from(&patch.unit);
        }
        if patch.category.is_some() {
            item.category.clone_from(&patch.category);
        }
        if patch.location.is_some() {
            item.location = patch.location;
        }
        if let Some(minimum_stock) = patch.minimum_stock {
            item.minimum_stock = round_quantity(minimum_stock);
        }
        if patch.expiration_date.is_some() {
            item.expiration_date = patch.expiration_date;
        }
        if patch.notes.is_some() {
            item.notes.clone_from(&patch.notes);
        }
        item.updated_at = now;

        tx.execute(
            "UPDATE inventory_items SET item_name = ?2, name_key = ?3, unit = ?4, category = ?5,
                location = ?6, minimum_stock = ?7, expiration_date = ?8, notes = ?9, updated_at = ?10
             WHERE item_id = ?1",
            params![
                item_id.to_string(),
                item.item_name,
                item.name_key(),
                item.unit,
                item.category,
                item.location.map(StorageLocation::as_str),
                decimal_text(item.minimum_stock),
                optional_date_text(item.expiration_date)?,
                item.notes,
                rfc3339(now)?,
            ],
        )
        .context("failed to update inventory item")?;

        if let Some(quantity) = patch.quantity {
            adjust_in(&tx, &mut item, quantity, actor, now)?;
        }
        tx.commit().context("failed to commit inventory update")?;
        Ok(item)
    }

    /// Set an item's quantity, writing an `adjusted` ledger row when it changes.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown item and
    /// [`EngineError::Validation`] for a negative quantity.
    pub fn adjust_quantity(
        &mut self,
        item_id: InventoryItemId,
        quantity: Decimal,
        actor: UserId,
        now: OffsetDateTime,
    ) -> Result<InventoryItem> {
        if quantity < Decimal::ZERO {
            return Err(EngineError::Validation("quantity must not be negative".to_string()).into());
        }
        let tx = self.write_tx()?;
        let Some(mut item) = load_item(&tx, item_id)? else {
            return Err(not_found(format!("inventory item {item_id}")));
        };
        adjust_in(&tx, &mut item, quantity, actor, now)?;
        tx.commit().context("failed to commit quantity adjustment")?;
        Ok(item)
    }

    /// Remove up to `amount` from an item, flooring at zero. Returns `false`
    /// when the item does not exist.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] for a negative amount.
    pub fn deduct(
        &mut self,
        item_id: InventoryItemId,
        amount: Decimal,
        reason: &str,
        actor: Option<UserId>,
        now: OffsetDateTime,
    ) -> Result<bool> {
        if amount < Decimal::ZERO {
            return Err(EngineError::Validation("deduction must not be negative".to_string()).into());
        }
        let tx = self.write_tx()?;
        let Some(item) = load_item(&tx, item_id)? else {
            debug!(%item_id, "deduction skipped for missing item");
            return Ok(false);
        };
        deduct_in(&tx, &item, amount, reason, actor, now)?;
        tx.commit().context("failed to commit deduction")?;
        Ok(true)
    }

    /// First item whose name matches `name`, or a new zero-quantity placeholder.
    /// Placeholders carry no ledger row.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] for a blank name.
    pub fn find_or_create_item(
        &mut self,
        name: &str,
        unit: Option<&str>,
        category: Option<&str>,
        actor: Option<UserId>,
        now: OffsetDateTime,
    ) -> Result<InventoryItem> {
        let tx = self.write_tx()?;
        let item = find_or_insert(&tx, name, unit, category, actor, now)?;
        tx.commit().context("failed to commit inventory lookup")?;
        Ok(item)
    }

    /// Add purchased stock to the first item matching `name`, creating the
    /// item when none exists.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] for a blank name or a non-positive quantity.
    pub fn record_purchase(
        &mut self,
        name: &str,
        quantity: Decimal,
        unit: Option<&str>,
        category: Option<&str>,
        actor: UserId,
        now: OffsetDateTime,
    ) -> Result<InventoryItem> {
        if quantity <= Decimal::ZERO {
            return Err(
                EngineError::Validation("purchase quantity must be positive".to_string()).into()
            );
        }
        let tx = self.write_tx()?;
        let mut item = find_or_insert(&tx, name, unit, category, Some(actor), now)?;
        let before = item.quantity;
        let after = round_quantity(before + quantity);
        set_quantity(&tx, item.item_id, after, now)?;
        append_history(
            &tx,
            item.item_id,
            &LedgerChange {
                change_type: ChangeType::Purchased,
                quantity_before: before,
                quantity_after: after,
                reason: Some(SHOPPING_PURCHASE),
                changed_by: Some(actor),
            },
            now,
        )?;
        tx.commit().context("failed to commit purchase")?;

        item.quantity = after;
        item.updated_at = now;
        info!(item_id = %item.item_id, %before, %after, "purchase recorded");
        Ok(item)
    }

    /// Delete an item together with its ledger.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown item.
    pub fn delete_item(&mut self, item_id: InventoryItemId) -> Result<()> {
        let tx = self.write_tx()?;
        let id = item_id.to_string();
        tx.execute("DELETE FROM inventory_history WHERE item_id = ?1", params![id])
            .context("failed to delete inventory history")?;
        let removed = tx
            .execute("DELETE FROM inventory_items WHERE item_id = ?1", params![id])
            .context("failed to delete inventory item")?;
        if removed == 0 {
            return Err(not_found(format!("inventory item {item_id}")));
        }
        tx.commit().context("failed to commit inventory delete")?;
        info!(%item_id, "inventory item deleted");
        Ok(())
    }

    /// Ledger rows for one item, newest first.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] for an unknown item.
    pub fn history(&self, item_id: InventoryItemId) -> Result<Vec<HistoryEntry>> {
        if load_item(&self.conn, item_id)?.is_none() {
            return Err(not_found(format!("inventory item {item_id}")));
        }
        query_all(
            &self.conn,
            &format!(
                "SELECT {HISTORY_COLUMNS} FROM inventory_history
                 WHERE item_id = ?1 ORDER BY seq DESC"
            ),
            params![item_id.to_string()],
            read_history,
        )
    }

    /// Quantity reconstructed by replaying the item's ledger from zero.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] when the ledger chain is broken.
    pub fn replay_ledger(&self, item_id: InventoryItemId) -> Result<Decimal> {
        let entries = query_all(
            &self.conn,
            &format!(
                "SELECT {HISTORY_COLUMNS} FROM inventory_history WHERE item_id = ?1 ORDER BY seq ASC"
            ),
            params![item_id.to_string()],
            read_history,
        )?;
        Ok(replay_history(&entries)?)
    }

    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn low_stock_items(&self) -> Result<Vec<InventoryItem>> {
        self.list_items(&ItemFilter { low_stock_only: true, ..ItemFilter::default() })
    }

    /// Items expiring within `within_days` of `today`, soonest first.
    /// Already-expired items are included with a negative `days_until`.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn expiring_items(&self, today: Date, within_days: u32) -> Result<Vec<ExpiringItem>> {
        let items = query_all(
            &self.conn,
            &format!(
                "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE expiration_date IS NOT NULL"
            ),
            [],
            read_item,
        )?;
        Ok(expiring_items(items, today, within_days))
    }

    /// Name-keyed stock view over every item in creation order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn stock_index(&self) -> Result<StockIndex> {
        let items = query_all(
            &self.conn,
            &format!(
                "SELECT {ITEM_COLUMNS} FROM inventory_items ORDER BY created_at ASC, item_id ASC"
            ),
            [],
            read_item,
        )?;
        Ok(StockIndex::from_items(&items))
    }
}

fn read_item(row: &Row<'_>) -> Result<InventoryItem> {
    let location = row
        .get::<_, Option<String>>(5)?
        .map(|raw| parse_enum(&raw, "location", StorageLocation::parse))
        .transpose()?;
    Ok(InventoryItem {
        item_id: parse_id(&row.get::<_, String>(0)?)?,
        item_name: row.get(1)?,
        quantity: parse_decimal(&row.get::<_, String>(2)?)?,
        unit: row.get(3)?,
        category: row.get(4)?,
        location,
        minimum_stock: parse_decimal(&row.get::<_, String>(6)?)?,
        expiration_date: parse_optional_date(row.get(7)?)?,
        notes: row.get(8)?,
        created_by: parse_optional_id(row.get(9)?)?,
        created_at: parse_rfc3339(&row.get::<_, String>(10)?)?,
        updated_at: parse_rfc3339(&row.get::<_, String>(11)?)?,
    })
}

fn read_history(row: &Row<'_>) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
        entry_id: parse_id(&row.get::<_, String>(0)?)?,
        item_id: parse_id(&row.get::<_, String>(1)?)?,
        change_type: parse_enum(&row.get::<_, String>(2)?, "change_type", ChangeType::parse)?,
        quantity_before: parse_decimal(&row.get::<_, String>(3)?)?,
        quantity_after: parse_decimal(&row.get::<_, String>(4)?)?,
        reason: row.get(5)?,
        changed_by: parse_optional_id(row.get(6)?)?,
        changed_at: parse_rfc3339(&row.get::<_, String>(7)?)?,
    })
}

fn load_item(conn: &Connection, item_id: InventoryItemId) -> Result<Option<InventoryItem>> {
    query_one(
        conn,
        &format!("SELECT {ITEM_COLUMNS} FROM inventory_items WHERE item_id = ?1"),
        params![item_id.to_string()],
        read_item,
    )
}

/// Earliest-created item whose normalized name matches `name`.
pub(crate) fn find_item_by_name(conn: &Connection, name: &str) -> Result<Option<InventoryItem>> {
    query_one(
        conn,
        &format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items
             WHERE name_key = ?1 ORDER BY created_at ASC, item_id ASC LIMIT 1"
        ),
        params![normalize_name(name)],
        read_item,
    )
}

fn insert_item(
    conn: &Connection,
    new: &NewInventoryItem,
    actor: Option<UserId>,
    now: OffsetDateTime,
) -> Result<InventoryItem> {
    let item = InventoryItem {
        item_id: InventoryItemId::new(),
        item_name: new.item_name.trim().to_string(),
        quantity: round_quantity(new.quantity),
        unit: new.unit.clone(),
        category: new.category.clone(),
        location: new.location,
        minimum_stock: round_quantity(new.minimum_stock),
        expiration_date: new.expiration_date,
        notes: new.notes.clone(),
        created_by: actor,
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO inventory_items(
            item_id, item_name, name_key, quantity, unit, category, location, minimum_stock,
            expiration_date, notes, created_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            item.item_id.to_string(),
            item.item_name,
            item.name_key(),
            decimal_text(item.quantity),
            item.unit,
            item.category,
            item.location.map(StorageLocation::as_str),
            decimal_text(item.minimum_stock),
            optional_date_text(item.expiration_date)?,
            item.notes,
            actor.map(|user| user.to_string()),
            rfc3339(now)?,
        ],
    )
    .context("failed to insert inventory item")?;
    Ok(item)
}

fn find_or_insert(
    conn: &Connection,
    name: &str,
    unit: Option<&str>,
    category: Option<&str>,
    actor: Option<UserId>,
    now: OffsetDateTime,
) -> Result<InventoryItem> {
    if let Some(item) = find_item_by_name(conn, name)? {
        return Ok(item);
    }
    let new = NewInventoryItem {
        item_name: name.to_string(),
        quantity: Decimal::ZERO,
        unit: unit.map(str::to_string),
        category: category.map(str::to_string),
        location: None,
        minimum_stock: Decimal::ZERO,
        expiration_date: None,
        notes: None,
    };
    new.validate()?;
    let item = insert_item(conn, &new, actor, now)?;
    debug!(
        item_id = %item.item_id,
        item_name = %item.item_name,
        "placeholder inventory item created"
    );
    Ok(item)
}

fn set_quantity(
    conn: &Connection,
    item_id: InventoryItemId,
    quantity: Decimal,
    now: OffsetDateTime,
) -> Result<()> {
    conn.execute(
        "UPDATE inventory_items SET quantity = ?2, updated_at = ?3 WHERE item_id = ?1",
        params![item_id.to_string(), decimal_text(quantity), rfc3339(now)?],
    )
    .context("failed to update inventory quantity")?;
    Ok(())
}

fn append_history(
    conn: &Connection,
    item_id: InventoryItemId,
    change: &LedgerChange<'_>,
    now: OffsetDateTime,
) -> Result<HistoryEntry> {
    let entry = HistoryEntry {
        entry_id: HistoryEntryId::new(),
        item_id,
        change_type: change.change_type,
        quantity_before: round_quantity(change.quantity_before),
        quantity_after: round_quantity(change.quantity_after),
        reason: change.reason.map(str::to_string),
        changed_by: change.changed_by,
        changed_at: now,
    };
    conn.execute(
        "INSERT INTO inventory_history(
            entry_id, item_id, change_type, quantity_before, quantity_after, reason, changed_by,
            changed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.entry_id.to_string(),
            item_id.to_string(),
            entry.change_type.as_str(),
            decimal_text(entry.quantity_before),
            decimal_text(entry.quantity_after),
            entry.reason,
            entry.changed_by.map(|user| user.to_string()),
            rfc3339(now)?,
        ],
    )
    .context("failed to append inventory history")?;
    Ok(entry)
}

fn adjust_in(
    conn: &Connection,
    item: &mut InventoryItem,
    quantity: Decimal,
    actor: UserId,
    now: OffsetDateTime,
) -> Result<()> {
    let after = round_quantity(quantity);
    if after == item.quantity {
        return Ok(());
    }
    set_quantity(conn, item.item_id, after, now)?;
    append_history(
        conn,
        item.item_id,
        &LedgerChange {
            change_type: ChangeType::Adjusted,
            quantity_before: item.quantity,
            quantity_after: after,
            reason: Some(MANUAL_ADJUSTMENT),
            changed_by: Some(actor),
        },
        now,
    )?;
    info!(item_id = %item.item_id, before = %item.quantity, %after, "inventory adjusted");
    item.quantity = after;
    item.updated_at = now;
    Ok(())
}

/// Writes an `auto_deducted` row and the clamped quantity for `item`.
pub(crate) fn deduct_in(
    conn: &Connection,
    item: &InventoryItem,
    amount: Decimal,
    reason: &str,
    actor: Option<UserId>,
    now: OffsetDateTime,
) -> Result<Deduction> {
    let amount = round_quantity(amount);
    let after = clamp_deduction(item.quantity, amount);
    set_quantity(conn, item.item_id, after, now)?;
    append_history(
        conn,
        item.item_id,
        &LedgerChange {
            change_type: ChangeType::AutoDeducted,
            quantity_before: item.quantity,
            quantity_after: after,
            reason: Some(reason),
            changed_by: actor,
        },
        now,
    )?;
    debug!(item_id = %item.item_id, %amount, before = %item.quantity, %after, "inventory deducted");
    Ok(Deduction {
        item_id: item.item_id,
        item_name: item.item_name.clone(),
        quantity_deducted: amount,
        quantity_before: item.quantity,
        quantity_after: after,
    })
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use time::macros::date;
    use time::Duration;

    use super::*;
    use crate::fixtures::{fixture_time, memory_store, new_item, user};

    fn quantity_of(store: &SqliteStore, item_id: InventoryItemId) -> Result<Decimal> {
        let Some(item) = store.get_item(item_id)? else {
            return Err(anyhow!("item {item_id} missing"));
        };
        Ok(item.quantity)
    }

    #[test]
    fn create_item_opens_the_ledger() -> Result<()> {
        let mut store = memory_store()?;
        let item = store.create_item(&new_item(" Rice ", 500), user(), fixture_time())?;
        assert_eq!(item.item_name, "Rice");

        let history = store.history(item.item_id)?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_type, ChangeType::Purchased);
        assert_eq!(history[0].quantity_before, Decimal::ZERO);
        assert_eq!(history[0].quantity_after, Decimal::from(500));
        assert_eq!(history[0].reason.as_deref(), Some("Initial inventory"));
        assert_eq!(store.replay_ledger(item.item_id)?, Decimal::from(500));
        Ok(())
    }

    #[test]
    fn deduction_clamps_at_zero() -> Result<()> {
        let mut store = memory_store()?;
        let item = store.create_item(&new_item("Butter", 3), user(), fixture_time())?;
        assert!(store.deduct(item.item_id, Decimal::from(5), "Baking", None, fixture_time())?);
        assert_eq!(quantity_of(&store, item.item_id)?, Decimal::ZERO);

        let history = store.history(item.item_id)?;
        assert_eq!(history[0].change_type, ChangeType::AutoDeducted);
        assert_eq!(history[0].quantity_before, Decimal::from(3));
        assert_eq!(history[0].quantity_after, Decimal::ZERO);
        assert_eq!(history[0].reason.as_deref(), Some("Baking"));
        assert_eq!(store.replay_ledger(item.item_id)?, Decimal::ZERO);
        Ok(())
    }

    #[test]
    fn deducting_from_missing_item_reports_false() -> Result<()> {
        let mut store = memory_store()?;
        assert!(!store.deduct(InventoryItemId::new(), Decimal::ONE, "x", None, fixture_time())?);
        Ok(())
    }

    #[test]
    fn negative_deduction_is_rejected() -> Result<()> {
        let mut store = memory_store()?;
        let item = store.create_item(&new_item("Milk", 1), user(), fixture_time())?;
        let Err(err) = store.deduct(item.item_id, Decimal::NEGATIVE_ONE, "x", None, fixture_time())
        else {
            return Err(anyhow!("negative deduction must fail"));
        };
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::Validation(_))));
        Ok(())
    }

    #[test]
    fn unchanged_adjustment_writes_no_history() -> Result<()> {
        let mut store = memory_store()?;
        let actor = user();
        let item = store.create_item(&new_item("Oats", 400), actor, fixture_time())?;
        store.adjust_quantity(item.item_id, Decimal::from(400), actor, fixture_time())?;
        assert_eq!(store.history(item.item_id)?.len(), 1);

        let adjusted =
            store.adjust_quantity(item.item_id, Decimal::new(2505, 1), actor, fixture_time())?;
        assert_eq!(adjusted.quantity, Decimal::new(2505, 1));
        let history = store.history(item.item_id)?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].change_type, ChangeType::Adjusted);
        assert_eq!(history[0].reason.as_deref(), Some("Manual adjustment"));
        assert_eq!(store.replay_ledger(item.item_id)?, adjusted.quantity);
        Ok(())
    }

    #[test]
    fn history_is_newest_first_across_fractional_seconds() -> Result<()> {
        let mut store = memory_store()?;
        let actor = user();
        let created_at = fixture_time() + Duration::milliseconds(100);
        let adjusted_at = fixture_time() + Duration::milliseconds(150);
        let item = store.create_item(&new_item("Flour", 1000), actor, created_at)?;
        store.adjust_quantity(item.item_id, Decimal::from(750), actor, adjusted_at)?;

        let history = store.history(item.item_id)?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].change_type, ChangeType::Adjusted);
        assert_eq!(history[0].changed_at, adjusted_at);
        assert_eq!(history[1].change_type, ChangeType::Purchased);
        assert_eq!(history[1].changed_at, created_at);
        Ok(())
    }

    #[test]
    fn patch_updates_fields_and_routes_quantity_through_ledger() -> Result<()> {
        let mut store = memory_store()?;
        let actor = user();
        let item = store.create_item(&new_item("Cheese", 200), actor, fixture_time())?;
        let patch = InventoryPatch {
            item_name: Some("Cheddar".to_string()),
            quantity: Some(Decimal::from(150)),
            location: Some(StorageLocation::Fridge),
            expiration_date: Some(date!(2023 - 11 - 20)),
            ..InventoryPatch::default()
        };
        let updated = store.update_item(item.item_id, &patch, actor, fixture_time())?;
        assert_eq!(updated.item_name, "Cheddar");
        assert_eq!(updated.location, Some(StorageLocation::Fridge));
        assert_eq!(store.get_item(item.item_id)?, Some(updated));
        assert_eq!(store.replay_ledger(item.item_id)?, Decimal::from(150));
        let found = store.find_or_create_item("cheddar", None, None, None, fixture_time())?;
        assert_eq!(found.item_id, item.item_id);
        Ok(())
    }

    #[test]
    fn purchases_extend_existing_stock_or_create_items() -> Result<()> {
        let mut store = memory_store()?;
        let actor = user();
        let rice = store.create_item(&new_item("Rice", 100), actor, fixture_time())?;
        let topped =
            store.record_purchase("RICE", Decimal::from(400), None, None, actor, fixture_time())?;
        assert_eq!(topped.item_id, rice.item_id);
        assert_eq!(topped.quantity, Decimal::from(500));

        let eggs = store.record_purchase(
            "Eggs",
            Decimal::from(12),
            Some("pcs"),
            None,
            actor,
            fixture_time(),
        )?;
        assert_eq!(eggs.quantity, Decimal::from(12));
        let history = store.history(eggs.item_id)?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason.as_deref(), Some("Shopping list purchase"));
        assert_eq!(store.replay_ledger(eggs.item_id)?, Decimal::from(12));
        assert_eq!(store.replay_ledger(rice.item_id)?, Decimal::from(500));
        Ok(())
    }

    #[test]
    fn placeholder_items_have_zero_stock_and_no_ledger() -> Result<()> {
        let mut store = memory_store()?;
        let placeholder =
            store.find_or_create_item("Saffron", Some("g"), None, None, fixture_time())?;
        assert_eq!(placeholder.quantity, Decimal::ZERO);
        assert!(store.history(placeholder.item_id)?.is_empty());
        assert_eq!(store.replay_ledger(placeholder.item_id)?, Decimal::ZERO);
        let again = store.find_or_create_item(" saffron", None, None, None, fixture_time())?;
        assert_eq!(again.item_id, placeholder.item_id);
        Ok(())
    }

    #[test]
    fn low_stock_and_filters() -> Result<()> {
        let mut store = memory_store()?;
        let actor = user();
        store.create_item(&new_item("Flour", 40), actor, fixture_time())?;
        store.create_item(&new_item("Sugar", 50), actor, fixture_time())?;
        let mut frozen = new_item("Peas", 900);
        frozen.location = Some(StorageLocation::Freezer);
        store.create_item(&frozen, actor, fixture_time())?;

        let low = store.low_stock_items()?;
        let names = low.iter().map(|item| item.item_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Flour", "Sugar"]);

        let freezer = store.list_items(&ItemFilter {
            location: Some(StorageLocation::Freezer),
            ..ItemFilter::default()
        })?;
        assert_eq!(freezer.len(), 1);
        assert_eq!(freezer[0].item_name, "Peas");
        Ok(())
    }

    #[test]
    fn expiring_items_include_expired_ones() -> Result<()> {
        let mut store = memory_store()?;
        let actor = user();
        let today = date!(2026 - 10 - 18);
        for (name, expires) in [
            ("Yogurt", date!(2026 - 10 - 16)),
            ("Milk", date!(2026 - 10 - 20)),
            ("Cream", date!(2026 - 10 - 25)),
            ("Jam", date!(2026 - 12 - 01)),
        ] {
            let mut new = new_item(name, 1);
            new.expiration_date = Some(expires);
            store.create_item(&new, actor, fixture_time())?;
        }
        store.create_item(&new_item("Salt", 1), actor, fixture_time())?;

        let expiring = store.expiring_items(today, 7)?;
        let view = expiring
            .iter()
            .map(|entry| (entry.item.item_name.as_str(), entry.days_until))
            .collect::<Vec<_>>();
        assert_eq!(view, vec![("Yogurt", -2), ("Milk", 2), ("Cream", 7)]);
        Ok(())
    }

    #[test]
    fn delete_item_removes_its_ledger() -> Result<()> {
        let mut store = memory_store()?;
        let item = store.create_item(&new_item("Tea", 20), user(), fixture_time())?;
        store.delete_item(item.item_id)?;
        assert_eq!(store.get_item(item.item_id)?, None);
        let rows: i64 = store.conn.query_row(
            "SELECT COUNT(*) FROM inventory_history WHERE item_id = ?1",
            params![item.item_id.to_string()],
            |row| row.get(0),
        )?;
        assert_eq!(rows, 0);
        let Err(err) = store.delete_item(item.item_id) else {
            return Err(anyhow!("deleting twice must fail"));
        };
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn stock_index_prefers_the_earliest_duplicate() -> Result<()> {
        let mut store = memory_store()?;
        let actor = user();
        store.create_item(&new_item("Rice", 100), actor, fixture_time())?;
        let later = fixture_time() + time::Duration::seconds(1);
        store.create_item(&new_item("rice", 900), actor, later)?;
        let index = store.stock_index()?;
        assert_eq!(index.quantity_of("RICE"), Some(Decimal::from(100)));
        Ok(())
    }
}
