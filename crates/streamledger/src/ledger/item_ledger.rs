//! Ordered, deduplicated item collection.

use log::{debug, warn};

use super::models::{Item, Role};
use crate::error::{Error, Result};

/// Single source of truth for what has been received so far.
///
/// Insertion order is arrival order. At most one produced item may be
/// incomplete at any time; [`ItemLedger::begin_produced`] is the only
/// path that creates one.
#[derive(Debug, Clone, Default)]
pub struct ItemLedger {
    items: Vec<Item>,
}

impl ItemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from restored history.
    ///
    /// Duplicate ids collapse to their first occurrence. If restored data
    /// holds more than one incomplete produced item, all but the last are
    /// marked completed so the invariant holds again.
    pub fn hydrate(items: impl IntoIterator<Item = Item>) -> Self {
        let mut ledger = Self::new();
        for item in items {
            if ledger.position(&item.id).is_some() {
                debug!("Dropping duplicate item {} from restored history", item.id);
                continue;
            }
            if item.is_in_flight() {
                if let Some(previous) = ledger.items.iter_mut().find(|i| i.is_in_flight()) {
                    warn!(
                        "Restored history has several in-flight items; closing {}",
                        previous.id
                    );
                    previous.completed = true;
                }
            }
            ledger.items.push(item);
        }
        ledger
    }

    /// Append a completed user item.
    pub fn append_user(&mut self, content: impl Into<String>) -> Item {
        let item = Item::user(content);
        self.items.push(item.clone());
        item
    }

    /// Append a new, empty, incomplete produced item.
    pub fn begin_produced(&mut self) -> Result<Item> {
        if let Some(in_flight) = self.incomplete_tail() {
            return Err(Error::InvariantViolation(format!(
                "produced item {} is still in flight",
                in_flight.id
            )));
        }
        let item = Item::produced();
        self.items.push(item.clone());
        Ok(item)
    }

    /// Append `text` to an item. Returns `false` when the item is already
    /// completed: late frames after completion are ignored.
    pub fn apply_delta(&mut self, item_id: &str, text: &str) -> Result<bool> {
        let item = self.get_mut(item_id)?;
        if item.completed {
            debug!("Ignoring late delta for completed item {}", item_id);
            return Ok(false);
        }
        item.content.push_str(text);
        Ok(true)
    }

    /// Mark an item completed. Returns `false` if it already was.
    pub fn mark_completed(&mut self, item_id: &str) -> Result<bool> {
        let item = self.get_mut(item_id)?;
        if item.completed {
            return Ok(false);
        }
        item.completed = true;
        Ok(true)
    }

    /// Insert an item delivered under a pre-existing id. An existing entry
    /// with the same id is left untouched. Returns whether it was inserted.
    pub fn upsert_by_id(&mut self, item: Item) -> Result<bool> {
        if self.position(&item.id).is_some() {
            return Ok(false);
        }
        if item.is_in_flight() {
            if let Some(in_flight) = self.incomplete_tail() {
                return Err(Error::InvariantViolation(format!(
                    "cannot insert in-flight item {} while {} is in flight",
                    item.id, in_flight.id
                )));
            }
        }
        self.items.push(item);
        Ok(true)
    }

    /// Record asset names on an item, skipping ones already recorded.
    pub fn record_assets(&mut self, item_id: &str, names: &[String]) -> Result<()> {
        let item = self.get_mut(item_id)?;
        for name in names {
            if !item.assets.contains(name) {
                item.assets.push(name.clone());
            }
        }
        Ok(())
    }

    /// Most recent item.
    pub fn tail(&self) -> Option<&Item> {
        self.items.last()
    }

    /// The in-flight produced item, if any.
    pub fn incomplete_tail(&self) -> Option<&Item> {
        self.items.iter().rev().find(|i| i.is_in_flight())
    }

    /// Most recent user item.
    pub fn last_user_item(&self) -> Option<&Item> {
        self.items.iter().rev().find(|i| i.role == Role::User)
    }

    pub fn get(&self, item_id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop all items.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn position(&self, item_id: &str) -> Option<usize> {
        self.items.iter().position(|i| i.id == item_id)
    }

    fn get_mut(&mut self, item_id: &str) -> Result<&mut Item> {
        self.items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| Error::UnknownItem(item_id.to_string()))
    }
}
