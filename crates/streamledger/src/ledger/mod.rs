//! Item ledger: the ordered history of a session.

mod item_ledger;
mod models;

pub use item_ledger::ItemLedger;
pub use models::{Item, Role, StoredItem, new_item_id};
