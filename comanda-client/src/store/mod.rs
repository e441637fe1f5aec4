//! redb-based durable store for the sync core
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `pending_orders` | `local_id` | `PendingOrder` JSON | Order outbox |
//! | `pending_orders_by_time` | `(created_at, local_id)` | `()` | Drain order index |
//! | `cached_menu` | `item_id` | `MenuItem` JSON | Offline menu copy |
//! | `cached_menu_by_category` | `(category, item_id)` | `()` | Category index |
//! | `sessions` | `session_id` | `TableSession` JSON | Table sessions |
//! | `carts` | `session_id` | `CartSnapshot` JSON | Persisted carts |
//! | `app_data` | `key` | JSON | Sync bookkeeping |
//!
//! # Durability
//!
//! redb commits are persistent as soon as `commit()` returns: copy-on-write
//! with an atomic root swap, so a power cut mid-write leaves the previous
//! committed state intact. Multi-table writes (record plus its index) share
//! one transaction and land together or not at all.
//!
//! # Ownership
//!
//! Each collection has exactly one writing component; reads are open to
//! everyone. Unreadable records never escalate: reads log a warning and
//! treat the record as absent.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::models::{CartSnapshot, CreateOrderPayload, MenuItem, OrderDraft, TableSession};
use shared::util::{new_id, now_millis};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Order outbox: key = local_id, value = JSON-serialized PendingOrder
const PENDING_ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_orders");

/// Drain index: key = (created_at, local_id), value = empty (ordering only)
const PENDING_ORDERS_BY_TIME_TABLE: TableDefinition<(i64, &str), ()> =
    TableDefinition::new("pending_orders_by_time");

/// Offline menu copy: key = item_id, value = JSON-serialized MenuItem
const CACHED_MENU_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cached_menu");

/// Category index: key = (category, item_id), value = empty
const CACHED_MENU_BY_CATEGORY_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("cached_menu_by_category");

/// Table sessions: key = session_id, value = JSON-serialized TableSession
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Persisted carts: key = session_id, value = JSON-serialized CartSnapshot
const CARTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("carts");

/// Sync bookkeeping: key = well-known string, value = JSON
const APP_DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("app_data");

/// Delivery state of a pending order
///
/// `Synced` records are deleted once the backend acknowledges them, so the
/// variant only ever appears in lifecycle events, never on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingOrderStatus {
    Queued,
    Syncing,
    Failed,
    Synced,
}

/// Order outbox entry
///
/// Everything the backend needs to create the order, plus the retry
/// bookkeeping the drain loop works from. `local_id` doubles as the
/// idempotency token on the wire.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PendingOrder {
    pub local_id: String,
    pub table_number: u32,
    pub session_id: String,
    pub lines: Vec<shared::models::OrderLineSnapshot>,
    pub total_amount: f64,
    #[serde(default)]
    pub special_instructions: String,
    pub status: PendingOrderStatus,
    pub retry_count: u32,
    pub last_attempt_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
}

impl PendingOrder {
    /// Persistable record for a fresh checkout draft; assigns the
    /// idempotency token
    pub fn new(draft: OrderDraft) -> Self {
        Self {
            local_id: new_id(),
            table_number: draft.table_number,
            session_id: draft.session_id,
            lines: draft.items,
            total_amount: draft.total_amount,
            special_instructions: draft.special_instructions,
            status: PendingOrderStatus::Queued,
            retry_count: 0,
            last_attempt_at: None,
            last_error: None,
            created_at: now_millis(),
        }
    }

    /// Wire payload for one delivery attempt
    pub fn to_payload(&self) -> CreateOrderPayload {
        CreateOrderPayload {
            table_number: self.table_number,
            session_id: self.session_id.clone(),
            items: self.lines.clone(),
            total_amount: self.total_amount,
            special_instructions: self.special_instructions.clone(),
            local_id: self.local_id.clone(),
        }
    }

    /// Whether the retry budget is exhausted
    pub fn is_terminal(&self, max_retries: u32) -> bool {
        self.status == PendingOrderStatus::Failed && self.retry_count >= max_retries
    }
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Decode a stored record, treating unreadable bytes as absent
///
/// The warning carries the table and key so a corrupt record can be found
/// and inspected, but it never takes the caller down with it.
pub(crate) fn decode_lenient<T: DeserializeOwned>(table: &str, key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(table, key, "Unreadable record treated as absent: {e}");
            None
        }
    }
}

/// Durable store backed by redb
#[derive(Clone)]
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create the store at the given path
    ///
    /// All tables are created up front so later read transactions never
    /// race table creation.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path)?;
        Self::init_tables(&db)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Open a store on an in-memory backend (tests, ephemeral runs)
    pub fn open_in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init_tables(&db)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn init_tables(db: &Database) -> StoreResult<()> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PENDING_ORDERS_TABLE)?;
            let _ = write_txn.open_table(PENDING_ORDERS_BY_TIME_TABLE)?;
            let _ = write_txn.open_table(CACHED_MENU_TABLE)?;
            let _ = write_txn.open_table(CACHED_MENU_BY_CATEGORY_TABLE)?;
            let _ = write_txn.open_table(SESSIONS_TABLE)?;
            let _ = write_txn.open_table(CARTS_TABLE)?;
            let _ = write_txn.open_table(APP_DATA_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ========== Pending Orders ==========

    /// Persist a new outbox entry together with its drain-order index
    pub fn insert_pending_order(&self, order: &PendingOrder) -> StoreResult<()> {
        let value = serde_json::to_vec(order)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_ORDERS_TABLE)?;
            table.insert(order.local_id.as_str(), value.as_slice())?;
            let mut index = write_txn.open_table(PENDING_ORDERS_BY_TIME_TABLE)?;
            index.insert((order.created_at, order.local_id.as_str()), ())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Overwrite an existing outbox entry
    ///
    /// Returns `false` without writing when the record is gone, so an
    /// update racing a discard or a successful delivery cannot resurrect
    /// the order. `created_at` never changes, which keeps the index valid.
    pub fn update_pending_order(&self, order: &PendingOrder) -> StoreResult<bool> {
        let value = serde_json::to_vec(order)?;
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(PENDING_ORDERS_TABLE)?;
            if table.get(order.local_id.as_str())?.is_none() {
                false
            } else {
                table.insert(order.local_id.as_str(), value.as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    pub fn get_pending_order(&self, local_id: &str) -> StoreResult<Option<PendingOrder>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_ORDERS_TABLE)?;
        match table.get(local_id)? {
            Some(value) => Ok(decode_lenient("pending_orders", local_id, value.value())),
            None => Ok(None),
        }
    }

    /// Remove an outbox entry and its index; `false` when already gone
    pub fn delete_pending_order(&self, local_id: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let old = {
                let mut table = write_txn.open_table(PENDING_ORDERS_TABLE)?;
                table.remove(local_id)?.map(|guard| guard.value().to_vec())
            };
            match old {
                None => false,
                Some(bytes) => {
                    let mut index = write_txn.open_table(PENDING_ORDERS_BY_TIME_TABLE)?;
                    match decode_lenient::<PendingOrder>("pending_orders", local_id, &bytes) {
                        Some(order) => {
                            index.remove((order.created_at, local_id))?;
                        }
                        None => {
                            // Record bytes were unreadable; sweep the index
                            // for the orphaned entry instead
                            let mut orphaned: Vec<i64> = Vec::new();
                            for result in index.iter()? {
                                let (key, _) = result?;
                                let (created_at, id) = key.value();
                                if id == local_id {
                                    orphaned.push(created_at);
                                }
                            }
                            for created_at in orphaned {
                                index.remove((created_at, local_id))?;
                            }
                        }
                    }
                    true
                }
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// All outbox entries in creation order, oldest first
    ///
    /// Unreadable records are skipped; index entries whose record vanished
    /// are ignored.
    pub fn pending_orders_oldest_first(&self) -> StoreResult<Vec<PendingOrder>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(PENDING_ORDERS_BY_TIME_TABLE)?;
        let table = read_txn.open_table(PENDING_ORDERS_TABLE)?;

        let mut orders = Vec::new();
        for result in index.iter()? {
            let (key, _) = result?;
            let (_, local_id) = key.value();
            if let Some(value) = table.get(local_id)? {
                if let Some(order) = decode_lenient("pending_orders", local_id, value.value()) {
                    orders.push(order);
                }
            }
        }
        Ok(orders)
    }

    /// Crash recovery: anything left mid-attempt by a previous process run
    /// goes back to `Queued`. Returns the number of recovered entries.
    pub fn reset_syncing_to_queued(&self) -> StoreResult<u32> {
        let write_txn = self.db.begin_write()?;
        let recovered = {
            let mut table = write_txn.open_table(PENDING_ORDERS_TABLE)?;

            let mut stuck: Vec<PendingOrder> = Vec::new();
            for result in table.iter()? {
                let (key, value) = result?;
                if let Some(order) =
                    decode_lenient::<PendingOrder>("pending_orders", key.value(), value.value())
                {
                    if order.status == PendingOrderStatus::Syncing {
                        stuck.push(order);
                    }
                }
            }

            for order in &mut stuck {
                order.status = PendingOrderStatus::Queued;
                let value = serde_json::to_vec(&*order)?;
                table.insert(order.local_id.as_str(), value.as_slice())?;
            }
            stuck.len() as u32
        };
        write_txn.commit()?;
        Ok(recovered)
    }

    // ========== Cached Menu ==========

    /// Insert or update one menu item, keeping the category index in step
    pub fn upsert_menu_item(&self, item: &MenuItem) -> StoreResult<()> {
        let value = serde_json::to_vec(item)?;
        let write_txn = self.db.begin_write()?;
        {
            let old_category = {
                let mut table = write_txn.open_table(CACHED_MENU_TABLE)?;
                let old = table
                    .get(item.id.as_str())?
                    .and_then(|v| decode_lenient::<MenuItem>("cached_menu", &item.id, v.value()))
                    .map(|old| old.category);
                table.insert(item.id.as_str(), value.as_slice())?;
                old
            };

            let mut index = write_txn.open_table(CACHED_MENU_BY_CATEGORY_TABLE)?;
            if let Some(old_category) = old_category {
                if old_category != item.category {
                    index.remove((old_category.as_str(), item.id.as_str()))?;
                }
            }
            index.insert((item.category.as_str(), item.id.as_str()), ())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove one menu item; `false` when absent
    pub fn delete_menu_item(&self, item_id: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let old = {
                let mut table = write_txn.open_table(CACHED_MENU_TABLE)?;
                table.remove(item_id)?.map(|guard| guard.value().to_vec())
            };
            match old {
                None => false,
                Some(bytes) => {
                    let mut index = write_txn.open_table(CACHED_MENU_BY_CATEGORY_TABLE)?;
                    match decode_lenient::<MenuItem>("cached_menu", item_id, &bytes) {
                        Some(item) => {
                            index.remove((item.category.as_str(), item_id))?;
                        }
                        None => {
                            let mut orphaned: Vec<String> = Vec::new();
                            for result in index.iter()? {
                                let (key, _) = result?;
                                let (category, id) = key.value();
                                if id == item_id {
                                    orphaned.push(category.to_string());
                                }
                            }
                            for category in orphaned {
                                index.remove((category.as_str(), item_id))?;
                            }
                        }
                    }
                    true
                }
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Replace the whole cached menu in one transaction
    ///
    /// Readers see either the previous menu or the new one, never a mix.
    pub fn replace_menu(&self, items: &[MenuItem]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            write_txn.delete_table(CACHED_MENU_TABLE)?;
            write_txn.delete_table(CACHED_MENU_BY_CATEGORY_TABLE)?;
            let mut table = write_txn.open_table(CACHED_MENU_TABLE)?;
            let mut index = write_txn.open_table(CACHED_MENU_BY_CATEGORY_TABLE)?;
            for item in items {
                let value = serde_json::to_vec(item)?;
                table.insert(item.id.as_str(), value.as_slice())?;
                index.insert((item.category.as_str(), item.id.as_str()), ())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Every readable cached menu item
    pub fn load_menu(&self) -> StoreResult<Vec<MenuItem>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CACHED_MENU_TABLE)?;
        let mut items = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            if let Some(item) = decode_lenient("cached_menu", key.value(), value.value()) {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Cached menu items for one category, via the index
    pub fn menu_items_by_category(&self, category: &str) -> StoreResult<Vec<MenuItem>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(CACHED_MENU_BY_CATEGORY_TABLE)?;
        let table = read_txn.open_table(CACHED_MENU_TABLE)?;

        let mut items = Vec::new();
        for result in index.range((category, "")..)? {
            let (key, _) = result?;
            let (cat, item_id) = key.value();
            if cat != category {
                break;
            }
            if let Some(value) = table.get(item_id)? {
                if let Some(item) = decode_lenient("cached_menu", item_id, value.value()) {
                    items.push(item);
                }
            }
        }
        Ok(items)
    }

    // ========== Sessions ==========

    pub fn put_session(&self, session: &TableSession) -> StoreResult<()> {
        let value = serde_json::to_vec(session)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            table.insert(session.session_id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> StoreResult<Option<TableSession>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;
        match table.get(session_id)? {
            Some(value) => Ok(decode_lenient("sessions", session_id, value.value())),
            None => Ok(None),
        }
    }

    pub fn delete_session(&self, session_id: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            table.remove(session_id)?.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Most recently created readable session, if any
    pub fn latest_session(&self) -> StoreResult<Option<TableSession>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;
        let mut latest: Option<TableSession> = None;
        for result in table.iter()? {
            let (key, value) = result?;
            if let Some(session) =
                decode_lenient::<TableSession>("sessions", key.value(), value.value())
            {
                if latest.as_ref().is_none_or(|l| session.created_at > l.created_at) {
                    latest = Some(session);
                }
            }
        }
        Ok(latest)
    }

    // ========== Carts ==========

    pub fn save_cart(&self, session_id: &str, cart: &CartSnapshot) -> StoreResult<()> {
        let value = serde_json::to_vec(cart)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CARTS_TABLE)?;
            table.insert(session_id, value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Persisted cart for a session; unreadable snapshots come back as
    /// `None` so the cart can restart empty
    pub fn load_cart(&self, session_id: &str) -> StoreResult<Option<CartSnapshot>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CARTS_TABLE)?;
        match table.get(session_id)? {
            Some(value) => Ok(decode_lenient("carts", session_id, value.value())),
            None => Ok(None),
        }
    }

    pub fn delete_cart(&self, session_id: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CARTS_TABLE)?;
            table.remove(session_id)?.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    // ========== App Data ==========

    pub fn put_app_data<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(APP_DATA_TABLE)?;
            table.insert(key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_app_data<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(APP_DATA_TABLE)?;
        match table.get(key)? {
            Some(value) => Ok(decode_lenient("app_data", key, value.value())),
            None => Ok(None),
        }
    }

    // ========== Test Hooks ==========

    /// Write raw bytes into the cart table, bypassing serialization
    #[cfg(test)]
    pub(crate) fn put_cart_raw(&self, session_id: &str, bytes: &[u8]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CARTS_TABLE)?;
            table.insert(session_id, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Write raw bytes into the menu table, bypassing serialization
    #[cfg(test)]
    pub(crate) fn put_menu_raw(&self, item_id: &str, bytes: &[u8]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CACHED_MENU_TABLE)?;
            table.insert(item_id, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::OrderLineSnapshot;

    fn draft(session_id: &str) -> OrderDraft {
        OrderDraft {
            table_number: 7,
            session_id: session_id.to_string(),
            items: vec![OrderLineSnapshot {
                menu_item_id: "item-1".to_string(),
                name: "Paella".to_string(),
                unit_price: 14.5,
                quantity: 2,
                special_instructions: String::new(),
            }],
            total_amount: 29.0,
            special_instructions: String::new(),
        }
    }

    fn menu_item(id: &str, category: &str) -> MenuItem {
        MenuItem {
            id: id.to_string(),
            name: format!("Item {id}"),
            description: String::new(),
            category: category.to_string(),
            price: 9.9,
            is_available: true,
            preparation_time: 10,
            allergens: vec![],
            image_url: None,
        }
    }

    #[test]
    fn test_pending_order_roundtrip() {
        let store = DurableStore::open_in_memory().unwrap();
        let order = PendingOrder::new(draft("s1"));
        store.insert_pending_order(&order).unwrap();

        let loaded = store.get_pending_order(&order.local_id).unwrap().unwrap();
        assert_eq!(loaded, order);
        assert_eq!(loaded.status, PendingOrderStatus::Queued);

        assert!(store.delete_pending_order(&order.local_id).unwrap());
        assert!(!store.delete_pending_order(&order.local_id).unwrap());
        assert!(store.get_pending_order(&order.local_id).unwrap().is_none());
        assert!(store.pending_orders_oldest_first().unwrap().is_empty());
    }

    #[test]
    fn test_pending_orders_come_back_oldest_first() {
        let store = DurableStore::open_in_memory().unwrap();
        let mut first = PendingOrder::new(draft("s1"));
        first.created_at = 1000;
        let mut second = PendingOrder::new(draft("s1"));
        second.created_at = 2000;
        let mut third = PendingOrder::new(draft("s1"));
        third.created_at = 3000;

        // Insert out of order; the index restores creation order
        store.insert_pending_order(&second).unwrap();
        store.insert_pending_order(&third).unwrap();
        store.insert_pending_order(&first).unwrap();

        let ordered = store.pending_orders_oldest_first().unwrap();
        let ids: Vec<&str> = ordered.iter().map(|o| o.local_id.as_str()).collect();
        assert_eq!(ids, vec![&first.local_id, &second.local_id, &third.local_id]);
    }

    #[test]
    fn test_update_does_not_resurrect_deleted_order() {
        let store = DurableStore::open_in_memory().unwrap();
        let mut order = PendingOrder::new(draft("s1"));
        store.insert_pending_order(&order).unwrap();
        assert!(store.delete_pending_order(&order.local_id).unwrap());

        order.status = PendingOrderStatus::Failed;
        assert!(!store.update_pending_order(&order).unwrap());
        assert!(store.get_pending_order(&order.local_id).unwrap().is_none());
    }

    #[test]
    fn test_reset_syncing_to_queued() {
        let store = DurableStore::open_in_memory().unwrap();
        let mut stuck = PendingOrder::new(draft("s1"));
        stuck.status = PendingOrderStatus::Syncing;
        let queued = PendingOrder::new(draft("s1"));
        store.insert_pending_order(&stuck).unwrap();
        store.insert_pending_order(&queued).unwrap();

        assert_eq!(store.reset_syncing_to_queued().unwrap(), 1);
        let loaded = store.get_pending_order(&stuck.local_id).unwrap().unwrap();
        assert_eq!(loaded.status, PendingOrderStatus::Queued);
    }

    #[test]
    fn test_menu_category_index_follows_updates() {
        let store = DurableStore::open_in_memory().unwrap();
        store.upsert_menu_item(&menu_item("a", "mains")).unwrap();
        store.upsert_menu_item(&menu_item("b", "mains")).unwrap();
        store.upsert_menu_item(&menu_item("c", "drinks")).unwrap();

        let mains = store.menu_items_by_category("mains").unwrap();
        assert_eq!(mains.len(), 2);

        // Moving an item between categories must reindex it
        store.upsert_menu_item(&menu_item("a", "drinks")).unwrap();
        assert_eq!(store.menu_items_by_category("mains").unwrap().len(), 1);
        assert_eq!(store.menu_items_by_category("drinks").unwrap().len(), 2);

        assert!(store.delete_menu_item("a").unwrap());
        assert_eq!(store.menu_items_by_category("drinks").unwrap().len(), 1);
        assert_eq!(store.load_menu().unwrap().len(), 2);
    }

    #[test]
    fn test_replace_menu_is_total() {
        let store = DurableStore::open_in_memory().unwrap();
        store.upsert_menu_item(&menu_item("old-1", "mains")).unwrap();
        store.upsert_menu_item(&menu_item("old-2", "mains")).unwrap();

        store
            .replace_menu(&[menu_item("new-1", "drinks")])
            .unwrap();

        let items = store.load_menu().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "new-1");
        assert!(store.menu_items_by_category("mains").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_menu_record_is_skipped() {
        let store = DurableStore::open_in_memory().unwrap();
        store.upsert_menu_item(&menu_item("good", "mains")).unwrap();
        store.put_menu_raw("bad", b"{not json").unwrap();

        let items = store.load_menu().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "good");
    }

    #[test]
    fn test_latest_session_wins() {
        let store = DurableStore::open_in_memory().unwrap();
        let mut old = TableSession::new(3);
        old.created_at = 1000;
        let mut newer = TableSession::new(5);
        newer.created_at = 2000;
        store.put_session(&old).unwrap();
        store.put_session(&newer).unwrap();

        let latest = store.latest_session().unwrap().unwrap();
        assert_eq!(latest.session_id, newer.session_id);

        assert!(store.delete_session(&newer.session_id).unwrap());
        let latest = store.latest_session().unwrap().unwrap();
        assert_eq!(latest.session_id, old.session_id);
    }

    #[test]
    fn test_cart_roundtrip_and_corrupt_degrade() {
        let store = DurableStore::open_in_memory().unwrap();
        assert!(store.load_cart("s1").unwrap().is_none());

        let snapshot = CartSnapshot {
            lines: vec![],
            updated_at: 42,
        };
        store.save_cart("s1", &snapshot).unwrap();
        assert_eq!(store.load_cart("s1").unwrap().unwrap(), snapshot);

        store.put_cart_raw("s1", b"\xff\xfe garbage").unwrap();
        assert!(store.load_cart("s1").unwrap().is_none());
    }

    #[test]
    fn test_app_data_roundtrip() {
        let store = DurableStore::open_in_memory().unwrap();
        assert!(store.get_app_data::<i64>("last_sync").unwrap().is_none());
        store.put_app_data("last_sync", &1234i64).unwrap();
        assert_eq!(store.get_app_data::<i64>("last_sync").unwrap(), Some(1234));
    }
}
