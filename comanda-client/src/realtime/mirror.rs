//! In-memory mirrors of backend collections
//!
//! Mirrors are written only by the reconciler; everything else takes
//! snapshots or subscribes to change broadcasts. Apply operations are
//! idempotent, and `replace_all` swaps the whole collection in one step
//! so readers never observe a half-applied refresh.
//!
//! The menu mirror additionally writes through to the `cached_menu`
//! collection, which is what makes a cold offline start possible.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use shared::models::{MenuItem, Order, OrderStatus};
use tokio::sync::broadcast;

use crate::store::DurableStore;

/// Broadcast capacity for mirror change events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change announcements for UI re-renders
#[derive(Debug, Clone)]
pub enum MirrorEvent {
    MenuChanged,
    OrderChanged { order_id: String },
    OrdersReplaced,
}

// ========== Menu ==========

/// Read-only mirror of the backend menu
pub struct MenuMirror {
    store: Arc<DurableStore>,
    items: RwLock<HashMap<String, MenuItem>>,
    events_tx: broadcast::Sender<MirrorEvent>,
}

impl MenuMirror {
    /// Create the mirror, warm-started from the persisted menu so the UI
    /// has something to show before the first resync lands
    pub fn new(store: Arc<DurableStore>) -> Self {
        let items: HashMap<String, MenuItem> = match store.load_menu() {
            Ok(items) => {
                if !items.is_empty() {
                    tracing::info!(count = items.len(), "Menu warm-started from local cache");
                }
                items.into_iter().map(|item| (item.id.clone(), item)).collect()
            }
            Err(e) => {
                tracing::warn!("Could not warm-start menu from local cache: {e}");
                HashMap::new()
            }
        };
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            items: RwLock::new(items),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.events_tx.subscribe()
    }

    pub fn get(&self, item_id: &str) -> Option<MenuItem> {
        self.items.read().get(item_id).cloned()
    }

    /// All items, sorted by category then name for stable rendering
    pub fn list(&self) -> Vec<MenuItem> {
        let mut items: Vec<MenuItem> = self.items.read().values().cloned().collect();
        items.sort_by(|a, b| (&a.category, &a.name).cmp(&(&b.category, &b.name)));
        items
    }

    pub fn list_by_category(&self, category: &str) -> Vec<MenuItem> {
        let mut items: Vec<MenuItem> = self
            .items
            .read()
            .values()
            .filter(|item| item.category == category)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Insert or overwrite one item; duplicate deliveries collapse
    pub(crate) fn upsert(&self, item: MenuItem) {
        self.items.write().insert(item.id.clone(), item.clone());
        if let Err(e) = self.store.upsert_menu_item(&item) {
            tracing::error!(item_id = %item.id, "Could not persist menu item: {e}");
        }
        let _ = self.events_tx.send(MirrorEvent::MenuChanged);
    }

    /// Remove one item; absent ids are a no-op
    pub(crate) fn remove(&self, item_id: &str) {
        let removed = self.items.write().remove(item_id).is_some();
        if !removed {
            return;
        }
        if let Err(e) = self.store.delete_menu_item(item_id) {
            tracing::error!(item_id, "Could not remove cached menu item: {e}");
        }
        let _ = self.events_tx.send(MirrorEvent::MenuChanged);
    }

    /// Swap in a complete replacement collection (full resync)
    pub(crate) fn replace_all(&self, items: Vec<MenuItem>) {
        let map: HashMap<String, MenuItem> = items
            .iter()
            .map(|item| (item.id.clone(), item.clone()))
            .collect();
        *self.items.write() = map;
        if let Err(e) = self.store.replace_menu(&items) {
            tracing::error!("Could not persist refreshed menu: {e}");
        }
        let _ = self.events_tx.send(MirrorEvent::MenuChanged);
    }
}

// ========== Orders ==========

/// Read-only mirror of this session's orders
///
/// Not persisted: orders are re-fetched on every new subscription, and the
/// outbox remains the durable record for anything not yet acknowledged.
pub struct OrderMirror {
    orders: RwLock<HashMap<String, Order>>,
    events_tx: broadcast::Sender<MirrorEvent>,
}

impl OrderMirror {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            orders: RwLock::new(HashMap::new()),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.events_tx.subscribe()
    }

    pub fn get(&self, order_id: &str) -> Option<Order> {
        self.orders.read().get(order_id).cloned()
    }

    /// All orders, newest first
    pub fn list(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.read().values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }

    /// Insert or overwrite one order, last writer wins
    ///
    /// Returns the status the mirror held before, `None` for a first
    /// sighting; the reconciler uses the difference to decide whether a
    /// notification is due.
    pub(crate) fn upsert(&self, order: Order) -> Option<OrderStatus> {
        let mut orders = self.orders.write();
        let previous = orders.insert(order.id.clone(), order.clone()).map(|o| o.status);
        drop(orders);
        let _ = self.events_tx.send(MirrorEvent::OrderChanged { order_id: order.id });
        previous
    }

    /// Remove one order; absent ids are a no-op
    pub(crate) fn remove(&self, order_id: &str) {
        let removed = self.orders.write().remove(order_id).is_some();
        if removed {
            let _ = self.events_tx.send(MirrorEvent::OrderChanged {
                order_id: order_id.to_string(),
            });
        }
    }

    /// Swap in a complete replacement collection (full resync)
    pub(crate) fn replace_all(&self, orders: Vec<Order>) {
        let map: HashMap<String, Order> = orders
            .into_iter()
            .map(|order| (order.id.clone(), order))
            .collect();
        *self.orders.write() = map;
        let _ = self.events_tx.send(MirrorEvent::OrdersReplaced);
    }
}

impl Default for OrderMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn menu_item(id: &str, category: &str, name: &str) -> MenuItem {
        MenuItem {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            category: category.to_string(),
            price: 5.0,
            is_available: true,
            preparation_time: 5,
            allergens: vec![],
            image_url: None,
        }
    }

    fn order(id: &str, status: OrderStatus, created_at: i64) -> Order {
        Order {
            id: id.to_string(),
            table_number: 1,
            items: vec![],
            total_amount: 10.0,
            status,
            session_id: "s1".to_string(),
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn test_menu_upsert_is_idempotent_and_persists() {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        let mirror = MenuMirror::new(store.clone());

        let item = menu_item("a", "mains", "Paella");
        mirror.upsert(item.clone());
        mirror.upsert(item.clone());

        assert_eq!(mirror.len(), 1);
        assert_eq!(store.load_menu().unwrap().len(), 1);

        mirror.remove("a");
        mirror.remove("a");
        assert!(mirror.is_empty());
        assert!(store.load_menu().unwrap().is_empty());
    }

    #[test]
    fn test_menu_warm_start_reads_persisted_cache() {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        {
            let mirror = MenuMirror::new(store.clone());
            mirror.upsert(menu_item("a", "mains", "Paella"));
            mirror.upsert(menu_item("b", "drinks", "Cava"));
        }

        let reborn = MenuMirror::new(store);
        assert_eq!(reborn.len(), 2);
        assert!(reborn.get("a").is_some());
    }

    #[test]
    fn test_menu_list_is_sorted_and_replace_all_is_total() {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        let mirror = MenuMirror::new(store);
        mirror.upsert(menu_item("1", "mains", "Paella"));
        mirror.upsert(menu_item("2", "drinks", "Cava"));
        mirror.upsert(menu_item("3", "drinks", "Agua"));

        let listed = mirror.list();
        let names: Vec<&str> = listed.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Agua", "Cava", "Paella"]);

        mirror.replace_all(vec![menu_item("9", "mains", "Nueva")]);
        assert_eq!(mirror.len(), 1);
        assert!(mirror.get("1").is_none());
    }

    #[test]
    fn test_order_upsert_reports_previous_status() {
        let mirror = OrderMirror::new();

        let previous = mirror.upsert(order("o1", OrderStatus::Pending, 100));
        assert_eq!(previous, None);

        let previous = mirror.upsert(order("o1", OrderStatus::Preparing, 100));
        assert_eq!(previous, Some(OrderStatus::Pending));

        // Replaying the same update changes nothing observable
        let previous = mirror.upsert(order("o1", OrderStatus::Preparing, 100));
        assert_eq!(previous, Some(OrderStatus::Preparing));
        assert_eq!(mirror.list().len(), 1);
    }

    #[test]
    fn test_orders_listed_newest_first() {
        let mirror = OrderMirror::new();
        mirror.upsert(order("old", OrderStatus::Delivered, 100));
        mirror.upsert(order("new", OrderStatus::Pending, 300));
        mirror.upsert(order("mid", OrderStatus::Ready, 200));

        let listed = mirror.list();
        let ids: Vec<&str> = listed.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }
}
