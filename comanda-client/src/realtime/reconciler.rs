//! Change-event reconciliation loop
//!
//! Owns the subscription lifecycle: connect, full resync, then fold
//! incremental events until the stream breaks, and reconnect with backoff.
//! Every new subscription starts with a full resync because events missed
//! while disconnected are gone; the stream only narrows the window between
//! refreshes, it is not the source of truth.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared::message::{ChangeEvent, EntityKind, EventFrame, NotificationPayload};
use shared::models::{MenuItem, Order};
use shared::util::now_millis;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::connectivity::Connectivity;
use crate::http::{ApiClient, ApiError};
use crate::realtime::mirror::{MenuMirror, OrderMirror};
use crate::realtime::transport::{EventSource, EventTransport, TransportError};
use crate::store::DurableStore;

/// App-data keys recording when each collection was last fully refreshed
pub const LAST_MENU_SYNC_KEY: &str = "last_menu_sync_at";
pub const LAST_ORDERS_SYNC_KEY: &str = "last_orders_sync_at";

/// Full-collection refresh, one call per collection
#[async_trait]
pub trait CollectionFetch: Send + Sync {
    async fn fetch_menu(&self) -> Result<Vec<MenuItem>, ApiError>;
    async fn fetch_orders(&self, session_id: &str) -> Result<Vec<Order>, ApiError>;
}

#[async_trait]
impl CollectionFetch for ApiClient {
    async fn fetch_menu(&self) -> Result<Vec<MenuItem>, ApiError> {
        ApiClient::fetch_menu(self).await
    }

    async fn fetch_orders(&self, session_id: &str) -> Result<Vec<Order>, ApiError> {
        ApiClient::fetch_orders(self, session_id).await
    }
}

/// Folds the event stream into the menu and order mirrors
///
/// The reconciler is the only writer to both mirrors, which is what makes
/// "apply or resync" a complete consistency story: there is no third party
/// whose writes could interleave.
pub struct Reconciler {
    store: Arc<DurableStore>,
    source: Arc<dyn EventSource>,
    fetch: Arc<dyn CollectionFetch>,
    menu: Arc<MenuMirror>,
    orders: Arc<OrderMirror>,
    session_id: String,
    connectivity: Connectivity,
    confirmed_rx: mpsc::Receiver<Order>,
    notifications_tx: mpsc::Sender<NotificationPayload>,
    reconnect_delay: Duration,
    reconnect_max_delay: Duration,
    shutdown: CancellationToken,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<DurableStore>,
        source: Arc<dyn EventSource>,
        fetch: Arc<dyn CollectionFetch>,
        session_id: impl Into<String>,
        connectivity: Connectivity,
        confirmed_rx: mpsc::Receiver<Order>,
        notifications_tx: mpsc::Sender<NotificationPayload>,
        config: &ClientConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let menu = Arc::new(MenuMirror::new(store.clone()));
        let orders = Arc::new(OrderMirror::new());
        Self {
            store,
            source,
            fetch,
            menu,
            orders,
            session_id: session_id.into(),
            connectivity,
            confirmed_rx,
            notifications_tx,
            reconnect_delay: config.reconnect_delay,
            reconnect_max_delay: config.reconnect_max_delay,
            shutdown,
        }
    }

    /// Shared handle to the menu mirror
    pub fn menu(&self) -> Arc<MenuMirror> {
        self.menu.clone()
    }

    /// Shared handle to the order mirror
    pub fn orders(&self) -> Arc<OrderMirror> {
        self.orders.clone()
    }

    /// Run until shutdown, reconnecting with capped exponential backoff
    pub async fn run(mut self) {
        let mut delay = self.reconnect_delay;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let transport = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.source.connect() => match result {
                    Ok(transport) => transport,
                    Err(e) => {
                        self.connectivity.mark_offline();
                        tracing::warn!("Event subscription failed: {e}; retrying in {delay:?}");
                        tokio::select! {
                            _ = self.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        delay = (delay * 2).min(self.reconnect_max_delay);
                        continue;
                    }
                },
            };

            tracing::info!("Event subscription established");
            self.connectivity.mark_online();
            delay = self.reconnect_delay;

            // Close the gap left by whatever happened while disconnected
            self.resync(EntityKind::Menu).await;
            self.resync(EntityKind::Orders).await;

            if !self.pump(transport.as_ref()).await {
                break;
            }
            self.connectivity.mark_offline();
        }

        tracing::info!("Reconciler stopped");
    }

    /// Fold events until the stream breaks (true) or shutdown (false)
    async fn pump(&mut self, transport: &dyn EventTransport) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    if let Err(e) = transport.close().await {
                        tracing::debug!("Subscription close failed: {e}");
                    }
                    return false;
                }
                Some(order) = self.confirmed_rx.recv() => {
                    // Outbox deliveries show up here before the backend
                    // echoes them on the stream; the fold is idempotent so
                    // the echo is harmless
                    self.apply_order(order);
                }
                event = transport.next_event() => match event {
                    Ok(frame) => self.apply_frame(frame).await,
                    Err(TransportError::Lagged(missed)) => {
                        tracing::warn!(missed, "Event stream lagged; resyncing to close the gap");
                        self.resync(EntityKind::Menu).await;
                        self.resync(EntityKind::Orders).await;
                    }
                    Err(e) => {
                        tracing::warn!("Event stream broken: {e}; reconnecting");
                        return true;
                    }
                },
            }
        }
    }

    /// Decode and fold one frame; malformed frames refresh instead of merge
    async fn apply_frame(&self, frame: EventFrame) {
        match ChangeEvent::try_from(frame) {
            Ok(event) => self.apply_event(event),
            Err(e) => {
                tracing::warn!("Malformed change event: {e}; resyncing");
                match e.entity_hint() {
                    Some(entity) => self.resync(entity).await,
                    None => {
                        self.resync(EntityKind::Menu).await;
                        self.resync(EntityKind::Orders).await;
                    }
                }
            }
        }
    }

    fn apply_event(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::MenuUpsert { op, item } => {
                tracing::debug!(op = %op, item_id = %item.id, "Applying menu change");
                self.menu.upsert(item);
            }
            ChangeEvent::MenuDelete { id } => {
                tracing::debug!(item_id = %id, "Applying menu delete");
                self.menu.remove(&id);
            }
            ChangeEvent::OrderUpsert { op: _, order } => self.apply_order(order),
            ChangeEvent::OrderDelete { id } => {
                tracing::debug!(order_id = %id, "Applying order delete");
                self.orders.remove(&id);
            }
        }
    }

    /// Upsert an order and notify when its status actually changed
    fn apply_order(&self, order: Order) {
        let order_id = order.id.clone();
        let table_number = order.table_number;
        let status = order.status;

        let previous = self.orders.upsert(order);
        if previous == Some(status) {
            return;
        }

        let payload = NotificationPayload::order_status(&order_id, table_number, status);
        if self.notifications_tx.try_send(payload).is_err() {
            tracing::debug!(order_id, "No notification listener; dropping status update");
        }
    }

    /// Full refresh of one collection, abandoned cleanly on shutdown
    ///
    /// The mirror swap happens only after the whole collection arrived, so
    /// a refresh cancelled mid-flight leaves the previous snapshot intact.
    async fn resync(&self, entity: EntityKind) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                tracing::debug!(entity = %entity, "Resync cancelled by shutdown");
            }
            _ = self.fetch_collection(entity) => {}
        }
    }

    async fn fetch_collection(&self, entity: EntityKind) {
        match entity {
            EntityKind::Menu => match self.fetch.fetch_menu().await {
                Ok(items) => {
                    let count = items.len();
                    self.menu.replace_all(items);
                    self.stamp_sync(LAST_MENU_SYNC_KEY);
                    tracing::info!(count, "Menu resynced");
                }
                Err(e) => tracing::warn!("Menu resync failed: {e}"),
            },
            EntityKind::Orders => match self.fetch.fetch_orders(&self.session_id).await {
                Ok(orders) => {
                    let count = orders.len();
                    self.orders.replace_all(orders);
                    self.stamp_sync(LAST_ORDERS_SYNC_KEY);
                    tracing::info!(count, "Orders resynced");
                }
                Err(e) => tracing::warn!("Orders resync failed: {e}"),
            },
        }
    }

    fn stamp_sync(&self, key: &str) {
        if let Err(e) = self.store.put_app_data(key, &now_millis()) {
            tracing::warn!(key, "Could not record sync time: {e}");
        }
    }
}
