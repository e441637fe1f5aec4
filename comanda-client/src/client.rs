//! Client facade
//!
//! Wires the store, cart, outbox, reconciler, and cache router together
//! and owns the background tasks. Apps hold one `ComandaClient` per table
//! session and talk to the parts through it.

use std::collections::HashSet;
use std::sync::Arc;

use shared::message::NotificationPayload;
use shared::models::TableSession;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{self, CacheStore, HttpFetch, RouterHandle, RoutingTable};
use crate::cart::{CartEngine, CartError};
use crate::config::ClientConfig;
use crate::connectivity::Connectivity;
use crate::error::ClientResult;
use crate::http::ApiClient;
use crate::outbox::{OrderOutbox, worker::OutboxWorker};
use crate::realtime::{MenuMirror, OrderMirror, Reconciler, TcpEventSource};
use crate::session::SessionManager;
use crate::store::DurableStore;

const CONFIRMED_CHANNEL_CAPACITY: usize = 32;
const NOTIFICATION_CHANNEL_CAPACITY: usize = 32;

/// Everything a table-side app needs, behind one handle
pub struct ComandaClient {
    session: TableSession,
    store: Arc<DurableStore>,
    cart: CartEngine,
    api: Arc<ApiClient>,
    connectivity: Connectivity,
    outbox: Arc<OrderOutbox>,
    menu: Arc<MenuMirror>,
    orders: Arc<OrderMirror>,
    router: RouterHandle,
    notifications_rx: Option<mpsc::Receiver<NotificationPayload>>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl ComandaClient {
    /// Open the stores, bind a session for the table, and start the
    /// background workers
    ///
    /// Startup never touches the network; the workers bring connectivity
    /// up in the background, so a cold offline start still hands back a
    /// working client with the cached menu and the persisted cart.
    pub async fn start(config: ClientConfig, table_number: u32) -> ClientResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(DurableStore::open(config.store_path())?);
        let connectivity = Connectivity::new();
        let shutdown = CancellationToken::new();

        let cache_store = CacheStore::open(config.cache_store_path())?;
        let origin =
            cache::origin_of(&config.api_base_url).unwrap_or_else(|| config.api_base_url.clone());
        let (router, router_task) = cache::spawn(
            cache_store,
            Arc::new(HttpFetch::new(config.request_timeout)),
            RoutingTable::default(),
            origin,
            shutdown.child_token(),
        );

        let api = Arc::new(ApiClient::new(&config, connectivity.clone()).with_router(router.clone()));

        let session = SessionManager::new(store.clone()).load_or_create(table_number)?;
        let cart = CartEngine::load(store.clone(), session.session_id.clone());

        let (confirmed_tx, confirmed_rx) = mpsc::channel(CONFIRMED_CHANNEL_CAPACITY);
        let (notifications_tx, notifications_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);

        let outbox = Arc::new(OrderOutbox::new(
            store.clone(),
            api.clone(),
            confirmed_tx,
            &config,
        ));

        let source = Arc::new(TcpEventSource::new(
            config.events_addr.clone(),
            session.session_id.clone(),
        ));
        let reconciler = Reconciler::new(
            store.clone(),
            source,
            api.clone(),
            session.session_id.clone(),
            connectivity.clone(),
            confirmed_rx,
            notifications_tx,
            &config,
            shutdown.child_token(),
        );
        let menu = reconciler.menu();
        let orders = reconciler.orders();

        let outbox_worker = OutboxWorker::new(
            outbox.clone(),
            connectivity.clone(),
            config.drain_interval,
            shutdown.child_token(),
        );
        let workers = vec![
            tokio::spawn(outbox_worker.run()),
            tokio::spawn(reconciler.run()),
            router_task,
        ];

        tracing::info!(
            table_number,
            session_id = %session.session_id,
            "Client started"
        );

        Ok(Self {
            session,
            store,
            cart,
            api,
            connectivity,
            outbox,
            menu,
            orders,
            router,
            notifications_rx: Some(notifications_rx),
            shutdown,
            workers,
        })
    }

    // ========== Accessors ==========

    pub fn session(&self) -> &TableSession {
        &self.session
    }

    pub fn cart(&self) -> &CartEngine {
        &self.cart
    }

    pub fn menu(&self) -> Arc<MenuMirror> {
        self.menu.clone()
    }

    pub fn orders(&self) -> Arc<OrderMirror> {
        self.orders.clone()
    }

    pub fn outbox(&self) -> &OrderOutbox {
        &self.outbox
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn router(&self) -> &RouterHandle {
        &self.router
    }

    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    /// The notification stream, available once
    pub fn take_notifications(&mut self) -> Option<mpsc::Receiver<NotificationPayload>> {
        self.notifications_rx.take()
    }

    // ========== Checkout ==========

    /// Snapshot the cart into the outbox and clear it
    ///
    /// The availability check is best effort: when the backend answers,
    /// unavailable items are swept out and checkout stops so the user sees
    /// what changed; when the backend is unreachable the order is queued
    /// unverified and the backend has the final word at delivery time.
    pub async fn checkout(&self, instructions: &str) -> ClientResult<String> {
        let item_ids: Vec<String> = self
            .cart
            .lines()
            .iter()
            .map(|line| line.menu_item_id.clone())
            .collect();
        if item_ids.is_empty() {
            return Err(CartError::EmptyCart.into());
        }

        match self.api.check_availability(item_ids).await {
            Ok(report) if !report.all_available => {
                let unavailable: HashSet<String> =
                    report.unavailable_items.into_iter().collect();
                let removed = self.cart.validate_against_availability(&unavailable)?;
                if !removed.is_empty() {
                    let names = removed.into_iter().map(|line| line.name).collect();
                    return Err(CartError::ItemsUnavailable { names }.into());
                }
            }
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                tracing::warn!("Availability check unreachable, queueing order unverified: {e}");
            }
            Err(e) => return Err(e.into()),
        }

        let draft = self.cart.to_order_payload(
            self.session.table_number,
            &self.session.session_id,
            instructions,
        )?;
        let local_id = self.outbox.enqueue(draft)?;
        self.cart.clear()?;
        Ok(local_id)
    }

    /// Stop the background workers and wait for them to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!("Worker ended abnormally: {e}");
            }
        }
        tracing::info!("Client stopped");
    }
}
