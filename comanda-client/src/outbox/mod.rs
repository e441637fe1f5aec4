//! Order outbox
//!
//! Durable queue for orders created while the backend is unreachable or
//! flaky. Entries live in the `pending_orders` collection until the
//! backend acknowledges them; every delivery attempt re-sends the same
//! `local_id`, so the backend can collapse duplicates from ambiguous
//! failures (request delivered, reply lost).
//!
//! Drains go oldest-first. Each order backs off exponentially after a
//! transient failure and becomes terminal once the retry budget is spent
//! or the backend rejects it outright. An in-flight guard keeps attempts
//! for the same order from ever overlapping, no matter how many drains
//! run at once.

pub mod worker;

pub use worker::OutboxWorker;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use shared::models::{CreateOrderPayload, Order, OrderDraft};
use shared::util::now_millis;
use thiserror::Error;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::time::Duration;

use crate::config::ClientConfig;
use crate::http::{ApiClient, ApiError};
use crate::store::{DurableStore, PendingOrder, PendingOrderStatus, StoreError};

/// Broadcast capacity for lifecycle events
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Pending order not found: {0}")]
    NotFound(String),

    #[error("Order {0} has not terminally failed")]
    NotTerminal(String),
}

pub type OutboxResult<T> = Result<T, OutboxError>;

/// How an order reaches the backend
///
/// The HTTP client is the production implementation; tests substitute
/// scripted outcomes.
#[async_trait]
pub trait OrderDelivery: Send + Sync {
    async fn deliver(&self, payload: &CreateOrderPayload) -> Result<Order, ApiError>;
}

#[async_trait]
impl OrderDelivery for ApiClient {
    async fn deliver(&self, payload: &CreateOrderPayload) -> Result<Order, ApiError> {
        self.create_order(payload).await
    }
}

/// Lifecycle announcements, mainly for the UI's order tracker
#[derive(Debug, Clone)]
pub enum OutboxEvent {
    Queued {
        local_id: String,
    },
    Synced {
        local_id: String,
        order_id: String,
    },
    RetryScheduled {
        local_id: String,
        retry_count: u32,
        next_attempt_at: i64,
    },
    TerminallyFailed {
        local_id: String,
        error: String,
    },
    Discarded {
        local_id: String,
    },
}

/// Durable order outbox
pub struct OrderOutbox {
    store: Arc<DurableStore>,
    delivery: Arc<dyn OrderDelivery>,
    confirmed_tx: mpsc::Sender<Order>,
    events_tx: broadcast::Sender<OutboxEvent>,
    nudge: Arc<Notify>,
    in_flight: DashMap<String, ()>,
    max_retries: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    attempt_timeout: Duration,
}

impl OrderOutbox {
    /// Orders the backend confirms are pushed into `confirmed_tx` so the
    /// reconciler can fold them into the order mirror; the outbox itself
    /// never writes mirrors.
    pub fn new(
        store: Arc<DurableStore>,
        delivery: Arc<dyn OrderDelivery>,
        confirmed_tx: mpsc::Sender<Order>,
        config: &ClientConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            delivery,
            confirmed_tx,
            events_tx,
            nudge: Arc::new(Notify::new()),
            in_flight: DashMap::new(),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
            retry_max_delay: config.retry_max_delay,
            attempt_timeout: config.request_timeout,
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<OutboxEvent> {
        self.events_tx.subscribe()
    }

    /// Wakes the drain worker; fired on enqueue and requeue
    pub(crate) fn nudge_handle(&self) -> Arc<Notify> {
        self.nudge.clone()
    }

    /// Persist a checkout draft as a queued order and wake the worker
    ///
    /// Assigns the idempotency token and returns it. The network attempt
    /// itself happens on the worker, so enqueue never blocks the caller
    /// on I/O beyond the local write.
    pub fn enqueue(&self, draft: OrderDraft) -> OutboxResult<String> {
        let order = PendingOrder::new(draft);
        let local_id = order.local_id.clone();
        self.store.insert_pending_order(&order)?;
        tracing::info!(
            local_id = %local_id,
            table = order.table_number,
            total = order.total_amount,
            "Order queued for delivery"
        );
        let _ = self.events_tx.send(OutboxEvent::Queued {
            local_id: local_id.clone(),
        });
        self.nudge.notify_one();
        Ok(local_id)
    }

    /// Every entry still in the outbox, oldest first
    pub fn pending(&self) -> OutboxResult<Vec<PendingOrder>> {
        Ok(self.store.pending_orders_oldest_first()?)
    }

    /// Give a terminally-failed order a fresh retry budget
    pub fn retry_terminal(&self, local_id: &str) -> OutboxResult<()> {
        let mut order = self
            .store
            .get_pending_order(local_id)?
            .ok_or_else(|| OutboxError::NotFound(local_id.to_string()))?;
        if !order.is_terminal(self.max_retries) {
            return Err(OutboxError::NotTerminal(local_id.to_string()));
        }

        order.status = PendingOrderStatus::Queued;
        order.retry_count = 0;
        order.last_attempt_at = None;
        order.last_error = None;
        self.store.update_pending_order(&order)?;
        tracing::info!(local_id, "Terminally failed order requeued by user");
        let _ = self.events_tx.send(OutboxEvent::Queued {
            local_id: local_id.to_string(),
        });
        self.nudge.notify_one();
        Ok(())
    }

    /// Drop an order without delivering it; idempotent
    pub fn discard(&self, local_id: &str) -> OutboxResult<()> {
        if self.store.delete_pending_order(local_id)? {
            tracing::info!(local_id, "Pending order discarded by user");
            let _ = self.events_tx.send(OutboxEvent::Discarded {
                local_id: local_id.to_string(),
            });
        }
        Ok(())
    }

    /// Reset orders a previous process run left mid-attempt
    ///
    /// An entry stuck in `Syncing` means the process died between marking
    /// and resolution; the attempt may or may not have reached the
    /// backend, which is exactly what the idempotency token is for.
    pub fn recover_interrupted(&self) -> OutboxResult<u32> {
        let recovered = self.store.reset_syncing_to_queued()?;
        if recovered > 0 {
            tracing::warn!(count = recovered, "Recovered interrupted delivery attempts");
        }
        Ok(recovered)
    }

    /// Attempt delivery of every eligible order, oldest first
    ///
    /// Attempts run concurrently but never two for the same order; a
    /// drain overlapping another simply skips what the first already has
    /// in flight. Returns how many orders were delivered.
    pub async fn drain(&self) -> u32 {
        let pending = match self.store.pending_orders_oldest_first() {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("Could not read pending orders: {e}");
                return 0;
            }
        };
        if pending.is_empty() {
            return 0;
        }

        let now = now_millis();
        let eligible: Vec<PendingOrder> = pending
            .into_iter()
            .filter(|order| self.is_eligible(order, now))
            .collect();
        if eligible.is_empty() {
            return 0;
        }

        tracing::debug!(count = eligible.len(), "Draining order outbox");
        let attempts = eligible.into_iter().map(|order| self.attempt(order));
        join_all(attempts).await.into_iter().filter(|synced| *synced).count() as u32
    }

    fn is_eligible(&self, order: &PendingOrder, now: i64) -> bool {
        match order.status {
            PendingOrderStatus::Queued => true,
            PendingOrderStatus::Failed => {
                !order.is_terminal(self.max_retries) && now >= self.next_attempt_at(order)
            }
            PendingOrderStatus::Syncing | PendingOrderStatus::Synced => false,
        }
    }

    /// Earliest time a failed order may be attempted again:
    /// `base * 2^retry_count` after the last attempt, capped
    fn next_attempt_at(&self, order: &PendingOrder) -> i64 {
        let Some(last_attempt_at) = order.last_attempt_at else {
            return 0;
        };
        let factor = 1u32 << order.retry_count.min(16);
        let delay = self
            .retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay);
        last_attempt_at + delay.as_millis() as i64
    }

    /// One guarded delivery attempt; `true` when the backend took it
    async fn attempt(&self, order: PendingOrder) -> bool {
        let local_id = order.local_id.clone();
        match self.in_flight.entry(local_id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(local_id = %local_id, "Attempt already in flight, skipping");
                return false;
            }
            Entry::Vacant(entry) => {
                entry.insert(());
            }
        }

        let synced = self.attempt_guarded(order).await;
        self.in_flight.remove(&local_id);
        synced
    }

    async fn attempt_guarded(&self, mut order: PendingOrder) -> bool {
        // Re-read under the guard: a drain that overlapped the eligibility
        // scan may have resolved this order already
        match self.store.get_pending_order(&order.local_id) {
            Ok(Some(current)) => order = current,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(local_id = %order.local_id, "Could not re-read pending order: {e}");
                return false;
            }
        }
        if !self.is_eligible(&order, now_millis()) {
            return false;
        }

        order.status = PendingOrderStatus::Syncing;
        match self.store.update_pending_order(&order) {
            Ok(true) => {}
            // Discarded between the re-read and now; let it stay gone
            Ok(false) => return false,
            Err(e) => {
                tracing::error!(local_id = %order.local_id, "Could not mark order syncing: {e}");
                return false;
            }
        }

        let payload = order.to_payload();
        let outcome =
            tokio::time::timeout(self.attempt_timeout, self.delivery.deliver(&payload)).await;

        match outcome {
            Ok(Ok(confirmed)) => self.record_success(&order, confirmed),
            Ok(Err(e)) if e.is_transient() => {
                self.record_failure(&mut order, e.to_string(), false);
                false
            }
            Ok(Err(e)) => {
                self.record_failure(&mut order, e.to_string(), true);
                false
            }
            Err(_) => {
                self.record_failure(&mut order, "delivery attempt timed out".to_string(), false);
                false
            }
        }
    }

    fn record_success(&self, order: &PendingOrder, confirmed: Order) -> bool {
        if let Err(e) = self.store.delete_pending_order(&order.local_id) {
            // The next drain will re-send; the idempotency token makes the
            // duplicate harmless
            tracing::error!(local_id = %order.local_id, "Could not remove synced order: {e}");
        }
        tracing::info!(
            local_id = %order.local_id,
            order_id = %confirmed.id,
            "Order delivered"
        );
        let _ = self.events_tx.send(OutboxEvent::Synced {
            local_id: order.local_id.clone(),
            order_id: confirmed.id.clone(),
        });
        if let Err(e) = self.confirmed_tx.try_send(confirmed) {
            tracing::debug!("No mirror listening for confirmed orders: {e}");
        }
        true
    }

    fn record_failure(&self, order: &mut PendingOrder, error: String, permanent: bool) {
        // A permanent rejection consumes the whole retry budget: the same
        // payload would be rejected again, so scheduling retries only
        // delays telling the user
        order.retry_count = if permanent {
            self.max_retries.max(order.retry_count + 1)
        } else {
            order.retry_count + 1
        };
        order.status = PendingOrderStatus::Failed;
        order.last_attempt_at = Some(now_millis());
        order.last_error = Some(error.clone());

        match self.store.update_pending_order(order) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::error!(local_id = %order.local_id, "Could not record failed attempt: {e}");
                return;
            }
        }

        if order.is_terminal(self.max_retries) {
            tracing::error!(
                local_id = %order.local_id,
                retry_count = order.retry_count,
                "Order delivery terminally failed: {error}"
            );
            let _ = self.events_tx.send(OutboxEvent::TerminallyFailed {
                local_id: order.local_id.clone(),
                error,
            });
        } else {
            let next_attempt_at = self.next_attempt_at(order);
            tracing::warn!(
                local_id = %order.local_id,
                retry_count = order.retry_count,
                next_attempt_at,
                "Order delivery failed, will retry: {error}"
            );
            let _ = self.events_tx.send(OutboxEvent::RetryScheduled {
                local_id: order.local_id.clone(),
                retry_count: order.retry_count,
                next_attempt_at,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::OrderLineSnapshot;

    fn draft() -> OrderDraft {
        OrderDraft {
            table_number: 2,
            session_id: "s1".to_string(),
            items: vec![OrderLineSnapshot {
                menu_item_id: "item-1".to_string(),
                name: "Gazpacho".to_string(),
                unit_price: 6.5,
                quantity: 1,
                special_instructions: String::new(),
            }],
            total_amount: 6.5,
            special_instructions: String::new(),
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::default().with_retry_delays(Duration::from_secs(5), Duration::from_secs(60))
    }

    struct NoDelivery;

    #[async_trait]
    impl OrderDelivery for NoDelivery {
        async fn deliver(&self, _payload: &CreateOrderPayload) -> Result<Order, ApiError> {
            panic!("test does not expect a delivery attempt");
        }
    }

    fn outbox(delivery: Arc<dyn OrderDelivery>) -> OrderOutbox {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        let (confirmed_tx, _confirmed_rx) = mpsc::channel(8);
        OrderOutbox::new(store, delivery, confirmed_tx, &config())
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let outbox = outbox(Arc::new(NoDelivery));
        let mut order = PendingOrder::new(draft());
        order.status = PendingOrderStatus::Failed;
        order.last_attempt_at = Some(100_000);

        order.retry_count = 1;
        assert_eq!(outbox.next_attempt_at(&order), 100_000 + 10_000);
        order.retry_count = 2;
        assert_eq!(outbox.next_attempt_at(&order), 100_000 + 20_000);

        // Far beyond the cap the delay pins at the maximum
        order.retry_count = 10;
        assert_eq!(outbox.next_attempt_at(&order), 100_000 + 60_000);
    }

    #[test]
    fn test_eligibility_respects_backoff_and_terminal_state() {
        let outbox = outbox(Arc::new(NoDelivery));
        let now = now_millis();

        let mut order = PendingOrder::new(draft());
        assert!(outbox.is_eligible(&order, now));

        order.status = PendingOrderStatus::Syncing;
        assert!(!outbox.is_eligible(&order, now));

        order.status = PendingOrderStatus::Failed;
        order.retry_count = 1;
        order.last_attempt_at = Some(now);
        assert!(!outbox.is_eligible(&order, now + 9_999));
        assert!(outbox.is_eligible(&order, now + 10_000));

        order.retry_count = 3;
        assert!(!outbox.is_eligible(&order, now + i64::from(u32::MAX)));
    }

    #[tokio::test]
    async fn test_enqueue_persists_and_announces() {
        let outbox = outbox(Arc::new(NoDelivery));
        let mut events = outbox.subscribe();

        let local_id = outbox.enqueue(draft()).unwrap();
        let pending = outbox.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_id, local_id);
        assert_eq!(pending[0].status, PendingOrderStatus::Queued);

        match events.try_recv().unwrap() {
            OutboxEvent::Queued { local_id: id } => assert_eq!(id, local_id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retry_terminal_requires_terminal_state() {
        let outbox = outbox(Arc::new(NoDelivery));
        let local_id = outbox.enqueue(draft()).unwrap();

        let err = outbox.retry_terminal(&local_id).unwrap_err();
        assert!(matches!(err, OutboxError::NotTerminal(_)));
        let err = outbox.retry_terminal("missing").unwrap_err();
        assert!(matches!(err, OutboxError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_discard_is_idempotent() {
        let outbox = outbox(Arc::new(NoDelivery));
        let local_id = outbox.enqueue(draft()).unwrap();

        outbox.discard(&local_id).unwrap();
        outbox.discard(&local_id).unwrap();
        assert!(outbox.pending().unwrap().is_empty());
    }
}
