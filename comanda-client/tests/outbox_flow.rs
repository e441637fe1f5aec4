//! Outbox delivery lifecycle against a scripted backend
//!
//! Exercises the retry budget, terminal failures, manual retry, crash
//! recovery, and the at-most-one-attempt-per-order guard with a delivery
//! stub whose outcomes are scripted per test.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::models::{CreateOrderPayload, Order, OrderDraft, OrderLineSnapshot, OrderStatus};
use shared::util::now_millis;
use tokio::sync::mpsc;

use comanda_client::ClientConfig;
use comanda_client::http::ApiError;
use comanda_client::outbox::{OrderDelivery, OrderOutbox, OutboxEvent};
use comanda_client::store::{DurableStore, PendingOrder, PendingOrderStatus};

struct FlakyDelivery {
    calls: AtomicU32,
    fail_first: AtomicU32,
    permanent: AtomicBool,
    delay: Duration,
    delivered: Mutex<Vec<String>>,
}

impl FlakyDelivery {
    fn new(fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_first: AtomicU32::new(fail_first),
            permanent: AtomicBool::new(false),
            delay: Duration::ZERO,
            delivered: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderDelivery for FlakyDelivery {
    async fn deliver(&self, payload: &CreateOrderPayload) -> Result<Order, ApiError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.permanent.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected {
                status: 422,
                code: "E4220".to_string(),
                message: "Item is not on the menu".to_string(),
            });
        }
        if n < self.fail_first.load(Ordering::SeqCst) {
            return Err(ApiError::Server {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }
        self.delivered.lock().push(payload.local_id.clone());
        Ok(Order {
            id: format!("srv-{}", payload.local_id),
            table_number: payload.table_number,
            items: payload.items.clone(),
            total_amount: payload.total_amount,
            status: OrderStatus::Pending,
            session_id: payload.session_id.clone(),
            created_at: now_millis(),
            updated_at: now_millis(),
        })
    }
}

fn draft() -> OrderDraft {
    OrderDraft {
        table_number: 7,
        session_id: "sess-1".to_string(),
        items: vec![OrderLineSnapshot {
            menu_item_id: "m1".to_string(),
            name: "Paella".to_string(),
            unit_price: 14.5,
            quantity: 2,
            special_instructions: String::new(),
        }],
        total_amount: 29.0,
        special_instructions: String::new(),
    }
}

/// Zero retry delays so failed orders are immediately eligible again
fn instant_retry_config() -> ClientConfig {
    ClientConfig::default().with_retry_delays(Duration::ZERO, Duration::ZERO)
}

fn outbox(delivery: Arc<FlakyDelivery>) -> (Arc<OrderOutbox>, mpsc::Receiver<Order>) {
    let store = Arc::new(DurableStore::open_in_memory().unwrap());
    let (confirmed_tx, confirmed_rx) = mpsc::channel(8);
    let outbox = Arc::new(OrderOutbox::new(
        store,
        delivery,
        confirmed_tx,
        &instant_retry_config(),
    ));
    (outbox, confirmed_rx)
}

#[tokio::test]
async fn test_retry_budget_ends_in_terminal_failure() {
    let delivery = FlakyDelivery::new(u32::MAX);
    let (outbox, _confirmed_rx) = outbox(delivery.clone());
    let mut events = outbox.subscribe();

    let local_id = outbox.enqueue(draft()).unwrap();

    for _ in 0..3 {
        outbox.drain().await;
    }
    assert_eq!(delivery.calls(), 3);

    let pending = outbox.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, PendingOrderStatus::Failed);
    assert_eq!(pending[0].retry_count, 3);
    assert!(pending[0].is_terminal(3));
    assert!(pending[0].last_error.is_some());

    // Terminal orders are never attempted again
    outbox.drain().await;
    assert_eq!(delivery.calls(), 3);

    assert!(matches!(events.try_recv().unwrap(), OutboxEvent::Queued { .. }));
    assert!(matches!(
        events.try_recv().unwrap(),
        OutboxEvent::RetryScheduled { retry_count: 1, .. }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        OutboxEvent::RetryScheduled { retry_count: 2, .. }
    ));
    match events.try_recv().unwrap() {
        OutboxEvent::TerminallyFailed { local_id: id, .. } => assert_eq!(id, local_id),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_delivery_success_confirms_and_clears() {
    let delivery = FlakyDelivery::new(1);
    let (outbox, mut confirmed_rx) = outbox(delivery.clone());
    let mut events = outbox.subscribe();

    let local_id = outbox.enqueue(draft()).unwrap();

    outbox.drain().await; // fails once
    outbox.drain().await; // delivers
    assert_eq!(delivery.calls(), 2);
    assert!(outbox.pending().unwrap().is_empty());

    let confirmed = confirmed_rx.try_recv().unwrap();
    assert_eq!(confirmed.id, format!("srv-{local_id}"));

    let synced = std::iter::from_fn(|| events.try_recv().ok())
        .find(|e| matches!(e, OutboxEvent::Synced { .. }));
    match synced {
        Some(OutboxEvent::Synced { local_id: id, order_id }) => {
            assert_eq!(id, local_id);
            assert_eq!(order_id, format!("srv-{local_id}"));
        }
        other => panic!("expected a Synced event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_drains_deliver_exactly_once() {
    // Slow delivery widens the overlap window
    let delivery = Arc::new(FlakyDelivery {
        calls: AtomicU32::new(0),
        fail_first: AtomicU32::new(0),
        permanent: AtomicBool::new(false),
        delay: Duration::from_millis(50),
        delivered: Mutex::new(Vec::new()),
    });
    let (outbox, mut confirmed_rx) = outbox(delivery.clone());

    outbox.enqueue(draft()).unwrap();

    let (a, b) = tokio::join!(outbox.drain(), outbox.drain());
    assert_eq!(a + b, 1);
    assert_eq!(delivery.calls(), 1);
    assert!(outbox.pending().unwrap().is_empty());
    assert!(confirmed_rx.try_recv().is_ok());
}

#[tokio::test]
async fn test_permanent_rejection_is_terminal_immediately() {
    let delivery = FlakyDelivery::new(0);
    delivery.permanent.store(true, Ordering::SeqCst);
    let (outbox, _confirmed_rx) = outbox(delivery.clone());
    let mut events = outbox.subscribe();

    outbox.enqueue(draft()).unwrap();
    outbox.drain().await;
    assert_eq!(delivery.calls(), 1);

    let pending = outbox.pending().unwrap();
    assert!(pending[0].is_terminal(3));

    outbox.drain().await;
    assert_eq!(delivery.calls(), 1);

    let _ = events.try_recv(); // Queued
    match events.try_recv().unwrap() {
        OutboxEvent::TerminallyFailed { error, .. } => {
            assert!(error.contains("not on the menu"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_retry_terminal_resets_budget_and_delivers() {
    let delivery = FlakyDelivery::new(0);
    delivery.permanent.store(true, Ordering::SeqCst);
    let (outbox, _confirmed_rx) = outbox(delivery.clone());

    let local_id = outbox.enqueue(draft()).unwrap();
    outbox.drain().await;
    assert!(outbox.pending().unwrap()[0].is_terminal(3));

    // Staff fixed the menu; the user taps retry
    delivery.permanent.store(false, Ordering::SeqCst);
    outbox.retry_terminal(&local_id).unwrap();

    let pending = outbox.pending().unwrap();
    assert_eq!(pending[0].status, PendingOrderStatus::Queued);
    assert_eq!(pending[0].retry_count, 0);

    outbox.drain().await;
    assert!(outbox.pending().unwrap().is_empty());
    assert_eq!(delivery.delivered.lock().as_slice(), [local_id]);
}

#[tokio::test]
async fn test_interrupted_attempts_recover_on_startup() {
    let store = Arc::new(DurableStore::open_in_memory().unwrap());

    // A crash mid-attempt leaves a record stuck in syncing
    let mut stuck = PendingOrder::new(draft());
    stuck.status = PendingOrderStatus::Syncing;
    store.insert_pending_order(&stuck).unwrap();

    let delivery = FlakyDelivery::new(0);
    let (confirmed_tx, _confirmed_rx) = mpsc::channel(8);
    let outbox = OrderOutbox::new(
        store,
        delivery.clone(),
        confirmed_tx,
        &instant_retry_config(),
    );

    assert_eq!(outbox.recover_interrupted().unwrap(), 1);
    assert_eq!(
        outbox.pending().unwrap()[0].status,
        PendingOrderStatus::Queued
    );

    outbox.drain().await;
    assert!(outbox.pending().unwrap().is_empty());
    assert_eq!(delivery.calls(), 1);
}

#[tokio::test]
async fn test_drain_delivers_oldest_first() {
    let store = Arc::new(DurableStore::open_in_memory().unwrap());

    let mut older = PendingOrder::new(draft());
    older.created_at = 1_000;
    let mut newer = PendingOrder::new(draft());
    newer.created_at = 2_000;
    // Inserted newest first to prove the index drives the order
    store.insert_pending_order(&newer).unwrap();
    store.insert_pending_order(&older).unwrap();

    let delivery = FlakyDelivery::new(0);
    let (confirmed_tx, _confirmed_rx) = mpsc::channel(8);
    let outbox = OrderOutbox::new(
        store,
        delivery.clone(),
        confirmed_tx,
        &instant_retry_config(),
    );

    assert_eq!(outbox.drain().await, 2);
    assert_eq!(
        delivery.delivered.lock().as_slice(),
        [older.local_id, newer.local_id]
    );
}
