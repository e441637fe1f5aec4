//! Cache router task
//!
//! Runs in its own task and owns the cache store; callers talk to it
//! through `RouterHandle` and get exactly one reply per request. Strategy
//! handling happens inline, but stale-while-revalidate refreshes are
//! spawned off so a slow backend never holds up the reply queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    CacheStore, CachedRequest, CachedResponse, Fetch, FetchError, RouterError, RouterResponse,
    RoutingTable, Strategy,
};
use shared::util::now_millis;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Cache activity announcements, mostly for surfacing staleness in the UI
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// A background refresh replaced the cached copy
    Revalidated { url: String },
    /// The network failed and a cached copy was served instead
    ServedStale { url: String },
    /// Neither the network nor the cache could answer
    Offline { url: String },
}

struct RouterRequest {
    request: CachedRequest,
    respond_to: oneshot::Sender<RouterResponse>,
}

/// Cheap cloneable handle to the router task
#[derive(Debug, Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouterRequest>,
    events_tx: broadcast::Sender<RouterEvent>,
}

impl RouterHandle {
    /// Route one request and wait for the reply
    pub async fn fetch(&self, request: CachedRequest) -> Result<RouterResponse, RouterError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(RouterRequest {
                request,
                respond_to,
            })
            .await
            .map_err(|_| RouterError::Closed)?;
        rx.await.map_err(|_| RouterError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events_tx.subscribe()
    }
}

/// Start the router task and hand back its handle
///
/// The join handle is returned alongside so shutdown can wait for the
/// task to release the cache store before the file is reopened.
pub fn spawn(
    store: CacheStore,
    fetcher: Arc<dyn Fetch>,
    table: RoutingTable,
    origin: impl Into<String>,
    shutdown: CancellationToken,
) -> (RouterHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
    let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let router = CacheRouter {
        store,
        fetcher,
        table,
        origin: origin.into(),
        events_tx: events_tx.clone(),
    };
    let task = tokio::spawn(router.run(rx, shutdown));
    (RouterHandle { tx, events_tx }, task)
}

struct CacheRouter {
    store: CacheStore,
    fetcher: Arc<dyn Fetch>,
    table: RoutingTable,
    origin: String,
    events_tx: broadcast::Sender<RouterEvent>,
}

impl CacheRouter {
    async fn run(self, mut rx: mpsc::Receiver<RouterRequest>, shutdown: CancellationToken) {
        tracing::info!(origin = %self.origin, "Cache router started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
            }
        }
        tracing::info!("Cache router stopped");
    }

    async fn handle(&self, RouterRequest { request, respond_to }: RouterRequest) {
        let reply = self.route(&request).await;
        if respond_to.send(reply).is_err() {
            tracing::debug!(url = %request.url, "Caller gone before the reply was ready");
        }
    }

    /// Pick and apply the strategy for one request
    ///
    /// Every path through here produces a reply; "no answer" is not an
    /// outcome the router can return.
    async fn route(&self, request: &CachedRequest) -> RouterResponse {
        if request.method != http::Method::GET {
            tracing::debug!(method = %request.method, url = %request.url, "Bypassing cache for non-GET");
            return self.passthrough(request).await;
        }

        let uri = match request.url.parse::<http::Uri>() {
            Ok(uri) => uri,
            Err(_) => return self.passthrough(request).await,
        };
        let origin = match (uri.scheme_str(), uri.authority()) {
            (Some(scheme), Some(authority)) => format!("{scheme}://{authority}"),
            _ => return self.passthrough(request).await,
        };
        if origin != self.origin {
            tracing::debug!(url = %request.url, "Bypassing cache for cross-origin request");
            return self.passthrough(request).await;
        }

        match self.table.strategy_for(uri.path()) {
            Some(Strategy::CacheFirst) => self.cache_first(request).await,
            Some(Strategy::NetworkFirst) => self.network_first(request).await,
            Some(Strategy::StaleWhileRevalidate) => self.stale_while_revalidate(request).await,
            None => self.passthrough(request).await,
        }
    }

    /// Straight to the network, no cache involvement either way
    async fn passthrough(&self, request: &CachedRequest) -> RouterResponse {
        match self.fetcher.fetch(request).await {
            Ok(response) => RouterResponse::fresh(response),
            Err(e) => {
                tracing::warn!(url = %request.url, "Passthrough fetch failed: {e}");
                self.emit(RouterEvent::Offline {
                    url: request.url.clone(),
                });
                RouterResponse::offline()
            }
        }
    }

    async fn cache_first(&self, request: &CachedRequest) -> RouterResponse {
        if let Some(cached) = self.lookup(&request.url) {
            return RouterResponse::from_cached(cached);
        }
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store_response(&request.url, &response);
                }
                RouterResponse::fresh(response)
            }
            Err(e) => {
                tracing::warn!(url = %request.url, "Cache miss and fetch failed: {e}");
                self.emit(RouterEvent::Offline {
                    url: request.url.clone(),
                });
                RouterResponse::offline()
            }
        }
    }

    async fn network_first(&self, request: &CachedRequest) -> RouterResponse {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store_response(&request.url, &response);
                }
                RouterResponse::fresh(response)
            }
            Err(e) => {
                tracing::warn!(url = %request.url, "Fetch failed, trying the cache: {e}");
                match self.lookup(&request.url) {
                    Some(cached) => {
                        self.emit(RouterEvent::ServedStale {
                            url: request.url.clone(),
                        });
                        RouterResponse::from_cached(cached)
                    }
                    None => {
                        self.emit(RouterEvent::Offline {
                            url: request.url.clone(),
                        });
                        RouterResponse::offline()
                    }
                }
            }
        }
    }

    /// Answer from the cache and refresh behind the reply
    async fn stale_while_revalidate(&self, request: &CachedRequest) -> RouterResponse {
        match self.lookup(&request.url) {
            Some(cached) => {
                self.spawn_revalidate(request.clone());
                RouterResponse::from_cached(cached)
            }
            None => self.network_first(request).await,
        }
    }

    fn spawn_revalidate(&self, request: CachedRequest) {
        let fetcher = self.fetcher.clone();
        let store = self.store.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) if response.is_success() => {
                    if let Err(e) = store.put(&request.url, &response) {
                        tracing::error!(url = %request.url, "Could not store refreshed copy: {e}");
                        return;
                    }
                    let _ = events_tx.send(RouterEvent::Revalidated {
                        url: request.url.clone(),
                    });
                }
                Ok(response) => {
                    tracing::debug!(
                        url = %request.url,
                        status = response.status,
                        "Keeping cached copy over a failed refresh"
                    );
                }
                Err(e) => {
                    tracing::debug!(url = %request.url, "Background refresh failed: {e}");
                }
            }
        });
    }

    /// Cache read; storage trouble counts as a miss
    fn lookup(&self, url: &str) -> Option<CachedResponse> {
        match self.store.get(url) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::error!(url, "Cache lookup failed: {e}");
                None
            }
        }
    }

    fn store_response(&self, url: &str, response: &CachedResponse) {
        if let Err(e) = self.store.put(url, response) {
            tracing::error!(url, "Could not cache response: {e}");
        }
    }

    fn emit(&self, event: RouterEvent) {
        let _ = self.events_tx.send(event);
    }
}

// ========== Network fetcher ==========

/// Real network fetcher used outside of tests
#[derive(Debug, Clone)]
pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }
}

#[async_trait]
impl Fetch for HttpFetch {
    async fn fetch(&self, request: &CachedRequest) -> Result<CachedResponse, FetchError> {
        let response = self
            .client
            .request(request.method.clone(), &request.url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?
            .to_vec();

        Ok(CachedResponse {
            status,
            content_type,
            body,
            stored_at: now_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

    #[derive(Debug)]
    struct MockFetch {
        calls: AtomicU32,
        fail: AtomicBool,
        status: AtomicU16,
        body: Mutex<String>,
    }

    impl MockFetch {
        fn ok(body: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail: AtomicBool::new(false),
                status: AtomicU16::new(200),
                body: Mutex::new(body.to_string()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetch for MockFetch {
        async fn fetch(&self, _request: &CachedRequest) -> Result<CachedResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::Network("connection refused".to_string()));
            }
            Ok(CachedResponse {
                status: self.status.load(Ordering::SeqCst),
                content_type: "text/plain".to_string(),
                body: self.body.lock().as_bytes().to_vec(),
                stored_at: now_millis(),
            })
        }
    }

    fn fixture(fetch: Arc<MockFetch>) -> (CacheRouter, broadcast::Receiver<RouterEvent>) {
        let (events_tx, events_rx) = broadcast::channel(16);
        let router = CacheRouter {
            store: CacheStore::open_in_memory().unwrap(),
            fetcher: fetch,
            table: RoutingTable::default(),
            origin: "http://host".to_string(),
            events_tx,
        };
        (router, events_rx)
    }

    #[tokio::test]
    async fn test_cache_first_fetches_only_on_miss() {
        let fetch = MockFetch::ok("body");
        let (router, _events) = fixture(fetch.clone());
        let request = CachedRequest::get("http://host/assets/app.css");

        let first = router.route(&request).await;
        assert!(!first.from_cache);
        let second = router.route(&request).await;
        assert!(second.from_cache);
        assert_eq!(second.body, b"body");
        assert_eq!(fetch.calls(), 1);
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cached_copy() {
        let fetch = MockFetch::ok("menu-v1");
        let (router, mut events) = fixture(fetch.clone());
        let request = CachedRequest::get("http://host/api/menu");

        let fresh = router.route(&request).await;
        assert!(!fresh.from_cache);

        fetch.fail.store(true, Ordering::SeqCst);
        let stale = router.route(&request).await;
        assert!(stale.from_cache);
        assert_eq!(stale.body, b"menu-v1");
        assert!(matches!(
            events.try_recv().unwrap(),
            RouterEvent::ServedStale { .. }
        ));
    }

    #[tokio::test]
    async fn test_offline_reply_when_nothing_can_answer() {
        let fetch = MockFetch::ok("unused");
        fetch.fail.store(true, Ordering::SeqCst);
        let (router, mut events) = fixture(fetch);
        let request = CachedRequest::get("http://host/api/menu");

        let reply = router.route(&request).await;
        assert!(reply.offline);
        assert_eq!(reply.status, 503);
        assert!(matches!(
            events.try_recv().unwrap(),
            RouterEvent::Offline { .. }
        ));
    }

    #[tokio::test]
    async fn test_non_get_and_cross_origin_bypass_the_cache() {
        let fetch = MockFetch::ok("body");
        let (router, _events) = fixture(fetch.clone());

        let post = CachedRequest::new(http::Method::POST, "http://host/api/orders");
        let reply = router.route(&post).await;
        assert!(!reply.from_cache);

        let foreign = CachedRequest::get("http://elsewhere/api/menu");
        let reply = router.route(&foreign).await;
        assert!(!reply.from_cache);

        assert_eq!(fetch.calls(), 2);
        assert_eq!(router.store.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_error_responses_are_not_cached() {
        let fetch = MockFetch::ok("gone");
        fetch.status.store(404, Ordering::SeqCst);
        let (router, _events) = fixture(fetch);
        let request = CachedRequest::get("http://host/api/menu");

        let reply = router.route(&request).await;
        assert_eq!(reply.status, 404);
        assert_eq!(router.store.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_serves_stale_then_refreshes() {
        let fetch = MockFetch::ok("v1");
        let (router, mut events) = fixture(fetch.clone());
        let request = CachedRequest::get("http://host/images/paella.jpg");

        // Miss seeds the cache through the network-first path
        let first = router.route(&request).await;
        assert!(!first.from_cache);

        *fetch.body.lock() = "v2".to_string();

        // Hit answers immediately from the cache
        let second = router.route(&request).await;
        assert!(second.from_cache);
        assert_eq!(second.body, b"v1");

        // The refresh lands behind the reply
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, RouterEvent::Revalidated { .. }));
        assert_eq!(fetch.calls(), 2);

        let third = router.route(&request).await;
        assert_eq!(third.body, b"v2");
    }

    #[tokio::test]
    async fn test_handle_round_trip_through_spawned_task() {
        let fetch = MockFetch::ok("spawned");
        let shutdown = CancellationToken::new();
        let (handle, task) = spawn(
            CacheStore::open_in_memory().unwrap(),
            fetch,
            RoutingTable::default(),
            "http://host",
            shutdown.clone(),
        );

        let reply = handle
            .fetch(CachedRequest::get("http://host/assets/app.js"))
            .await
            .unwrap();
        assert_eq!(reply.body, b"spawned");

        shutdown.cancel();
        task.await.unwrap();
        let err = handle
            .fetch(CachedRequest::get("http://host/assets/app.js"))
            .await;
        assert!(matches!(err, Err(RouterError::Closed)));
    }
}
