//! Response caching with per-path strategies
//!
//! A routing table maps URL path prefixes to caching strategies; a
//! dedicated router task owns the cache store and answers requests over a
//! channel, so callers never touch the cache directly. Only same-origin
//! GET requests are cached — anything else passes straight through. The
//! router always answers: when both the network and the cache come up
//! empty it fabricates a 503 reply carrying the offline error envelope,
//! which callers already know how to classify.

pub mod router;
pub mod store;

pub use router::{HttpFetch, RouterEvent, RouterHandle, spawn};
pub use store::{CacheStore, CachedResponse};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::response::{API_CODE_OFFLINE, ApiResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Cache router is not running")]
    Closed,
}

// ========== Strategies ==========

/// How a matched request balances freshness against availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve the cached copy when one exists; fetch only on a miss
    CacheFirst,
    /// Fetch first; fall back to the cached copy when the network fails
    NetworkFirst,
    /// Serve the cached copy immediately and refresh it in the background
    StaleWhileRevalidate,
}

/// One routing rule: a path prefix and the strategy it selects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub prefix: String,
    pub strategy: Strategy,
}

impl Route {
    pub fn new(prefix: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            prefix: prefix.into(),
            strategy,
        }
    }
}

/// Ordered prefix-match table; the first matching route wins
///
/// Paths that match no route are not cached at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn strategy_for(&self, path: &str) -> Option<Strategy> {
        self.routes
            .iter()
            .find(|route| path.starts_with(&route.prefix))
            .map(|route| route.strategy)
    }
}

impl Default for RoutingTable {
    /// Stock table for the ordering app
    ///
    /// Static assets rarely change and load cache-first; images tolerate a
    /// stale frame while a refresh runs; API data prefers the network and
    /// degrades to the last known copy.
    fn default() -> Self {
        Self::new(vec![
            Route::new("/assets/", Strategy::CacheFirst),
            Route::new("/images/", Strategy::StaleWhileRevalidate),
            Route::new("/api/menu", Strategy::NetworkFirst),
            Route::new("/api/orders", Strategy::NetworkFirst),
        ])
    }
}

// ========== Requests and replies ==========

/// A request as seen by the router
#[derive(Debug, Clone)]
pub struct CachedRequest {
    pub method: http::Method,
    pub url: String,
}

impl CachedRequest {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }
}

/// The router's answer, with provenance flags
#[derive(Debug, Clone)]
pub struct RouterResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Served from the cache rather than the network
    pub from_cache: bool,
    /// Fabricated because neither the network nor the cache could answer
    pub offline: bool,
}

impl RouterResponse {
    pub fn fresh(cached: CachedResponse) -> Self {
        Self {
            status: cached.status,
            content_type: cached.content_type,
            body: cached.body,
            from_cache: false,
            offline: false,
        }
    }

    pub fn from_cached(cached: CachedResponse) -> Self {
        Self {
            status: cached.status,
            content_type: cached.content_type,
            body: cached.body,
            from_cache: true,
            offline: false,
        }
    }

    /// Synthetic reply for "no network, no cached copy"
    ///
    /// Shaped like a backend error envelope so existing response handling
    /// classifies it without a special case.
    pub fn offline() -> Self {
        let envelope =
            ApiResponse::<()>::error(API_CODE_OFFLINE, "Offline: no cached copy available");
        Self {
            status: 503,
            content_type: "application/json".to_string(),
            body: serde_json::to_vec(&envelope).unwrap_or_default(),
            from_cache: false,
            offline: true,
        }
    }
}

// ========== Network seam ==========

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),
}

/// The router's view of the network
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &CachedRequest) -> Result<CachedResponse, FetchError>;
}

/// `scheme://authority` of a URL, for same-origin checks
pub fn origin_of(url: &str) -> Option<String> {
    let uri: http::Uri = url.parse().ok()?;
    let scheme = uri.scheme_str()?;
    let authority = uri.authority()?;
    Some(format!("{scheme}://{authority}"))
}
