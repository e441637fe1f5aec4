//! HTTP client for the ordering backend
//!
//! Typed wrapper over reqwest. Every endpoint speaks the `ApiResponse`
//! envelope; this layer unwraps it and maps failures into the
//! transient/permanent split the outbox depends on. Request outcomes feed
//! the connectivity flag as a side effect.
//!
//! When a cache router is attached, GET requests travel through it and
//! pick up whatever caching strategy matches the path; mutations always
//! go straight to the network.

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::models::{
    AvailabilityQuery, AvailabilityReport, CreateOrderPayload, MenuItem, Order, OrderStatus,
    UpdateOrderStatus,
};
use shared::response::ApiResponse;
use thiserror::Error;

use crate::cache::{CachedRequest, RouterHandle};
use crate::config::ClientConfig;
use crate::connectivity::Connectivity;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure: connect, timeout, TLS, body read
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend rejected the request (4xx or an error envelope)
    #[error("Rejected ({status} {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    /// Backend failed (5xx); worth retrying later
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// 2xx reply whose body was not a usable envelope
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether a later retry can plausibly succeed
    ///
    /// Network-level failures and 5xx are transient. Rejections and
    /// undecodable bodies are permanent: the same request would fail the
    /// same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(e) => !e.is_decode(),
            ApiError::Server { .. } => true,
            ApiError::Rejected { .. }
            | ApiError::InvalidResponse(_)
            | ApiError::Serialization(_) => false,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Status and body of a reply, regardless of which path produced it
struct RawResponse {
    status: u16,
    body: Vec<u8>,
}

/// Typed client for the ordering backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    connectivity: Connectivity,
    router: Option<RouterHandle>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, connectivity: Connectivity) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            connectivity,
            router: None,
        }
    }

    /// Send GET requests through the cache router instead of directly
    pub fn with_router(mut self, router: RouterHandle) -> Self {
        self.router = Some(router);
        self
    }

    // ========== Menu API ==========

    pub async fn fetch_menu(&self) -> ApiResult<Vec<MenuItem>> {
        self.get("/api/menu").await
    }

    pub async fn fetch_menu_item(&self, item_id: &str) -> ApiResult<MenuItem> {
        self.get(&format!("/api/menu/{item_id}")).await
    }

    pub async fn check_availability(&self, item_ids: Vec<String>) -> ApiResult<AvailabilityReport> {
        self.post("/api/menu/check-availability", &AvailabilityQuery { item_ids })
            .await
    }

    // ========== Orders API ==========

    pub async fn create_order(&self, payload: &CreateOrderPayload) -> ApiResult<Order> {
        self.post("/api/orders", payload).await
    }

    pub async fn fetch_orders(&self, session_id: &str) -> ApiResult<Vec<Order>> {
        self.get(&format!("/api/orders?sessionId={session_id}")).await
    }

    pub async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> ApiResult<Order> {
        self.put(
            &format!("/api/orders/{order_id}/status"),
            &UpdateOrderStatus { status },
        )
        .await
    }

    // ========== Plumbing ==========

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let raw = match &self.router {
            Some(router) => self.routed_get(router, url).await?,
            None => self.direct(self.client.get(&url)).await?,
        };
        decode(raw)
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> ApiResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let raw = self.direct(self.client.post(&url).json(body)).await?;
        decode(raw)
    }

    async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> ApiResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let raw = self.direct(self.client.put(&url).json(body)).await?;
        decode(raw)
    }

    /// GET via the router; falls back to a direct request if the router
    /// task is gone
    async fn routed_get(&self, router: &RouterHandle, url: String) -> ApiResult<RawResponse> {
        match router.fetch(CachedRequest::get(url.clone())).await {
            Ok(reply) => {
                if reply.offline {
                    self.connectivity.mark_offline();
                } else if !reply.from_cache {
                    self.connectivity.mark_online();
                }
                Ok(RawResponse {
                    status: reply.status,
                    body: reply.body,
                })
            }
            Err(e) => {
                tracing::warn!("Cache router unavailable, fetching directly: {e}");
                self.direct(self.client.get(&url)).await
            }
        }
    }

    async fn direct(&self, request: reqwest::RequestBuilder) -> ApiResult<RawResponse> {
        match request.send().await {
            Ok(response) => {
                self.connectivity.mark_online();
                let status = response.status().as_u16();
                let body = response.bytes().await?.to_vec();
                Ok(RawResponse { status, body })
            }
            Err(e) => {
                if e.is_timeout() || e.is_connect() {
                    self.connectivity.mark_offline();
                }
                Err(e.into())
            }
        }
    }
}

/// Unwrap the `ApiResponse` envelope, or classify the failure
fn decode<T: DeserializeOwned>(raw: RawResponse) -> ApiResult<T> {
    if !(200..300).contains(&raw.status) {
        // Error replies still carry the envelope when the backend got far
        // enough to produce one
        let (code, message) = match serde_json::from_slice::<ApiResponse<serde_json::Value>>(&raw.body)
        {
            Ok(envelope) => (envelope.code, envelope.message),
            Err(_) => (
                format!("E{}", raw.status),
                String::from_utf8_lossy(&raw.body).into_owned(),
            ),
        };
        return Err(if raw.status >= 500 {
            ApiError::Server {
                status: raw.status,
                message,
            }
        } else {
            ApiError::Rejected {
                status: raw.status,
                code,
                message,
            }
        });
    }

    let envelope: ApiResponse<T> = serde_json::from_slice(&raw.body)
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
    if !envelope.is_success() {
        return Err(ApiError::Rejected {
            status: raw.status,
            code: envelope.code,
            message: envelope.message,
        });
    }
    envelope
        .data
        .ok_or_else(|| ApiError::InvalidResponse("Missing response data".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::response::{API_CODE_OFFLINE, API_CODE_SUCCESS};

    fn raw(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_decode_unwraps_success_envelope() {
        let body = format!(
            r#"{{"code":"{API_CODE_SUCCESS}","message":"success","data":[1,2,3]}}"#
        );
        let data: Vec<i32> = decode(raw(200, &body)).unwrap();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_maps_error_envelope_to_rejection() {
        let body = r#"{"code":"E1001","message":"table closed"}"#;
        let err = decode::<Vec<i32>>(raw(200, body)).unwrap_err();
        match err {
            ApiError::Rejected { code, message, .. } => {
                assert_eq!(code, "E1001");
                assert_eq!(message, "table closed");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        // A rejection is never worth retrying
        let body = r#"{"code":"E1001","message":"table closed"}"#;
        assert!(!decode::<Vec<i32>>(raw(200, body)).unwrap_err().is_transient());
    }

    #[test]
    fn test_decode_classifies_status_codes() {
        let err = decode::<()>(raw(503, r#"{"code":"E5030","message":"offline"}"#)).unwrap_err();
        assert!(matches!(err, ApiError::Server { status: 503, .. }));
        assert!(err.is_transient());

        let err = decode::<()>(raw(404, "not found")).unwrap_err();
        assert!(matches!(err, ApiError::Rejected { status: 404, .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_offline_code_round_trips_through_envelope() {
        let body = serde_json::to_vec(&ApiResponse::<()>::error(
            API_CODE_OFFLINE,
            "Offline: no cached copy available",
        ))
        .unwrap();
        let err = decode::<()>(RawResponse { status: 503, body }).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_garbage_success_body_is_invalid_not_transient() {
        let err = decode::<Vec<i32>>(raw(200, "<html>proxy error</html>")).unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
        assert!(!err.is_transient());
    }
}
