//! Client error types

use thiserror::Error;

use crate::cache::RouterError;
use crate::cart::CartError;
use crate::http::ApiError;
use crate::outbox::OutboxError;
use crate::store::StoreError;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// Data directory could not be prepared
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Durable store failure
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Cart operation failed
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    /// Backend request failed
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Outbox operation failed
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// Cache router unavailable
    #[error("Cache router error: {0}")]
    Router(#[from] RouterError),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
