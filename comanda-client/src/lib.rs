//! Comanda Client - offline-first sync core for table ordering
//!
//! Keeps a restaurant table's app usable through network loss: the cart
//! and queued orders live in a local durable store, order submission goes
//! through a retrying outbox, menu and order state mirror the backend via
//! a change-event stream, and HTTP responses are cached per-path strategy.

pub mod cache;
pub mod cart;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod http;
pub mod outbox;
pub mod realtime;
pub mod session;
pub mod store;

pub use client::ComandaClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};

// Re-export shared types for convenience
pub use shared::message::NotificationPayload;
pub use shared::models::{CartLine, CartTotals, MenuItem, Order, OrderStatus, TableSession};

// Component surfaces most apps touch directly
pub use cart::{CartEngine, CartError};
pub use outbox::{OrderOutbox, OutboxEvent};
pub use realtime::{MenuMirror, MirrorEvent, OrderMirror};
