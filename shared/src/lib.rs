//! Shared types for the Comanda sync core
//!
//! Wire-level types used on both sides of the menu/order API:
//! data models, change-event messages, the response envelope, and
//! small utility functions.

pub mod message;
pub mod models;
pub mod response;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Message re-exports (for convenient access)
pub use message::{ChangeEvent, EntityKind, EventFrame, NotificationPayload};
pub use response::ApiResponse;
