//! Order models and API payloads

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a confirmed order
///
/// Transitions are server-authoritative; the client only observes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    Delivered,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Confirmed => write!(f, "confirmed"),
            OrderStatus::Preparing => write!(f, "preparing"),
            OrderStatus::Ready => write!(f, "ready"),
            OrderStatus::Delivered => write!(f, "delivered"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One ordered line, frozen at checkout time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineSnapshot {
    pub menu_item_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
    #[serde(default)]
    pub special_instructions: String,
}

/// A confirmed order as reported by the backend (read-only mirror)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub table_number: u32,
    pub items: Vec<OrderLineSnapshot>,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub session_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Checkout snapshot handed from the cart to the order outbox
///
/// Deliberately carries no `local_id`: the outbox assigns the idempotency
/// token when it persists the order, so a draft can never be enqueued
/// twice under the same identity by accident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub table_number: u32,
    pub session_id: String,
    pub items: Vec<OrderLineSnapshot>,
    pub total_amount: f64,
    #[serde(default)]
    pub special_instructions: String,
}

/// Payload for `POST /api/orders`
///
/// `local_id` is the client-generated idempotency token: re-sending the
/// same payload can never create a second order on the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderPayload {
    pub table_number: u32,
    pub session_id: String,
    pub items: Vec<OrderLineSnapshot>,
    pub total_amount: f64,
    #[serde(default)]
    pub special_instructions: String,
    pub local_id: String,
}

/// Request body for `POST /api/menu/check-availability`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub item_ids: Vec<String>,
}

/// Response of the availability check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityReport {
    pub all_available: bool,
    #[serde(default)]
    pub unavailable_items: Vec<String>,
}

/// Request body for `PUT /api/orders/:id/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrderStatus {
    pub status: OrderStatus,
}
