use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::{MenuItem, Order};

/// Protocol version, bumped on incompatible frame changes
pub const PROTOCOL_VERSION: u16 = 1;

/// Collections the backend publishes changes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Menu,
    Orders,
}

impl EntityKind {
    /// Wire spelling → kind; the backend's collection naming is a single
    /// contract, no alternate spellings are accepted
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "menu" => Some(EntityKind::Menu),
            "orders" => Some(EntityKind::Orders),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Menu => write!(f, "menu"),
            EntityKind::Orders => write!(f, "orders"),
        }
    }
}

/// Change operations carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "insert" => Some(ChangeOp::Insert),
            "update" => Some(ChangeOp::Update),
            "delete" => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::Insert => write!(f, "insert"),
            ChangeOp::Update => write!(f, "update"),
            ChangeOp::Delete => write!(f, "delete"),
        }
    }
}

/// Raw subscription frame, decoded leniently so malformed shapes are
/// reportable rather than a bare serde failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "entityType")]
    pub entity_type: String,
    pub op: String,
    #[serde(default)]
    pub record: serde_json::Value,
}

impl EventFrame {
    /// Serialize for transport
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse from a transport frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Why a frame failed strict decoding
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventDecodeError {
    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("unknown op `{op}` for {entity}")]
    UnknownOp { entity: EntityKind, op: String },

    #[error("malformed {entity} record: {detail}")]
    BadRecord { entity: EntityKind, detail: String },
}

impl EventDecodeError {
    /// The collection to resync, when the frame at least said which one
    /// it was about
    pub fn entity_hint(&self) -> Option<EntityKind> {
        match self {
            EventDecodeError::UnknownEntity(_) => None,
            EventDecodeError::UnknownOp { entity, .. }
            | EventDecodeError::BadRecord { entity, .. } => Some(*entity),
        }
    }
}

/// A fully-decoded change event
///
/// Insert and update both mean "make the local record look like this";
/// the fold is an upsert either way, which keeps duplicate and reordered
/// deliveries harmless. Delete carries only the id.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    MenuUpsert { op: ChangeOp, item: MenuItem },
    MenuDelete { id: String },
    OrderUpsert { op: ChangeOp, order: Order },
    OrderDelete { id: String },
}

impl ChangeEvent {
    /// Which collection the event touches
    pub fn entity(&self) -> EntityKind {
        match self {
            ChangeEvent::MenuUpsert { .. } | ChangeEvent::MenuDelete { .. } => EntityKind::Menu,
            ChangeEvent::OrderUpsert { .. } | ChangeEvent::OrderDelete { .. } => EntityKind::Orders,
        }
    }
}

impl TryFrom<EventFrame> for ChangeEvent {
    type Error = EventDecodeError;

    fn try_from(frame: EventFrame) -> Result<Self, Self::Error> {
        let entity = EntityKind::parse(&frame.entity_type)
            .ok_or_else(|| EventDecodeError::UnknownEntity(frame.entity_type.clone()))?;
        let op = ChangeOp::parse(&frame.op).ok_or_else(|| EventDecodeError::UnknownOp {
            entity,
            op: frame.op.clone(),
        })?;

        match (entity, op) {
            (EntityKind::Menu, ChangeOp::Delete) => Ok(ChangeEvent::MenuDelete {
                id: record_id(&frame.record).ok_or_else(|| EventDecodeError::BadRecord {
                    entity,
                    detail: "delete without record id".to_string(),
                })?,
            }),
            (EntityKind::Menu, op) => {
                let item = serde_json::from_value(frame.record).map_err(|e| {
                    EventDecodeError::BadRecord {
                        entity,
                        detail: e.to_string(),
                    }
                })?;
                Ok(ChangeEvent::MenuUpsert { op, item })
            }
            (EntityKind::Orders, ChangeOp::Delete) => Ok(ChangeEvent::OrderDelete {
                id: record_id(&frame.record).ok_or_else(|| EventDecodeError::BadRecord {
                    entity,
                    detail: "delete without record id".to_string(),
                })?,
            }),
            (EntityKind::Orders, op) => {
                let order = serde_json::from_value(frame.record).map_err(|e| {
                    EventDecodeError::BadRecord {
                        entity,
                        detail: e.to_string(),
                    }
                })?;
                Ok(ChangeEvent::OrderUpsert { op, order })
            }
        }
    }
}

fn record_id(record: &serde_json::Value) -> Option<String> {
    record.get("id").and_then(|v| v.as_str()).map(str::to_string)
}

/// First frame the client writes after connecting; the backend filters
/// order events by `session_id` from then on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub session_id: String,
    pub version: u16,
}

impl SubscribeRequest {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            version: PROTOCOL_VERSION,
        }
    }
}
