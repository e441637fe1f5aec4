//! Table session model

use serde::{Deserialize, Serialize};

use crate::util::{new_id, now_millis};

/// How long a session stays valid after creation (24 hours)
pub const SESSION_TTL_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// A device-to-table binding for the duration of a visit
///
/// Created on first table association and persisted; once the TTL has
/// elapsed the session must be discarded and regenerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSession {
    pub session_id: String,
    pub table_number: u32,
    pub created_at: i64,
}

impl TableSession {
    /// Create a fresh session for a table, stamped now
    pub fn new(table_number: u32) -> Self {
        Self {
            session_id: new_id(),
            table_number,
            created_at: now_millis(),
        }
    }

    /// Whether the session had outlived its TTL at the given instant
    pub fn is_expired_at(&self, now: i64) -> bool {
        now - self.created_at >= SESSION_TTL_MILLIS
    }

    /// Whether the session has outlived its TTL
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}
