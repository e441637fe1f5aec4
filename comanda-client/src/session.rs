//! Table session manager
//!
//! Persists the device-to-table binding. A stored session is reused only
//! while it is inside its TTL and still bound to the same table; anything
//! else is discarded and regenerated.

use std::sync::Arc;

use shared::models::TableSession;

use crate::store::{DurableStore, StoreResult};

pub struct SessionManager {
    store: Arc<DurableStore>,
}

impl SessionManager {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    /// Load the persisted session for this table, or create a fresh one
    ///
    /// An expired session and a session for a different table are both
    /// deleted before the replacement is created, so at most one session
    /// is live at a time.
    pub fn load_or_create(&self, table_number: u32) -> StoreResult<TableSession> {
        if let Some(session) = self.store.latest_session()? {
            if session.is_expired() {
                tracing::info!(
                    session_id = %session.session_id,
                    "Stored session expired, regenerating"
                );
                self.store.delete_session(&session.session_id)?;
            } else if session.table_number != table_number {
                tracing::info!(
                    session_id = %session.session_id,
                    old_table = session.table_number,
                    new_table = table_number,
                    "Table changed, regenerating session"
                );
                self.store.delete_session(&session.session_id)?;
            } else {
                tracing::debug!(session_id = %session.session_id, "Resuming stored session");
                return Ok(session);
            }
        }

        let session = TableSession::new(table_number);
        self.store.put_session(&session)?;
        tracing::info!(
            session_id = %session.session_id,
            table = table_number,
            "Session established"
        );
        Ok(session)
    }

    /// Forget a visit entirely, including its persisted cart
    pub fn clear(&self, session_id: &str) -> StoreResult<()> {
        self.store.delete_session(session_id)?;
        self.store.delete_cart(session_id)?;
        tracing::info!(session_id, "Session cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::SESSION_TTL_MILLIS;
    use shared::util::now_millis;

    #[test]
    fn test_session_survives_restart() {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone());

        let first = manager.load_or_create(4).unwrap();
        let second = manager.load_or_create(4).unwrap();
        assert_eq!(first.session_id, second.session_id);
    }

    #[test]
    fn test_expired_session_is_regenerated() {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        let mut stale = TableSession::new(4);
        stale.created_at = now_millis() - SESSION_TTL_MILLIS - 1;
        store.put_session(&stale).unwrap();

        let fresh = SessionManager::new(store.clone()).load_or_create(4).unwrap();
        assert_ne!(fresh.session_id, stale.session_id);
        // The stale record is gone, not lingering next to the new one
        assert!(store.get_session(&stale.session_id).unwrap().is_none());
    }

    #[test]
    fn test_table_change_regenerates_session() {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone());

        let first = manager.load_or_create(4).unwrap();
        let moved = manager.load_or_create(9).unwrap();
        assert_ne!(first.session_id, moved.session_id);
        assert_eq!(moved.table_number, 9);
    }

    #[test]
    fn test_clear_removes_session_and_cart() {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone());

        let session = manager.load_or_create(4).unwrap();
        store
            .save_cart(&session.session_id, &shared::models::CartSnapshot::default())
            .unwrap();

        manager.clear(&session.session_id).unwrap();
        assert!(store.get_session(&session.session_id).unwrap().is_none());
        assert!(store.load_cart(&session.session_id).unwrap().is_none());
    }
}
