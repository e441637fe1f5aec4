//! Connectivity tracking
//!
//! A single watch-channel flag fed by real request outcomes rather than a
//! probe: the HTTP client and the event subscription mark the state as
//! their calls succeed or fail. The outbox worker drains on the
//! offline-to-online edge.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared connectivity flag; clones observe the same state
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Starts pessimistic: offline until a request proves otherwise
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn mark_online(&self) {
        if !*self.tx.borrow() {
            tracing::info!("Connectivity restored");
        }
        self.tx.send_replace(true);
    }

    pub fn mark_offline(&self) {
        if *self.tx.borrow() {
            tracing::warn!("Connectivity lost");
        }
        self.tx.send_replace(false);
    }

    /// Watch for state changes; `changed()` wakes on every transition
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_offline() {
        let connectivity = Connectivity::new();
        assert!(!connectivity.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_the_online_edge() {
        let connectivity = Connectivity::new();
        let mut rx = connectivity.subscribe();

        connectivity.mark_online();
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        connectivity.mark_offline();
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }
}
