//! Outbox drain worker
//!
//! Owns the drain cadence: a periodic tick while online, the
//! offline-to-online edge, and nudges from `enqueue`. Crash recovery runs
//! once at startup before the first drain.

use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connectivity::Connectivity;
use crate::outbox::OrderOutbox;

pub struct OutboxWorker {
    outbox: Arc<OrderOutbox>,
    connectivity: Connectivity,
    drain_interval: Duration,
    shutdown: CancellationToken,
}

impl OutboxWorker {
    pub fn new(
        outbox: Arc<OrderOutbox>,
        connectivity: Connectivity,
        drain_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            outbox,
            connectivity,
            drain_interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!("Outbox worker started");

        if let Err(e) = self.outbox.recover_interrupted() {
            tracing::error!("Outbox crash recovery failed: {e}");
        }
        // First drain runs regardless of the connectivity flag: the flag
        // starts pessimistic and a failed attempt is what corrects it
        self.outbox.drain().await;

        let mut online_rx = self.connectivity.subscribe();
        let nudge = self.outbox.nudge_handle();
        let mut interval = tokio::time::interval(self.drain_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // the immediate first tick

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Outbox worker shutting down");
                    break;
                }

                _ = interval.tick() => {
                    if self.connectivity.is_online() {
                        self.outbox.drain().await;
                    }
                }

                _ = nudge.notified() => {
                    // enqueue() fires this so a fresh order goes out
                    // immediately when the network is known up
                    if self.connectivity.is_online() {
                        self.outbox.drain().await;
                    }
                }

                result = online_rx.changed() => {
                    match result {
                        Ok(()) => {
                            if *online_rx.borrow_and_update() {
                                tracing::info!("Connectivity restored, draining outbox");
                                self.outbox.drain().await;
                            }
                        }
                        Err(_) => {
                            tracing::info!("Connectivity channel closed, outbox worker stopping");
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Outbox worker stopped");
    }
}
