use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::tokens::TokenStore;
use crate::core::clock::Clock;
use crate::core::config::UndoConfig;
use crate::core::error::Result;
use crate::core::events::{Event, EventBus};
use crate::db::UndoStorage;


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub expired: usize,
    /// Events that changed status between the scan and the flip.
    pub raced: usize,
    pub batches: usize,
}


/// Background pass that flips overdue pending events to `expired`.
///
/// Correctness never depends on it: `consume` re-checks the deadline itself.
/// The sweeper only keeps the table honest for anything that reads statuses.
pub struct ExpirySweeper<S: UndoStorage> {
    storage: Arc<S>,
    tokens: TokenStore<S>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_size: usize,
    events: Option<Arc<EventBus>>,
}

impl<S: UndoStorage> ExpirySweeper<S> {
    pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>, config: &UndoConfig) -> Self {
        Self {
            tokens: TokenStore::new(Arc::clone(&storage)),
            storage,
            clock,
            interval: config.sweep_interval(),
            batch_size: config.sweep_batch_size.max(1),
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Expires everything overdue right now, one transaction per batch.
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        loop {
            let now = self.clock.now();
            let mut tx = self.storage.begin().await?;
            let batch = match self.tokens.expire_overdue(&mut tx, now, self.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.storage.rollback(tx).await?;
                    return Err(e);
                }
            };
            self.storage.commit(tx).await?;

            stats.batches += 1;
            stats.scanned += batch.scanned;
            stats.expired += batch.expired.len();
            stats.raced += batch.raced;

            if let Some(bus) = &self.events {
                for token in &batch.expired {
                    bus.publish(Event::expired(token)).await;
                }
            }

            if batch.scanned < self.batch_size {
                break;
            }
        }

        if stats.expired > 0 || stats.raced > 0 {
            info!(
                "Expiry sweep: {} expired, {} raced, {} batches",
                stats.expired, stats.raced, stats.batches
            );
        } else {
            debug!("Expiry sweep: nothing overdue");
        }
        Ok(stats)
    }

    /// Sweeps on every interval tick until `shutdown` flips or its sender is
    /// dropped. The first tick fires immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Expiry sweeper started (every {:?})", self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("Expiry sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Expiry sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
