use std::sync::Arc;

use tracing::{error, info, warn};

use super::executor::DeletionExecutor;
use super::models::{DeletionEvent, Metadata, ScheduleReceipt, ScheduleRequest, UndoReceipt};
use super::restore::SnapshotRestorer;
use super::sweeper::ExpirySweeper;
use super::tokens::{fingerprint, TokenStore};
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::UndoConfig;
use crate::core::error::{Result, UndoError};
use crate::core::events::{Event, EventBus, DELETION_RESTORED, DELETION_SCHEDULED};
use crate::db::{RecordKey, Schema, UndoStorage};


/// Entry point for callers: `schedule` a reversible delete, `undo` it with the
/// returned token.
pub struct DeletionUndoManager<S: UndoStorage> {
    storage: Arc<S>,
    schema: Arc<Schema>,
    config: UndoConfig,
    clock: Arc<dyn Clock>,
    executor: DeletionExecutor<S>,
    tokens: TokenStore<S>,
    restorer: SnapshotRestorer<S>,
    events: Option<Arc<EventBus>>,
}

impl<S: UndoStorage> DeletionUndoManager<S> {
    pub fn new(storage: Arc<S>, schema: Arc<Schema>, config: UndoConfig) -> Self {
        Self::with_clock(storage, schema, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<S>,
        schema: Arc<Schema>,
        config: UndoConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor: DeletionExecutor::new(
                Arc::clone(&storage),
                Arc::clone(&schema),
                Arc::clone(&clock),
                config.clone(),
            ),
            tokens: TokenStore::new(Arc::clone(&storage)),
            restorer: SnapshotRestorer::new(Arc::clone(&storage), Arc::clone(&schema)),
            storage,
            schema,
            config,
            clock,
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &UndoConfig {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub async fn schedule(
        &self,
        resource: RecordKey,
        actor_id: impl Into<String>,
        metadata: Metadata,
    ) -> Result<ScheduleReceipt> {
        self.schedule_with(ScheduleRequest::new(resource, actor_id).with_metadata(metadata))
            .await
    }

    pub async fn schedule_with(&self, request: ScheduleRequest) -> Result<ScheduleReceipt> {
        let event = self.executor.schedule(request).await?;
        self.publish(Event::lifecycle(DELETION_SCHEDULED, &event)).await;
        Ok(ScheduleReceipt::from_event(&event, self.config.auto_hide_after_ms))
    }

    /// Consumes the token and replays its snapshot in one transaction. If the
    /// replay fails the consume is rolled back with it; an expired token is
    /// marked expired and stays that way.
    pub async fn undo(&self, token: &str) -> Result<UndoReceipt> {
        let tag = fingerprint(token);
        let mut tx = self.storage.begin().await?;
        let now = self.clock.now();

        let event = match self.tokens.consume(&mut tx, token, now).await {
            Ok(event) => event,
            Err(e @ UndoError::Expired { .. }) => {
                self.storage.commit(tx).await?;
                return Err(e);
            }
            Err(e) => {
                self.abort(tx, &tag).await;
                return Err(e);
            }
        };

        let report = match self.restorer.restore(&mut tx, &event).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Undo {} failed, nothing restored: {}", tag, e);
                self.abort(tx, &tag).await;
                return Err(e);
            }
        };

        self.storage.commit(tx).await?;
        info!(
            "Undo {} restored {}#{} ({} rows)",
            tag, event.resource_type, event.resource_id, report.rows_restored
        );
        self.publish(Event::lifecycle(DELETION_RESTORED, &event)).await;

        Ok(UndoReceipt {
            token: event.token,
            resource_type: event.resource_type,
            resource_id: event.resource_id,
            restored_at: now,
            rows_restored: report.rows_restored,
        })
    }

    pub async fn event(&self, token: &str) -> Result<DeletionEvent> {
        self.tokens.get(token).await
    }

    /// A sweeper sharing this manager's storage, clock, configuration and bus.
    pub fn sweeper(&self) -> ExpirySweeper<S> {
        let sweeper = ExpirySweeper::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.clock),
            &self.config,
        );
        match &self.events {
            Some(bus) => sweeper.with_events(Arc::clone(bus)),
            None => sweeper,
        }
    }

    async fn abort(&self, tx: S::Tx, tag: &str) {
        if let Err(e) = self.storage.rollback(tx).await {
            error!("Rollback for undo {} failed: {}", tag, e);
        }
    }

    async fn publish(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.publish(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::error::ErrorKind;
    use crate::db::farm::{self, SAMPLE_PLAN_ID};
    use crate::db::{MemoryStorage, Record};
    use crate::deletion::EventStatus;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn manager() -> (Arc<MemoryStorage>, Arc<ManualClock>, DeletionUndoManager<MemoryStorage>) {
        let schema = Arc::new(farm::farm_planning_schema());
        let storage = Arc::new(MemoryStorage::new(&schema));
        storage.seed(farm::sample_reference_data()).await.unwrap();
        storage.seed(farm::sample_plan()).await.unwrap();

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = DeletionUndoManager::with_clock(
            Arc::clone(&storage),
            schema,
            UndoConfig::default(),
            clock.clone(),
        );
        (storage, clock, manager)
    }

    fn plan() -> RecordKey {
        RecordKey::new("CultivationPlan", SAMPLE_PLAN_ID)
    }

    #[tokio::test]
    async fn test_schedule_receipt() {
        let (_storage, clock, manager) = manager().await;
        let receipt = manager.schedule(plan(), "user-1", Metadata::new()).await.unwrap();

        assert_eq!(receipt.token.len(), 64);
        assert_eq!(receipt.auto_hide_after, 60_000);
        assert_eq!(receipt.undo_deadline, clock.now() + Duration::minutes(5));
        assert_eq!(receipt.resource_type, "CultivationPlan");
        assert_eq!(receipt.resource_id, "8");

        let stored = manager.event(&receipt.token).await.unwrap();
        assert_eq!(stored.status, EventStatus::Pending);
        assert_eq!(stored.toast_message, receipt.toast_message);
    }

    #[tokio::test]
    async fn test_undo_then_repeat() {
        let (storage, _clock, manager) = manager().await;
        let receipt = manager.schedule(plan(), "user-1", Metadata::new()).await.unwrap();

        let undone = manager.undo(&receipt.token).await.unwrap();
        assert_eq!(undone.rows_restored, 11);
        assert!(storage.fetch(&plan()).await.unwrap().is_some());

        let err = manager.undo(&receipt.token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyConsumed);
        assert_eq!(storage.row_count("CultivationPlanField").await, 2);
    }

    #[tokio::test]
    async fn test_expired_undo_flips_status() {
        let (storage, clock, manager) = manager().await;
        let receipt = manager.schedule(plan(), "user-1", Metadata::new()).await.unwrap();

        clock.advance(Duration::minutes(5) + Duration::seconds(1));
        let err = manager.undo(&receipt.token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);

        assert_eq!(manager.event(&receipt.token).await.unwrap().status, EventStatus::Expired);
        assert!(storage.fetch(&plan()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_restore_keeps_token_usable() {
        let (storage, _clock, manager) = manager().await;
        let receipt = manager.schedule(plan(), "user-1", Metadata::new()).await.unwrap();

        // Something else takes the plan's primary key in the meantime.
        storage
            .seed(vec![Record::new(
                "CultivationPlan",
                SAMPLE_PLAN_ID,
                serde_json::json!({"farm_id": 1, "plan_name": "Impostor"}),
            )])
            .await
            .unwrap();

        let err = manager.undo(&receipt.token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RestoreError);
        assert_eq!(manager.event(&receipt.token).await.unwrap().status, EventStatus::Pending);
        assert_eq!(storage.row_count("CultivationPlanField").await, 0);

        storage.remove(&plan()).await.unwrap();
        assert!(manager.undo(&receipt.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_lifecycle_notices() {
        let (_storage, _clock, manager) = manager().await;
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        for event_type in [DELETION_SCHEDULED, DELETION_RESTORED] {
            let counter = Arc::clone(&seen);
            bus.subscribe(
                event_type,
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;
        }
        let manager = manager.with_events(bus);

        let receipt = manager.schedule(plan(), "user-1", Metadata::new()).await.unwrap();
        manager.undo(&receipt.token).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sweeper_shares_clock() {
        let (_storage, clock, manager) = manager().await;
        let receipt = manager.schedule(plan(), "user-1", Metadata::new()).await.unwrap();

        let sweeper = manager.sweeper();
        assert_eq!(sweeper.sweep_once().await.unwrap().expired, 0);

        clock.advance(Duration::minutes(6));
        assert_eq!(sweeper.sweep_once().await.unwrap().expired, 1);
        assert_eq!(manager.event(&receipt.token).await.unwrap().status, EventStatus::Expired);
    }
}
