use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::capture::SnapshotCapture;
use super::models::{
    DeletionEvent, EventStatus, ScheduleRequest, META_RESOURCE_DOM_ID, META_RESOURCE_LABEL,
    META_UNDO_DEADLINE,
};
use super::snapshot::{replay_order, SnapshotNode};
use super::tokens::{fingerprint, generate_token, TokenStore};
use crate::core::clock::Clock;
use crate::core::config::UndoConfig;
use crate::core::error::{Result, UndoError};
use crate::db::{Record, RecordKey, Schema, StoreError, UndoStorage};
use crate::utils::{dom_id, safe_truncate_ellipsis};


const TOAST_LABEL_MAX_CHARS: usize = 80;


/// Capture, delete and record the deletion event, all in one transaction.
pub struct DeletionExecutor<S: UndoStorage> {
    storage: Arc<S>,
    schema: Arc<Schema>,
    capture: SnapshotCapture<S>,
    tokens: TokenStore<S>,
    clock: Arc<dyn Clock>,
    config: UndoConfig,
}

impl<S: UndoStorage> DeletionExecutor<S> {
    pub fn new(
        storage: Arc<S>,
        schema: Arc<Schema>,
        clock: Arc<dyn Clock>,
        config: UndoConfig,
    ) -> Self {
        Self {
            capture: SnapshotCapture::new(Arc::clone(&storage), Arc::clone(&schema)),
            tokens: TokenStore::new(Arc::clone(&storage)),
            storage,
            schema,
            clock,
            config,
        }
    }

    pub async fn schedule(&self, request: ScheduleRequest) -> Result<DeletionEvent> {
        let resource = request.resource.clone();
        let mut tx = self.storage.begin().await?;

        match self.schedule_in(&mut tx, request).await {
            Ok(event) => {
                self.storage.commit(tx).await?;
                info!(
                    "Scheduled deletion of {} (token {}, undo until {})",
                    resource,
                    fingerprint(&event.token),
                    event.undo_deadline
                );
                Ok(event)
            }
            Err(e) => {
                if let Err(rollback_err) = self.storage.rollback(tx).await {
                    error!("Rollback after failed delete of {} failed: {}", resource, rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn schedule_in(&self, tx: &mut S::Tx, request: ScheduleRequest) -> Result<DeletionEvent> {
        let ScheduleRequest {
            resource,
            actor_id,
            mut metadata,
            toast_message,
            ttl,
        } = request;

        let ttl = match ttl {
            Some(ttl) => ttl,
            None => self.config.ttl()?,
        };
        if ttl <= chrono::Duration::zero() {
            return Err(UndoError::Config(format!("undo ttl must be positive, got {ttl}")));
        }

        let created_at = self.clock.now();
        let undo_deadline = created_at
            .checked_add_signed(ttl)
            .ok_or_else(|| UndoError::Config(format!("undo ttl {ttl} overflows the deadline")))?;

        let record = self.storage.find_record(tx, &resource).await?.ok_or_else(|| {
            warn!("Cannot schedule deletion: {} not found", resource);
            UndoError::RecordNotFound(resource.clone())
        })?;

        let snapshot = self.capture.capture(tx, &record).await?;
        let deleted = self.delete_owned(tx, &resource, &snapshot).await?;
        debug!("Deleted {} rows under {}", deleted, resource);

        let label = self.schema.label_for(&record);

        metadata
            .entry(META_RESOURCE_LABEL.to_string())
            .or_insert_with(|| label.clone());
        metadata
            .entry(META_RESOURCE_DOM_ID.to_string())
            .or_insert_with(|| dom_id(&record.model, record.id));
        metadata.insert(META_UNDO_DEADLINE.to_string(), undo_deadline.to_rfc3339());

        let toast_message = toast_message.unwrap_or_else(|| default_toast(&label));

        let event = DeletionEvent {
            token: generate_token(),
            resource_type: record.model.clone(),
            resource_id: record.id.to_string(),
            actor_id,
            status: EventStatus::Pending,
            created_at,
            undo_deadline,
            consumed_at: None,
            metadata,
            toast_message,
            snapshot,
        };

        self.tokens.create(tx, event.clone()).await?;
        Ok(event)
    }

    /// Deletes every owned row of the snapshot in reverse replay order, so no
    /// captured row is removed while another captured row still points at it.
    async fn delete_owned(
        &self,
        tx: &mut S::Tx,
        resource: &RecordKey,
        snapshot: &SnapshotNode,
    ) -> Result<usize> {
        let visits = replay_order(&self.schema, snapshot)
            .map_err(|e| UndoError::capture(e.path, e.reason))?;

        let mut deleted = 0;
        for visit in visits.iter().rev().filter(|v| !v.node.is_reference) {
            let key = visit.node.key();
            match self.storage.delete_record(tx, &key).await {
                Ok(()) => deleted += 1,
                Err(StoreError::ForeignKeyViolation {
                    relation,
                    referencing,
                    ..
                }) => {
                    warn!(
                        "Deletion of {} blocked: {} still references {} via {}",
                        resource, referencing, key, relation
                    );
                    return Err(UndoError::DeleteRestricted {
                        resource: resource.clone(),
                        relation,
                        blocking: referencing,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(deleted)
    }
}

fn default_toast(label: &str) -> String {
    format!("{} was deleted", safe_truncate_ellipsis(label, TOAST_LABEL_MAX_CHARS))
}

/// Rows a snapshot would put back, in restore order. Handy for callers that
/// want to show what an undo covers.
pub fn owned_rows(schema: &Schema, snapshot: &SnapshotNode) -> Vec<Record> {
    replay_order(schema, snapshot)
        .map(|visits| visits.iter().filter_map(|v| v.node.to_record()).collect())
        .unwrap_or_default()
}
